//! The combined compression state shared by recorder, replayer and generator.

use std::fs;
use std::path::Path;

use sdbtrace_core::{Address, Hash};
use tracing::info;

use crate::dictionary::{Dictionary, DictionaryKind};
use crate::error::DictError;
use crate::index_cache::IndexCache;
use crate::snapshot::SnapshotIndex;

/// Entry limits for the four dictionaries of a [`DictionaryContext`].
///
/// Each limit is clamped to what the trace encoding can address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DictionaryLimits {
    /// Maximum number of distinct contract addresses.
    pub contract: usize,
    /// Maximum number of distinct storage keys.
    pub storage: usize,
    /// Maximum number of distinct values.
    pub value: usize,
    /// Maximum number of distinct code blobs.
    pub code: usize,
}

impl Default for DictionaryLimits {
    fn default() -> Self {
        Self {
            contract: DictionaryKind::Contract.max_entries(),
            storage: DictionaryKind::Storage.max_entries(),
            value: DictionaryKind::Value.max_entries(),
            code: DictionaryKind::Code.max_entries(),
        }
    }
}

/// Dictionaries, the storage index cache, the previous-contract pointer and
/// the snapshot table for one record, replay or generation session.
///
/// The encode methods are used while recording, the decode methods while
/// replaying. Both sides update the previous contract and the storage cache
/// in exactly the same order, which is what makes the delta-encoded
/// operations decodable. [`begin_block`](Self::begin_block) resets that
/// per-block state so a replay can start at any block boundary.
#[derive(Clone, Debug)]
pub struct DictionaryContext {
    contracts: Dictionary<Address>,
    storage: Dictionary<Hash>,
    values: Dictionary<Hash>,
    code: Dictionary<Vec<u8>>,
    storage_cache: IndexCache<u32>,
    previous_contract: Option<u32>,
    snapshots: SnapshotIndex,
}

impl DictionaryContext {
    /// Create an empty context with unbounded dictionaries.
    pub fn new() -> Self {
        Self::with_limits(DictionaryLimits::default())
    }

    /// Create an empty context with the given dictionary limits.
    pub fn with_limits(limits: DictionaryLimits) -> Self {
        Self {
            contracts: Dictionary::with_limit(DictionaryKind::Contract, limits.contract),
            storage: Dictionary::with_limit(DictionaryKind::Storage, limits.storage),
            values: Dictionary::with_limit(DictionaryKind::Value, limits.value),
            code: Dictionary::with_limit(DictionaryKind::Code, limits.code),
            storage_cache: IndexCache::new(),
            previous_contract: None,
            snapshots: SnapshotIndex::new(),
        }
    }

    /// Reset the storage cache and the previous contract.
    pub fn begin_block(&mut self) {
        self.storage_cache.clear();
        self.previous_contract = None;
    }

    // ── Contracts ───────────────────────────────────────────────

    /// Encode `addr` and make it the previous contract.
    pub fn encode_contract(&mut self, addr: Address) -> Result<u32, DictError> {
        let index = narrow(DictionaryKind::Contract, self.contracts.encode(&addr)?)?;
        self.previous_contract = Some(index);
        Ok(index)
    }

    /// Decode contract `index` and make it the previous contract.
    pub fn decode_contract(&mut self, index: u32) -> Result<Address, DictError> {
        let addr = *self.contracts.decode(u64::from(index))?;
        self.previous_contract = Some(index);
        Ok(addr)
    }

    /// Address of contract `index` without touching the previous contract.
    pub fn contract(&self, index: u32) -> Result<Address, DictError> {
        self.contracts.decode(u64::from(index)).copied()
    }

    /// Index of the previous contract, if one was seen in this block.
    pub fn previous_contract_index(&self) -> Option<u32> {
        self.previous_contract
    }

    /// Address of the previous contract.
    pub fn previous_contract(&self) -> Result<Address, DictError> {
        let index = self
            .previous_contract
            .ok_or(DictError::UndefinedPreviousContract)?;
        self.contract(index)
    }

    // ── Storage ─────────────────────────────────────────────────

    /// Encode storage `key` and place it in the storage cache.
    ///
    /// Returns the dictionary index and the key's cache position before the
    /// call (`None` if it was not cached).
    pub fn encode_storage(&mut self, key: Hash) -> Result<(u32, Option<u8>), DictError> {
        let index = narrow(DictionaryKind::Storage, self.storage.encode(&key)?)?;
        let pos = self.storage_cache.place(index);
        Ok((index, pos))
    }

    /// Decode storage `index` and place it in the storage cache.
    pub fn decode_storage(&mut self, index: u32) -> Result<Hash, DictError> {
        let key = *self.storage.decode(u64::from(index))?;
        self.storage_cache.place(index);
        Ok(key)
    }

    /// Decode the storage key at cache position `pos` and re-place it.
    pub fn lookup_storage(&mut self, pos: u8) -> Result<Hash, DictError> {
        let index = self.storage_cache.get(pos)?;
        self.decode_storage(index)
    }

    /// Storage key at cache position `pos` without updating the cache.
    pub fn read_storage(&self, pos: u8) -> Result<Hash, DictError> {
        let index = self.storage_cache.get(pos)?;
        self.storage_key(index)
    }

    /// Storage key `index` without updating the cache.
    pub fn storage_key(&self, index: u32) -> Result<Hash, DictError> {
        self.storage.decode(u64::from(index)).copied()
    }

    /// Storage index at cache position `pos` without updating the cache.
    pub fn cached_storage_index(&self, pos: u8) -> Result<u32, DictError> {
        self.storage_cache.get(pos)
    }

    /// Number of populated storage cache slots.
    pub fn storage_cache_len(&self) -> usize {
        self.storage_cache.len()
    }

    // ── Values and code ─────────────────────────────────────────

    /// Encode a 32-byte value.
    pub fn encode_value(&mut self, value: Hash) -> Result<u64, DictError> {
        Ok(self.values.encode(&value)? as u64)
    }

    /// Decode value `index`.
    pub fn decode_value(&self, index: u64) -> Result<Hash, DictError> {
        self.values.decode(index).copied()
    }

    /// Encode a code blob.
    pub fn encode_code(&mut self, code: &[u8]) -> Result<u32, DictError> {
        narrow(DictionaryKind::Code, self.code.encode(code)?)
    }

    /// Decode code `index`.
    pub fn decode_code(&self, index: u32) -> Result<&[u8], DictError> {
        self.code.decode(u64::from(index)).map(Vec::as_slice)
    }

    // ── Snapshots ───────────────────────────────────────────────

    /// Forget all snapshot mappings. Called at each replayed transaction start.
    pub fn init_snapshots(&mut self) {
        self.snapshots.clear();
    }

    /// Register that recorded snapshot `recorded` is `replayed` in this replay.
    pub fn add_snapshot(&mut self, recorded: i32, replayed: i32) {
        self.snapshots.add(recorded, replayed);
    }

    /// Replay-side id for recorded snapshot `recorded`.
    pub fn get_snapshot(&self, recorded: i32) -> Result<i32, DictError> {
        self.snapshots.get(recorded)
    }

    // ── Sizes ───────────────────────────────────────────────────

    /// Number of distinct contracts encoded so far.
    pub fn contract_count(&self) -> usize {
        self.contracts.len()
    }

    /// Number of distinct storage keys encoded so far.
    pub fn storage_count(&self) -> usize {
        self.storage.len()
    }

    /// Number of distinct values encoded so far.
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Number of distinct code blobs encoded so far.
    pub fn code_count(&self) -> usize {
        self.code.len()
    }

    // ── Persistence ─────────────────────────────────────────────

    /// Write all four dictionaries into `dir`, creating it if needed.
    pub fn write(&self, dir: &Path) -> Result<(), DictError> {
        fs::create_dir_all(dir)?;
        self.contracts
            .write_file(&dir.join(DictionaryKind::Contract.file_name()))?;
        self.storage
            .write_file(&dir.join(DictionaryKind::Storage.file_name()))?;
        self.values
            .write_file(&dir.join(DictionaryKind::Value.file_name()))?;
        self.code.write_file(&dir.join(DictionaryKind::Code.file_name()))?;
        info!(
            dir = %dir.display(),
            contracts = self.contracts.len(),
            storage = self.storage.len(),
            values = self.values.len(),
            code = self.code.len(),
            "wrote dictionaries"
        );
        Ok(())
    }

    /// Read all four dictionaries from `dir`.
    ///
    /// The storage cache, previous contract and snapshot table start empty.
    pub fn read(dir: &Path, limits: DictionaryLimits) -> Result<Self, DictError> {
        let mut ctx = Self::with_limits(limits);
        ctx.contracts = Dictionary::read_file(
            DictionaryKind::Contract,
            limits.contract,
            &dir.join(DictionaryKind::Contract.file_name()),
        )?;
        ctx.storage = Dictionary::read_file(
            DictionaryKind::Storage,
            limits.storage,
            &dir.join(DictionaryKind::Storage.file_name()),
        )?;
        ctx.values = Dictionary::read_file(
            DictionaryKind::Value,
            limits.value,
            &dir.join(DictionaryKind::Value.file_name()),
        )?;
        ctx.code = Dictionary::read_file(
            DictionaryKind::Code,
            limits.code,
            &dir.join(DictionaryKind::Code.file_name()),
        )?;
        info!(
            dir = %dir.display(),
            contracts = ctx.contracts.len(),
            storage = ctx.storage.len(),
            values = ctx.values.len(),
            code = ctx.code.len(),
            "read dictionaries"
        );
        Ok(ctx)
    }
}

impl Default for DictionaryContext {
    fn default() -> Self {
        Self::new()
    }
}

fn narrow(kind: DictionaryKind, index: usize) -> Result<u32, DictError> {
    u32::try_from(index).map_err(|_| DictError::CapacityExhausted {
        kind,
        limit: kind.max_entries(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn key(n: u64) -> Hash {
        Hash::from_low_u64_be(n)
    }

    #[test]
    fn contract_encode_sets_previous() {
        let mut ctx = DictionaryContext::new();
        assert!(matches!(
            ctx.previous_contract(),
            Err(DictError::UndefinedPreviousContract)
        ));
        let a = ctx.encode_contract(addr(1)).unwrap();
        let b = ctx.encode_contract(addr(2)).unwrap();
        assert_eq!((a, b), (0, 1));
        assert_eq!(ctx.previous_contract_index(), Some(1));
        assert_eq!(ctx.previous_contract().unwrap(), addr(2));
    }

    #[test]
    fn decode_side_mirrors_encode_side() {
        let mut rec = DictionaryContext::new();
        let c = rec.encode_contract(addr(9)).unwrap();
        let (s1, p1) = rec.encode_storage(key(1)).unwrap();
        let (s2, p2) = rec.encode_storage(key(2)).unwrap();
        let (s1_again, p1_again) = rec.encode_storage(key(1)).unwrap();
        assert_eq!((p1, p2), (None, None));
        assert_eq!(s1_again, s1);
        assert_eq!(p1_again, Some(1));

        // Replay with the same dictionaries but fresh per-block state.
        let mut rep = rec.clone();
        rep.begin_block();
        assert_eq!(rep.decode_contract(c).unwrap(), addr(9));
        assert_eq!(rep.decode_storage(s1).unwrap(), key(1));
        assert_eq!(rep.decode_storage(s2).unwrap(), key(2));
        assert_eq!(rep.lookup_storage(1).unwrap(), key(1));
        // Both sides now agree on the top of the cache.
        assert_eq!(rep.read_storage(0).unwrap(), key(1));
        assert_eq!(rec.read_storage(0).unwrap(), key(1));
        assert_eq!(rep.read_storage(1).unwrap(), rec.read_storage(1).unwrap());
    }

    #[test]
    fn begin_block_resets_per_block_state() {
        let mut ctx = DictionaryContext::new();
        ctx.encode_contract(addr(1)).unwrap();
        ctx.encode_storage(key(1)).unwrap();
        ctx.begin_block();
        assert_eq!(ctx.previous_contract_index(), None);
        assert_eq!(ctx.storage_cache_len(), 0);
        // Dictionaries survive.
        assert_eq!(ctx.contract_count(), 1);
        assert_eq!(ctx.storage_count(), 1);
    }

    #[test]
    fn code_and_values_roundtrip() {
        let mut ctx = DictionaryContext::new();
        let v = ctx.encode_value(key(77)).unwrap();
        let c = ctx.encode_code(&[0x60, 0x01]).unwrap();
        assert_eq!(ctx.decode_value(v).unwrap(), key(77));
        assert_eq!(ctx.decode_code(c).unwrap(), &[0x60, 0x01]);
        assert!(ctx.decode_code(c + 1).is_err());
    }

    #[test]
    fn snapshot_table_is_reachable_through_context() {
        let mut ctx = DictionaryContext::new();
        ctx.add_snapshot(0, 10);
        assert_eq!(ctx.get_snapshot(0).unwrap(), 10);
        ctx.init_snapshots();
        assert!(ctx.get_snapshot(0).is_err());
    }

    #[test]
    fn limits_apply_per_dictionary() {
        let mut ctx = DictionaryContext::with_limits(DictionaryLimits {
            contract: 1,
            ..DictionaryLimits::default()
        });
        ctx.encode_contract(addr(1)).unwrap();
        assert!(matches!(
            ctx.encode_contract(addr(2)),
            Err(DictError::CapacityExhausted {
                kind: DictionaryKind::Contract,
                limit: 1
            })
        ));
        ctx.encode_storage(key(1)).unwrap();
        ctx.encode_storage(key(2)).unwrap();
    }
}
