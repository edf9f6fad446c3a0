//! Append-only value ↔ index dictionaries and their on-disk format.

use std::fmt;
use std::fs::File;
use std::hash::Hash as StdHash;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use indexmap::{Equivalent, IndexSet};
use sdbtrace_core::{Address, Hash};

use crate::error::DictError;

// ── DictionaryKind ──────────────────────────────────────────────

/// The four value domains a trace compresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DictionaryKind {
    /// 20-byte account addresses.
    Contract,
    /// 32-byte storage keys.
    Storage,
    /// 32-byte storage values and other hashes.
    Value,
    /// Variable-length contract code.
    Code,
}

impl DictionaryKind {
    /// Magic number at the start of this kind's dictionary file.
    pub const fn magic(self) -> u64 {
        match self {
            Self::Contract => 4711,
            Self::Storage => 4712,
            Self::Value => 4713,
            Self::Code => 4714,
        }
    }

    /// File name used inside a dictionary directory.
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Contract => "contract-dictionary.dat",
            Self::Storage => "storage-dictionary.dat",
            Self::Value => "value-dictionary.dat",
            Self::Code => "code-dictionary.dat",
        }
    }

    /// Largest number of entries whose indices still fit the trace encoding.
    ///
    /// Contract, storage and code indices are serialized as `u32`; value
    /// indices as `u64`.
    pub const fn max_entries(self) -> usize {
        match self {
            Self::Contract | Self::Storage | Self::Code => u32::MAX as usize,
            Self::Value => usize::MAX,
        }
    }
}

impl fmt::Display for DictionaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Contract => "contract",
            Self::Storage => "storage",
            Self::Value => "value",
            Self::Code => "code",
        };
        f.write_str(name)
    }
}

// ── DictionaryEntry ─────────────────────────────────────────────

/// A value that can live in a [`Dictionary`] and be persisted.
pub trait DictionaryEntry: StdHash + Eq + Clone {
    /// Serialize one record.
    fn write_entry(&self, w: &mut dyn Write) -> io::Result<()>;

    /// Deserialize one record.
    ///
    /// Returns `Ok(None)` on clean EOF (no bytes available before the
    /// record), or an error if the record is truncated.
    fn read_entry(r: &mut dyn Read, kind: DictionaryKind) -> Result<Option<Self>, DictError>;
}

/// Largest code body allocated before any of its bytes are read.
const MAX_PREALLOCATED_BODY: usize = 64 * 1024;

/// Fill `buf` from `r`, distinguishing clean EOF from truncation.
fn read_record(r: &mut dyn Read, buf: &mut [u8], kind: DictionaryKind) -> Result<bool, DictError> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(DictError::Corrupted {
                    kind,
                    detail: format!("truncated record: got {filled} of {} bytes", buf.len()),
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(DictError::Io(e)),
        }
    }
    Ok(true)
}

impl DictionaryEntry for Address {
    fn write_entry(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_all(self.as_bytes())
    }

    fn read_entry(r: &mut dyn Read, kind: DictionaryKind) -> Result<Option<Self>, DictError> {
        let mut buf = [0u8; 20];
        Ok(read_record(r, &mut buf, kind)?.then(|| Address::from(buf)))
    }
}

impl DictionaryEntry for Hash {
    fn write_entry(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_all(self.as_bytes())
    }

    fn read_entry(r: &mut dyn Read, kind: DictionaryKind) -> Result<Option<Self>, DictError> {
        let mut buf = [0u8; 32];
        Ok(read_record(r, &mut buf, kind)?.then(|| Hash::from(buf)))
    }
}

impl DictionaryEntry for Vec<u8> {
    fn write_entry(&self, w: &mut dyn Write) -> io::Result<()> {
        let len = u32::try_from(self.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "code blob exceeds u32::MAX bytes")
        })?;
        w.write_all(&len.to_le_bytes())?;
        w.write_all(self)
    }

    fn read_entry(r: &mut dyn Read, kind: DictionaryKind) -> Result<Option<Self>, DictError> {
        let mut len_buf = [0u8; 4];
        if !read_record(r, &mut len_buf, kind)? {
            return Ok(None);
        }
        let len = u32::from_le_bytes(len_buf);
        // The prefix is untrusted; the buffer only grows as bytes arrive.
        let mut data = Vec::with_capacity((len as usize).min(MAX_PREALLOCATED_BODY));
        (&mut *r).take(u64::from(len)).read_to_end(&mut data)?;
        if data.len() != len as usize {
            return Err(DictError::Corrupted {
                kind,
                detail: format!("truncated body: got {} of {len} bytes", data.len()),
            });
        }
        Ok(Some(data))
    }
}

// ── Dictionary ──────────────────────────────────────────────────

/// An ordered bijection between values and dense zero-based indices.
///
/// The index of a value is the number of entries present when it was
/// first encoded. Indices are never reassigned.
#[derive(Clone, Debug)]
pub struct Dictionary<K> {
    kind: DictionaryKind,
    entries: IndexSet<K>,
    limit: usize,
}

impl<K: DictionaryEntry> Dictionary<K> {
    /// Create an empty dictionary bounded only by the index width of `kind`.
    pub fn new(kind: DictionaryKind) -> Self {
        Self::with_limit(kind, kind.max_entries())
    }

    /// Create an empty dictionary holding at most `limit` entries.
    ///
    /// The limit is clamped to what the index width of `kind` can address.
    pub fn with_limit(kind: DictionaryKind, limit: usize) -> Self {
        Self {
            kind,
            entries: IndexSet::new(),
            limit: limit.min(kind.max_entries()),
        }
    }

    /// Return the index of `value`, assigning the next index on first sight.
    pub fn encode<Q>(&mut self, value: &Q) -> Result<usize, DictError>
    where
        Q: ?Sized + StdHash + Equivalent<K> + ToOwned<Owned = K>,
    {
        if let Some(index) = self.entries.get_index_of(value) {
            return Ok(index);
        }
        if self.entries.len() >= self.limit {
            return Err(DictError::CapacityExhausted {
                kind: self.kind,
                limit: self.limit,
            });
        }
        let (index, _) = self.entries.insert_full(value.to_owned());
        Ok(index)
    }

    /// Return the value stored at `index`.
    pub fn decode(&self, index: u64) -> Result<&K, DictError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.entries.get_index(i))
            .ok_or_else(|| DictError::IndexOutOfRange {
                kind: self.kind,
                index,
                len: self.entries.len(),
            })
    }

    /// Index of `value` if it has been encoded.
    pub fn index_of<Q>(&self, value: &Q) -> Option<usize>
    where
        Q: ?Sized + StdHash + Equivalent<K>,
    {
        self.entries.get_index_of(value)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing has been encoded yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Which value domain this dictionary covers.
    pub fn kind(&self) -> DictionaryKind {
        self.kind
    }

    /// Maximum number of entries.
    pub fn limit(&self) -> usize {
        self.limit
    }

    // ── Persistence ─────────────────────────────────────────────

    /// Serialize the magic number followed by every entry in index order.
    pub fn write_to(&self, w: &mut dyn Write) -> Result<(), DictError> {
        w.write_all(&self.kind.magic().to_le_bytes())?;
        for entry in &self.entries {
            entry.write_entry(w)?;
        }
        Ok(())
    }

    /// Deserialize a dictionary previously produced by [`write_to`](Self::write_to).
    ///
    /// Every record must re-encode to the index equal to its position in
    /// the stream; duplicates are reported as corruption.
    pub fn read_from(
        kind: DictionaryKind,
        limit: usize,
        r: &mut dyn Read,
    ) -> Result<Self, DictError> {
        let mut magic = [0u8; 8];
        if !read_record(r, &mut magic, kind)? {
            return Err(DictError::Corrupted {
                kind,
                detail: "empty file, missing magic number".to_string(),
            });
        }
        let found = u64::from_le_bytes(magic);
        if found != kind.magic() {
            return Err(DictError::InvalidMagic {
                kind,
                expected: kind.magic(),
                found,
            });
        }

        let mut dict = Self::with_limit(kind, limit);
        let mut counter = 0usize;
        while let Some(entry) = K::read_entry(r, kind)? {
            let index = dict.encode(&entry)?;
            if index != counter {
                return Err(DictError::Corrupted {
                    kind,
                    detail: format!("record {counter} decoded to index {index}"),
                });
            }
            counter += 1;
        }
        Ok(dict)
    }

    /// Write this dictionary to `path`, replacing any existing file.
    pub fn write_file(&self, path: &Path) -> Result<(), DictError> {
        let mut w = BufWriter::new(File::create(path)?);
        self.write_to(&mut w)?;
        w.flush()?;
        Ok(())
    }

    /// Read a dictionary from `path`.
    pub fn read_file(kind: DictionaryKind, limit: usize, path: &Path) -> Result<Self, DictError> {
        let mut r = BufReader::new(File::open(path)?);
        Self::read_from(kind, limit, &mut r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    #[test]
    fn encode_assigns_dense_indices() {
        let mut dict = Dictionary::new(DictionaryKind::Contract);
        assert_eq!(dict.encode(&addr(7)).unwrap(), 0);
        assert_eq!(dict.encode(&addr(9)).unwrap(), 1);
        assert_eq!(dict.encode(&addr(7)).unwrap(), 0);
        assert_eq!(dict.len(), 2);
        assert_eq!(*dict.decode(1).unwrap(), addr(9));
    }

    #[test]
    fn decode_past_end_fails() {
        let mut dict = Dictionary::new(DictionaryKind::Contract);
        dict.encode(&addr(1)).unwrap();
        assert!(matches!(
            dict.decode(1),
            Err(DictError::IndexOutOfRange { index: 1, len: 1, .. })
        ));
    }

    #[test]
    fn limit_is_enforced() {
        let mut dict = Dictionary::with_limit(DictionaryKind::Storage, 2);
        dict.encode(&Hash::from_low_u64_be(1)).unwrap();
        dict.encode(&Hash::from_low_u64_be(2)).unwrap();
        // Re-encoding an existing value never counts against the limit.
        assert_eq!(dict.encode(&Hash::from_low_u64_be(1)).unwrap(), 0);
        assert!(matches!(
            dict.encode(&Hash::from_low_u64_be(3)),
            Err(DictError::CapacityExhausted { limit: 2, .. })
        ));
    }

    #[test]
    fn code_entries_encode_by_slice() {
        let mut dict: Dictionary<Vec<u8>> = Dictionary::new(DictionaryKind::Code);
        let code: &[u8] = &[0x60, 0x80, 0x60, 0x40];
        assert_eq!(dict.encode(code).unwrap(), 0);
        assert_eq!(dict.encode(&code.to_vec()).unwrap(), 0);
        assert_eq!(dict.decode(0).unwrap().as_slice(), code);
    }

    #[test]
    fn persisted_dictionary_reads_back() {
        let mut dict: Dictionary<Vec<u8>> = Dictionary::new(DictionaryKind::Code);
        dict.encode(&vec![1u8, 2, 3]).unwrap();
        dict.encode(&Vec::<u8>::new()).unwrap();
        dict.encode(&vec![4u8]).unwrap();

        let mut buf = Vec::new();
        dict.write_to(&mut buf).unwrap();
        assert_eq!(&buf[..8], &4714u64.to_le_bytes());

        let back: Dictionary<Vec<u8>> =
            Dictionary::read_from(DictionaryKind::Code, usize::MAX, &mut buf.as_slice()).unwrap();
        assert_eq!(back.len(), 3);
        assert!(back.decode(1).unwrap().is_empty());
        assert_eq!(back.decode(2).unwrap(), &vec![4u8]);
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut dict = Dictionary::new(DictionaryKind::Contract);
        dict.encode(&addr(1)).unwrap();
        let mut buf = Vec::new();
        dict.write_to(&mut buf).unwrap();

        let result: Result<Dictionary<Hash>, _> =
            Dictionary::read_from(DictionaryKind::Storage, usize::MAX, &mut buf.as_slice());
        assert!(matches!(
            result,
            Err(DictError::InvalidMagic {
                expected: 4712,
                found: 4711,
                ..
            })
        ));
    }

    #[test]
    fn duplicate_record_is_corruption() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&4711u64.to_le_bytes());
        buf.extend_from_slice(addr(5).as_bytes());
        buf.extend_from_slice(addr(5).as_bytes());
        let result: Result<Dictionary<Address>, _> =
            Dictionary::read_from(DictionaryKind::Contract, usize::MAX, &mut buf.as_slice());
        assert!(matches!(result, Err(DictError::Corrupted { .. })));
    }

    #[test]
    fn truncated_record_is_corruption() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&4713u64.to_le_bytes());
        buf.extend_from_slice(&[0u8; 31]);
        let result: Result<Dictionary<Hash>, _> =
            Dictionary::read_from(DictionaryKind::Value, usize::MAX, &mut buf.as_slice());
        assert!(matches!(result, Err(DictError::Corrupted { .. })));
    }

    #[test]
    fn short_file_is_corruption() {
        for len in [0, 3, 7] {
            let buf = &4711u64.to_le_bytes()[..len];
            let result: Result<Dictionary<Address>, _> =
                Dictionary::read_from(DictionaryKind::Contract, usize::MAX, &mut &buf[..]);
            assert!(
                matches!(result, Err(DictError::Corrupted { .. })),
                "{len}-byte file: {result:?}"
            );
        }
    }

    #[test]
    fn oversized_length_prefix_is_corruption() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&4714u64.to_le_bytes());
        buf.extend_from_slice(&u32::MAX.to_le_bytes());
        buf.extend_from_slice(&[0x60, 0x80]);
        let result: Result<Dictionary<Vec<u8>>, _> =
            Dictionary::read_from(DictionaryKind::Code, usize::MAX, &mut buf.as_slice());
        let detail = match result {
            Err(DictError::Corrupted { detail, .. }) => detail,
            other => panic!("expected corruption, got {other:?}"),
        };
        assert!(detail.contains("got 2 of 4294967295"), "{detail}");
    }

    proptest! {
        #[test]
        fn encode_decode_is_a_bijection(values in prop::collection::vec(0u64..64, 0..128)) {
            let mut dict = Dictionary::new(DictionaryKind::Value);
            let indices: Vec<usize> = values
                .iter()
                .map(|v| dict.encode(&Hash::from_low_u64_be(*v)).unwrap())
                .collect();
            for (v, idx) in values.iter().zip(&indices) {
                prop_assert_eq!(*dict.decode(*idx as u64).unwrap(), Hash::from_low_u64_be(*v));
            }
            let distinct: std::collections::HashSet<_> = values.iter().collect();
            prop_assert_eq!(dict.len(), distinct.len());
        }
    }
}
