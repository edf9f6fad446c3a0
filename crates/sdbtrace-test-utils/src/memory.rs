//! Reference in-memory backend.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use sdbtrace_core::{keccak256, Address, CodeHashCache, Hash, LogEntry, StateDb, U256};

/// One account of an [`InMemoryStateDb`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Account {
    pub balance: U256,
    pub nonce: u64,
    pub code: Vec<u8>,
    pub storage: BTreeMap<Hash, Hash>,
    pub suicided: bool,
}

impl Account {
    fn is_empty(&self) -> bool {
        self.balance.is_zero() && self.nonce == 0 && self.code.is_empty()
    }
}

/// Everything a snapshot has to restore.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Journaled {
    accounts: BTreeMap<Address, Account>,
    refund: u64,
    logs: Vec<(Hash, LogEntry)>,
    access_addresses: BTreeSet<Address>,
    access_slots: BTreeSet<(Address, Hash)>,
}

/// A complete, unoptimized [`StateDb`] kept entirely in memory.
///
/// Snapshots clone the journaled state, which is fine for test-sized
/// worlds. [`state_root`](Self::state_root) hashes accounts and storage
/// in a fixed order, so two instances that went through equivalent calls
/// report the same root.
#[derive(Debug, Default)]
pub struct InMemoryStateDb {
    current: Journaled,
    committed: BTreeMap<(Address, Hash), Hash>,
    snapshots: Vec<Journaled>,
    preimages: HashMap<Hash, Vec<u8>>,
    tx_hash: Hash,
    code_hashes: Arc<CodeHashCache>,
    block: Option<u64>,
    transaction: Option<u32>,
}

impl InMemoryStateDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share a code hash cache with other instances.
    pub fn with_code_hash_cache(cache: Arc<CodeHashCache>) -> Self {
        Self {
            code_hashes: cache,
            ..Self::default()
        }
    }

    pub fn account(&self, addr: &Address) -> Option<&Account> {
        self.current.accounts.get(addr)
    }

    pub fn accounts(&self) -> &BTreeMap<Address, Account> {
        &self.current.accounts
    }

    pub fn current_block(&self) -> Option<u64> {
        self.block
    }

    pub fn current_transaction(&self) -> Option<u32> {
        self.transaction
    }

    pub fn preimage(&self, hash: &Hash) -> Option<&[u8]> {
        self.preimages.get(hash).map(Vec::as_slice)
    }

    /// Keccak-256 over every account and storage slot, in address order.
    pub fn state_root(&self) -> Hash {
        let mut buf = Vec::new();
        for (addr, account) in &self.current.accounts {
            buf.extend_from_slice(addr.as_bytes());
            for limb in account.balance.0.iter().rev() {
                buf.extend_from_slice(&limb.to_be_bytes());
            }
            buf.extend_from_slice(&account.nonce.to_be_bytes());
            buf.extend_from_slice(keccak256(&account.code).as_bytes());
            for (key, value) in &account.storage {
                buf.extend_from_slice(key.as_bytes());
                buf.extend_from_slice(value.as_bytes());
            }
        }
        keccak256(&buf)
    }

    fn account_mut(&mut self, addr: Address) -> &mut Account {
        self.current.accounts.entry(addr).or_default()
    }
}

impl StateDb for InMemoryStateDb {
    fn create_account(&mut self, addr: Address) {
        let balance = self.account(&addr).map(|a| a.balance).unwrap_or_default();
        self.current.accounts.insert(
            addr,
            Account {
                balance,
                ..Account::default()
            },
        );
    }

    fn exist(&mut self, addr: Address) -> bool {
        self.current.accounts.contains_key(&addr)
    }

    fn empty(&mut self, addr: Address) -> bool {
        self.account(&addr).is_none_or(Account::is_empty)
    }

    fn suicide(&mut self, addr: Address) -> bool {
        match self.current.accounts.get_mut(&addr) {
            Some(account) => {
                account.suicided = true;
                account.balance = U256::zero();
                true
            }
            None => false,
        }
    }

    fn has_suicided(&mut self, addr: Address) -> bool {
        self.account(&addr).is_some_and(|a| a.suicided)
    }

    fn get_balance(&mut self, addr: Address) -> U256 {
        self.account(&addr).map(|a| a.balance).unwrap_or_default()
    }

    fn add_balance(&mut self, addr: Address, amount: U256) {
        let account = self.account_mut(addr);
        account.balance = account.balance.saturating_add(amount);
    }

    fn sub_balance(&mut self, addr: Address, amount: U256) {
        let account = self.account_mut(addr);
        account.balance = account.balance.saturating_sub(amount);
    }

    fn get_nonce(&mut self, addr: Address) -> u64 {
        self.account(&addr).map(|a| a.nonce).unwrap_or_default()
    }

    fn set_nonce(&mut self, addr: Address, nonce: u64) {
        self.account_mut(addr).nonce = nonce;
    }

    fn get_code(&mut self, addr: Address) -> Vec<u8> {
        self.account(&addr).map(|a| a.code.clone()).unwrap_or_default()
    }

    fn set_code(&mut self, addr: Address, code: Vec<u8>) {
        self.account_mut(addr).code = code;
    }

    fn get_code_hash(&mut self, addr: Address) -> Hash {
        match self.current.accounts.get(&addr) {
            Some(account) => self.code_hashes.hash(&account.code),
            None => Hash::zero(),
        }
    }

    fn get_code_size(&mut self, addr: Address) -> usize {
        self.account(&addr).map_or(0, |a| a.code.len())
    }

    fn get_state(&mut self, addr: Address, key: Hash) -> Hash {
        self.account(&addr)
            .and_then(|a| a.storage.get(&key).copied())
            .unwrap_or_default()
    }

    fn set_state(&mut self, addr: Address, key: Hash, value: Hash) {
        let storage = &mut self.account_mut(addr).storage;
        if value.is_zero() {
            storage.remove(&key);
        } else {
            storage.insert(key, value);
        }
    }

    fn get_committed_state(&mut self, addr: Address, key: Hash) -> Hash {
        self.committed.get(&(addr, key)).copied().unwrap_or_default()
    }

    fn for_each_storage(&mut self, addr: Address, visit: &mut dyn FnMut(Hash, Hash) -> bool) {
        if let Some(account) = self.current.accounts.get(&addr) {
            for (key, value) in &account.storage {
                if !visit(*key, *value) {
                    break;
                }
            }
        }
    }

    fn snapshot(&mut self) -> i32 {
        self.snapshots.push(self.current.clone());
        (self.snapshots.len() - 1) as i32
    }

    fn revert_to_snapshot(&mut self, id: i32) {
        let Ok(id) = usize::try_from(id) else {
            return;
        };
        if id < self.snapshots.len() {
            self.snapshots.truncate(id + 1);
            if let Some(state) = self.snapshots.pop() {
                self.current = state;
            }
        }
    }

    fn begin_sync_period(&mut self, _number: u64) {}

    fn end_sync_period(&mut self) {}

    fn begin_block(&mut self, number: u64) {
        self.block = Some(number);
    }

    fn end_block(&mut self) {
        self.block = None;
    }

    fn begin_transaction(&mut self, number: u32) {
        self.transaction = Some(number);
        self.snapshots.clear();
    }

    fn end_transaction(&mut self) {
        self.transaction = None;
        self.snapshots.clear();
        self.current.refund = 0;
        self.current.access_addresses.clear();
        self.current.access_slots.clear();
    }

    fn finalise(&mut self, delete_empty_objects: bool) {
        self.current
            .accounts
            .retain(|_, a| !a.suicided && !(delete_empty_objects && a.is_empty()));
    }

    fn commit(&mut self, delete_empty_objects: bool) -> Hash {
        self.finalise(delete_empty_objects);
        self.committed.clear();
        for (addr, account) in &self.current.accounts {
            for (key, value) in &account.storage {
                self.committed.insert((*addr, *key), *value);
            }
        }
        self.state_root()
    }

    fn intermediate_root(&mut self, delete_empty_objects: bool) -> Hash {
        self.finalise(delete_empty_objects);
        self.state_root()
    }

    fn prepare(&mut self, tx_hash: Hash, _tx_index: i32) {
        self.tx_hash = tx_hash;
    }

    fn add_refund(&mut self, gas: u64) {
        self.current.refund = self.current.refund.saturating_add(gas);
    }

    fn sub_refund(&mut self, gas: u64) {
        self.current.refund = self.current.refund.saturating_sub(gas);
    }

    fn get_refund(&mut self) -> u64 {
        self.current.refund
    }

    fn prepare_access_list(&mut self, sender: Address, dest: Option<Address>) {
        self.current.access_addresses.clear();
        self.current.access_slots.clear();
        self.current.access_addresses.insert(sender);
        if let Some(dest) = dest {
            self.current.access_addresses.insert(dest);
        }
    }

    fn add_address_to_access_list(&mut self, addr: Address) {
        self.current.access_addresses.insert(addr);
    }

    fn address_in_access_list(&mut self, addr: Address) -> bool {
        self.current.access_addresses.contains(&addr)
    }

    fn add_slot_to_access_list(&mut self, addr: Address, slot: Hash) {
        self.current.access_addresses.insert(addr);
        self.current.access_slots.insert((addr, slot));
    }

    fn slot_in_access_list(&mut self, addr: Address, slot: Hash) -> (bool, bool) {
        (
            self.current.access_addresses.contains(&addr),
            self.current.access_slots.contains(&(addr, slot)),
        )
    }

    fn add_log(&mut self, log: LogEntry) {
        self.current.logs.push((self.tx_hash, log));
    }

    fn get_logs(&mut self, tx_hash: Hash, _block_hash: Hash) -> Vec<LogEntry> {
        self.current
            .logs
            .iter()
            .filter(|(tx, _)| *tx == tx_hash)
            .map(|(_, log)| log.clone())
            .collect()
    }

    fn add_preimage(&mut self, hash: Hash, preimage: Vec<u8>) {
        self.preimages.entry(hash).or_insert(preimage);
    }
}
