//! Test utilities and mock backends for sdbtrace development.
//!
//! Provides [`MockStateDb`], which records every [`StateDb`] call it
//! receives, and [`InMemoryStateDb`], a small but complete reference
//! backend used to check that a recorded trace replays to the same state.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod memory;

pub use memory::{Account, InMemoryStateDb};

use sdbtrace_core::{Address, Hash, LogEntry, StateDb, U256};

/// One call received by a [`MockStateDb`], with its arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateCall {
    CreateAccount(Address),
    Exist(Address),
    Empty(Address),
    Suicide(Address),
    HasSuicided(Address),
    GetBalance(Address),
    AddBalance(Address, U256),
    SubBalance(Address, U256),
    GetNonce(Address),
    SetNonce(Address, u64),
    GetCode(Address),
    SetCode(Address, Vec<u8>),
    GetCodeHash(Address),
    GetCodeSize(Address),
    GetState(Address, Hash),
    SetState(Address, Hash, Hash),
    GetCommittedState(Address, Hash),
    ForEachStorage(Address),
    Snapshot,
    RevertToSnapshot(i32),
    BeginSyncPeriod(u64),
    EndSyncPeriod,
    BeginBlock(u64),
    EndBlock,
    BeginTransaction(u32),
    EndTransaction,
    Finalise(bool),
    Commit(bool),
    IntermediateRoot(bool),
    Close,
    Prepare(Hash, i32),
    AddRefund(u64),
    SubRefund(u64),
    GetRefund,
    PrepareAccessList(Address, Option<Address>),
    AddAddressToAccessList(Address),
    AddressInAccessList(Address),
    AddSlotToAccessList(Address, Hash),
    SlotInAccessList(Address, Hash),
    AddLog(LogEntry),
    GetLogs(Hash, Hash),
    AddPreimage(Hash, Vec<u8>),
}

/// A [`StateDb`] that records calls and answers with neutral values.
///
/// Snapshot ids are handed out as `base, base + 1, ...` so tests can tell
/// replay-side ids apart from recorded ones.
#[derive(Debug, Default)]
pub struct MockStateDb {
    calls: Vec<StateCall>,
    snapshot_base: i32,
    snapshots_taken: i32,
}

impl MockStateDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next snapshot id `base` (and count up from there).
    pub fn set_snapshot_base(&mut self, base: i32) {
        self.snapshot_base = base;
        self.snapshots_taken = 0;
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> &[StateCall] {
        &self.calls
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

impl StateDb for MockStateDb {
    fn create_account(&mut self, addr: Address) {
        self.calls.push(StateCall::CreateAccount(addr));
    }

    fn exist(&mut self, addr: Address) -> bool {
        self.calls.push(StateCall::Exist(addr));
        false
    }

    fn empty(&mut self, addr: Address) -> bool {
        self.calls.push(StateCall::Empty(addr));
        true
    }

    fn suicide(&mut self, addr: Address) -> bool {
        self.calls.push(StateCall::Suicide(addr));
        false
    }

    fn has_suicided(&mut self, addr: Address) -> bool {
        self.calls.push(StateCall::HasSuicided(addr));
        false
    }

    fn get_balance(&mut self, addr: Address) -> U256 {
        self.calls.push(StateCall::GetBalance(addr));
        U256::zero()
    }

    fn add_balance(&mut self, addr: Address, amount: U256) {
        self.calls.push(StateCall::AddBalance(addr, amount));
    }

    fn sub_balance(&mut self, addr: Address, amount: U256) {
        self.calls.push(StateCall::SubBalance(addr, amount));
    }

    fn get_nonce(&mut self, addr: Address) -> u64 {
        self.calls.push(StateCall::GetNonce(addr));
        0
    }

    fn set_nonce(&mut self, addr: Address, nonce: u64) {
        self.calls.push(StateCall::SetNonce(addr, nonce));
    }

    fn get_code(&mut self, addr: Address) -> Vec<u8> {
        self.calls.push(StateCall::GetCode(addr));
        Vec::new()
    }

    fn set_code(&mut self, addr: Address, code: Vec<u8>) {
        self.calls.push(StateCall::SetCode(addr, code));
    }

    fn get_code_hash(&mut self, addr: Address) -> Hash {
        self.calls.push(StateCall::GetCodeHash(addr));
        Hash::zero()
    }

    fn get_code_size(&mut self, addr: Address) -> usize {
        self.calls.push(StateCall::GetCodeSize(addr));
        0
    }

    fn get_state(&mut self, addr: Address, key: Hash) -> Hash {
        self.calls.push(StateCall::GetState(addr, key));
        Hash::zero()
    }

    fn set_state(&mut self, addr: Address, key: Hash, value: Hash) {
        self.calls.push(StateCall::SetState(addr, key, value));
    }

    fn get_committed_state(&mut self, addr: Address, key: Hash) -> Hash {
        self.calls.push(StateCall::GetCommittedState(addr, key));
        Hash::zero()
    }

    fn for_each_storage(&mut self, addr: Address, _visit: &mut dyn FnMut(Hash, Hash) -> bool) {
        self.calls.push(StateCall::ForEachStorage(addr));
    }

    fn snapshot(&mut self) -> i32 {
        self.calls.push(StateCall::Snapshot);
        let id = self.snapshot_base + self.snapshots_taken;
        self.snapshots_taken += 1;
        id
    }

    fn revert_to_snapshot(&mut self, id: i32) {
        self.calls.push(StateCall::RevertToSnapshot(id));
    }

    fn begin_sync_period(&mut self, number: u64) {
        self.calls.push(StateCall::BeginSyncPeriod(number));
    }

    fn end_sync_period(&mut self) {
        self.calls.push(StateCall::EndSyncPeriod);
    }

    fn begin_block(&mut self, number: u64) {
        self.calls.push(StateCall::BeginBlock(number));
    }

    fn end_block(&mut self) {
        self.calls.push(StateCall::EndBlock);
    }

    fn begin_transaction(&mut self, number: u32) {
        self.calls.push(StateCall::BeginTransaction(number));
    }

    fn end_transaction(&mut self) {
        self.calls.push(StateCall::EndTransaction);
    }

    fn finalise(&mut self, delete_empty_objects: bool) {
        self.calls.push(StateCall::Finalise(delete_empty_objects));
    }

    fn commit(&mut self, delete_empty_objects: bool) -> Hash {
        self.calls.push(StateCall::Commit(delete_empty_objects));
        Hash::zero()
    }

    fn intermediate_root(&mut self, delete_empty_objects: bool) -> Hash {
        self.calls.push(StateCall::IntermediateRoot(delete_empty_objects));
        Hash::zero()
    }

    fn close(&mut self) {
        self.calls.push(StateCall::Close);
    }

    fn prepare(&mut self, tx_hash: Hash, tx_index: i32) {
        self.calls.push(StateCall::Prepare(tx_hash, tx_index));
    }

    fn add_refund(&mut self, gas: u64) {
        self.calls.push(StateCall::AddRefund(gas));
    }

    fn sub_refund(&mut self, gas: u64) {
        self.calls.push(StateCall::SubRefund(gas));
    }

    fn get_refund(&mut self) -> u64 {
        self.calls.push(StateCall::GetRefund);
        0
    }

    fn prepare_access_list(&mut self, sender: Address, dest: Option<Address>) {
        self.calls.push(StateCall::PrepareAccessList(sender, dest));
    }

    fn add_address_to_access_list(&mut self, addr: Address) {
        self.calls.push(StateCall::AddAddressToAccessList(addr));
    }

    fn address_in_access_list(&mut self, addr: Address) -> bool {
        self.calls.push(StateCall::AddressInAccessList(addr));
        false
    }

    fn add_slot_to_access_list(&mut self, addr: Address, slot: Hash) {
        self.calls.push(StateCall::AddSlotToAccessList(addr, slot));
    }

    fn slot_in_access_list(&mut self, addr: Address, slot: Hash) -> (bool, bool) {
        self.calls.push(StateCall::SlotInAccessList(addr, slot));
        (false, false)
    }

    fn add_log(&mut self, log: LogEntry) {
        self.calls.push(StateCall::AddLog(log));
    }

    fn get_logs(&mut self, tx_hash: Hash, block_hash: Hash) -> Vec<LogEntry> {
        self.calls.push(StateCall::GetLogs(tx_hash, block_hash));
        Vec::new()
    }

    fn add_preimage(&mut self, hash: Hash, preimage: Vec<u8>) {
        self.calls.push(StateCall::AddPreimage(hash, preimage));
    }
}
