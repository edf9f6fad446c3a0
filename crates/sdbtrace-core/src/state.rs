//! The state-database backend trait.

use crate::code_hash::keccak256;
use crate::types::{Address, Hash, LogEntry, U256};

/// A state database that traces can be recorded from and replayed into.
///
/// Every backend under test implements this trait. The recorder wraps one
/// implementation and forwards each call after logging it; the replayer
/// drives one implementation from a decoded trace.
///
/// Getters take `&mut self` because backends commonly update internal
/// caches on reads.
///
/// The first block of methods is the core surface every backend must
/// provide. The provided methods cover the extended surface (refunds,
/// access lists, logs, preimages, commit roots) with neutral defaults so
/// that minimal backends only implement what they actually model.
pub trait StateDb {
    // ── Accounts ────────────────────────────────────────────────

    /// Create (or reset) the account at `addr`.
    fn create_account(&mut self, addr: Address);

    /// Returns `true` if the account exists.
    fn exist(&mut self, addr: Address) -> bool;

    /// Returns `true` if the account is empty (zero nonce, balance and code).
    fn empty(&mut self, addr: Address) -> bool;

    /// Mark the account as self-destructed. Returns whether it existed.
    fn suicide(&mut self, addr: Address) -> bool;

    /// Returns `true` if the account self-destructed in this transaction.
    fn has_suicided(&mut self, addr: Address) -> bool;

    // ── Balance and nonce ───────────────────────────────────────

    /// Current balance of `addr`.
    fn get_balance(&mut self, addr: Address) -> U256;

    /// Credit `amount` to `addr`.
    fn add_balance(&mut self, addr: Address, amount: U256);

    /// Debit `amount` from `addr`.
    fn sub_balance(&mut self, addr: Address, amount: U256);

    /// Current nonce of `addr`.
    fn get_nonce(&mut self, addr: Address) -> u64;

    /// Overwrite the nonce of `addr`.
    fn set_nonce(&mut self, addr: Address, nonce: u64);

    // ── Code ────────────────────────────────────────────────────

    /// Contract code stored at `addr`. Empty for plain accounts.
    fn get_code(&mut self, addr: Address) -> Vec<u8>;

    /// Store `code` at `addr`.
    fn set_code(&mut self, addr: Address, code: Vec<u8>);

    /// Keccak-256 hash of the code at `addr`.
    fn get_code_hash(&mut self, addr: Address) -> Hash {
        keccak256(&self.get_code(addr))
    }

    /// Length of the code at `addr` in bytes.
    fn get_code_size(&mut self, addr: Address) -> usize {
        self.get_code(addr).len()
    }

    // ── Storage ─────────────────────────────────────────────────

    /// Current value of storage slot `key` of `addr`.
    fn get_state(&mut self, addr: Address, key: Hash) -> Hash;

    /// Write storage slot `key` of `addr`.
    fn set_state(&mut self, addr: Address, key: Hash, value: Hash);

    /// Value of storage slot `key` of `addr` as of the last commit.
    fn get_committed_state(&mut self, addr: Address, key: Hash) -> Hash;

    /// Visit every storage slot of `addr` until `visit` returns `false`.
    fn for_each_storage(&mut self, _addr: Address, _visit: &mut dyn FnMut(Hash, Hash) -> bool) {}

    // ── Snapshots ───────────────────────────────────────────────

    /// Take a snapshot of the current state and return its id.
    fn snapshot(&mut self) -> i32;

    /// Roll back all changes made after snapshot `id` was taken.
    fn revert_to_snapshot(&mut self, id: i32);

    // ── Boundaries ──────────────────────────────────────────────

    /// Start a sync period.
    fn begin_sync_period(&mut self, number: u64);

    /// End the current sync period.
    fn end_sync_period(&mut self);

    /// Start block `number`.
    fn begin_block(&mut self, number: u64);

    /// End the current block.
    fn end_block(&mut self);

    /// Start transaction `number` within the current block.
    fn begin_transaction(&mut self, number: u32);

    /// End the current transaction.
    fn end_transaction(&mut self);

    /// Finalise the current transaction's state changes.
    fn finalise(&mut self, delete_empty_objects: bool);

    /// Write pending changes and return the resulting state root.
    fn commit(&mut self, delete_empty_objects: bool) -> Hash {
        self.finalise(delete_empty_objects);
        Hash::zero()
    }

    /// Compute the state root of pending changes.
    fn intermediate_root(&mut self, delete_empty_objects: bool) -> Hash {
        self.finalise(delete_empty_objects);
        Hash::zero()
    }

    /// Release all resources held by the backend.
    fn close(&mut self) {}

    // ── Extended transaction context ────────────────────────────

    /// Set the hash and index of the transaction about to execute.
    fn prepare(&mut self, _tx_hash: Hash, _tx_index: i32) {}

    /// Add gas to the refund counter.
    fn add_refund(&mut self, _gas: u64) {}

    /// Remove gas from the refund counter.
    fn sub_refund(&mut self, _gas: u64) {}

    /// Current refund counter.
    fn get_refund(&mut self) -> u64 {
        0
    }

    /// Reset the access list for a new transaction.
    fn prepare_access_list(&mut self, _sender: Address, _dest: Option<Address>) {}

    /// Add `addr` to the access list.
    fn add_address_to_access_list(&mut self, _addr: Address) {}

    /// Returns `true` if `addr` is in the access list.
    fn address_in_access_list(&mut self, _addr: Address) -> bool {
        false
    }

    /// Add the (`addr`, `slot`) pair to the access list.
    fn add_slot_to_access_list(&mut self, _addr: Address, _slot: Hash) {}

    /// Returns whether `addr` and the (`addr`, `slot`) pair are in the access list.
    fn slot_in_access_list(&mut self, _addr: Address, _slot: Hash) -> (bool, bool) {
        (false, false)
    }

    /// Record a log emitted by the current transaction.
    fn add_log(&mut self, _log: LogEntry) {}

    /// Logs emitted by transaction `tx_hash` in block `block_hash`.
    fn get_logs(&mut self, _tx_hash: Hash, _block_hash: Hash) -> Vec<LogEntry> {
        Vec::new()
    }

    /// Record the preimage of `hash`.
    fn add_preimage(&mut self, _hash: Hash, _preimage: Vec<u8>) {}
}
