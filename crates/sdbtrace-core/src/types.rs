//! Value types carried through the state-database interface.

use smallvec::SmallVec;

pub use ethereum_types::{Address, U256};

/// A 32-byte word: storage keys, storage values, code and block hashes.
pub type Hash = ethereum_types::H256;

/// Balance amounts as they travel through a trace.
///
/// Traces store amounts as 16 raw big-endian bytes, so every recorded
/// amount must fit in 128 bits.
pub type Amount = u128;

/// Log topics. Almost every log carries four or fewer.
pub type Topics = SmallVec<[Hash; 4]>;

/// An event log emitted by a contract.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogEntry {
    /// Emitting contract.
    pub address: Address,
    /// Indexed topics.
    pub topics: Topics,
    /// Unindexed payload.
    pub data: Vec<u8>,
}

/// Narrow a backend balance to a trace amount.
///
/// Returns `None` when the value does not fit in 128 bits.
pub fn amount_from_u256(value: U256) -> Option<Amount> {
    if value.bits() > 128 {
        return None;
    }
    Some(value.low_u128())
}

/// Widen a trace amount to a backend balance.
pub fn amount_to_u256(amount: Amount) -> U256 {
    U256::from(amount)
}

/// Deterministic address for a synthetic account index.
///
/// Index `n` maps to the address whose low 8 bytes are `n + 1` in
/// big-endian order, so index 0 never produces the zero address.
pub fn address_from_index(index: u64) -> Address {
    Address::from_low_u64_be(index.wrapping_add(1))
}

/// Deterministic 32-byte word for a synthetic key or value index.
pub fn hash_from_index(index: u64) -> Hash {
    Hash::from_low_u64_be(index)
}
