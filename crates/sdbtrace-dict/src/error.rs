//! Error types for the dictionary layer.

use std::io;

use crate::dictionary::DictionaryKind;

/// Errors raised while encoding, decoding or persisting dictionary state.
#[derive(Debug, thiserror::Error)]
pub enum DictError {
    /// An I/O error occurred while reading or writing a dictionary file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A dictionary file does not start with the expected magic number.
    #[error("invalid magic in {kind} dictionary: expected {expected}, found {found}")]
    InvalidMagic {
        /// Dictionary being read.
        kind: DictionaryKind,
        /// Magic number for this dictionary kind.
        expected: u64,
        /// Magic number found in the file.
        found: u64,
    },

    /// A dictionary file is truncated or its records are inconsistent.
    #[error("corrupted {kind} dictionary: {detail}")]
    Corrupted {
        /// Dictionary being read.
        kind: DictionaryKind,
        /// Human-readable description of what went wrong.
        detail: String,
    },

    /// A dictionary reached its configured entry limit.
    #[error("{kind} dictionary exhausted its capacity of {limit} entries")]
    CapacityExhausted {
        /// Dictionary that ran full.
        kind: DictionaryKind,
        /// Configured entry limit.
        limit: usize,
    },

    /// An index was decoded that the dictionary never handed out.
    #[error("{kind} index {index} out of range (dictionary holds {len} entries)")]
    IndexOutOfRange {
        /// Dictionary being decoded.
        kind: DictionaryKind,
        /// Offending index.
        index: u64,
        /// Number of entries in the dictionary.
        len: usize,
    },

    /// A storage cache position beyond the populated part of the cache.
    #[error("storage cache position {pos} out of range (cache holds {len} entries)")]
    CachePositionOutOfRange {
        /// Offending position.
        pos: u8,
        /// Number of populated cache slots.
        len: usize,
    },

    /// A recorded snapshot id was never registered in this transaction.
    #[error("snapshot {recorded} was not taken in the current transaction")]
    MissingSnapshot {
        /// Snapshot id from the recording.
        recorded: i32,
    },

    /// A delta-encoded operation referred to the previous contract before
    /// any contract was seen in the current block.
    #[error("previous contract is undefined")]
    UndefinedPreviousContract,
}
