//! Error types for recording, trace files and replay.

use std::io;
use std::path::PathBuf;

use sdbtrace_core::U256;
use sdbtrace_dict::DictError;

use crate::config::ConfigError;

/// Errors that can occur while writing, reading or replaying a trace.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// An I/O error occurred during read or write.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The dictionary layer rejected an encode or decode.
    #[error(transparent)]
    Dict(#[from] DictError),

    /// A session was opened from an invalid [`TraceConfig`](crate::TraceConfig).
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A record starts with a discriminant no operation uses.
    #[error("unknown operation discriminant {id}")]
    UnknownOperation {
        /// The unrecognized discriminant.
        id: u8,
    },

    /// A decoder produced an operation whose discriminant differs from the
    /// byte it was dispatched on.
    #[error("decoder for discriminant {expected} produced an operation with discriminant {found}")]
    DiscriminantMismatch {
        /// Discriminant read from the stream.
        expected: u8,
        /// Discriminant of the decoded operation.
        found: u8,
    },

    /// A record could not be decoded (truncated or corrupt data).
    #[error("malformed record: {detail}")]
    MalformedRecord {
        /// Human-readable description of what went wrong.
        detail: String,
    },

    /// A block was indexed twice in the same trace.
    #[error("block {block} is already indexed at offset {existing}")]
    DuplicateBlock {
        /// The repeated block number.
        block: u64,
        /// Offset recorded for its first occurrence.
        existing: u64,
    },

    /// A block lookup found no index entry.
    #[error("block {block} is not indexed")]
    MissingBlock {
        /// The requested block number.
        block: u64,
    },

    /// A block index file does not start with the expected magic number.
    #[error("invalid block index magic: expected {expected}, found {found}")]
    InvalidMagic {
        /// Expected magic number.
        expected: u64,
        /// Magic number found in the file.
        found: u64,
    },

    /// No trace file covers the requested block range.
    #[error("no trace files cover blocks {first}..={last}")]
    NoTraceFiles {
        /// First requested block.
        first: u64,
        /// Last requested block.
        last: u64,
    },

    /// Two trace files claim to start at the same block.
    #[error("trace files {} and {} both start at block {block}", .first.display(), .second.display())]
    DuplicateTraceStart {
        /// Shared first block.
        block: u64,
        /// One of the files.
        first: PathBuf,
        /// The other file.
        second: PathBuf,
    },

    /// The requested block range is empty.
    #[error("invalid block range {first}..={last}")]
    InvalidBlockRange {
        /// First requested block.
        first: u64,
        /// Last requested block.
        last: u64,
    },

    /// A balance amount is too large for the trace encoding.
    #[error("balance amount {value} does not fit in 128 bits")]
    AmountOverflow {
        /// The offending amount.
        value: U256,
    },
}
