//! Recording and replaying state-database operation traces.
//!
//! A trace is the complete sequence of calls a block processor made against
//! its state database, stored compactly enough to keep millions of blocks
//! on disk and replay any range of them against another backend.
//!
//! # Architecture
//!
//! - [`Operation`] is the closed set of 48 recordable calls, each with a
//!   stable one-byte discriminant and a fixed payload layout
//! - [`Recorder`] wraps a [`StateDb`](sdbtrace_core::StateDb) and records
//!   every call through a [`RecordSession`], choosing delta-encoded forms
//!   for repeated storage accesses
//! - [`TraceWriter`] and [`TraceFile`] are the zstd-compressed file layer;
//!   [`BlockIndex`] makes traces seekable by block number
//! - [`TraceIterator`] yields the operations of a block range across any
//!   number of trace files
//! - [`Replayer`] executes operations against a backend, optionally
//!   profiling each call with [`ProfileStats`]
//!
//! # Format
//!
//! ```text
//! <trace>      zstd( [first block u64 LE] [id u8][payload] [id u8][payload] ... )
//! <trace>.idx  [MAGIC 4715 u64] [block u64][offset u64] ...
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod block_index;
pub mod codec;
pub mod config;
pub mod error;
pub mod execute;
pub mod operation;
pub mod profile;
pub mod reader;
pub mod recorder;
pub mod replay;
pub mod trace_file;
pub mod writer;

use std::path::{Path, PathBuf};

pub use block_index::{BlockIndex, BLOCK_INDEX_MAGIC};
pub use config::{ConfigError, TraceConfig};
pub use error::TraceError;
pub use operation::{Operation, OperationId, TopicIndices, NUM_OPERATIONS};
pub use profile::ProfileStats;
pub use reader::{Operations, TraceIterator};
pub use recorder::{RecordSession, Recorder};
pub use replay::{ReplaySummary, Replayer};
pub use trace_file::{select_trace_files, trace_files_in_dir, TraceFile};
pub use writer::TraceWriter;

/// Start recording a new trace at `path` whose first block is `first_block`.
pub fn open_for_record(path: &Path, first_block: u64) -> Result<RecordSession, TraceError> {
    RecordSession::create(path, first_block)
}

/// Open blocks `first..=last` of the traces at `paths` for replay.
pub fn open_for_replay(
    paths: &[PathBuf],
    first: u64,
    last: u64,
) -> Result<TraceIterator, TraceError> {
    TraceIterator::open(paths, first, last)
}
