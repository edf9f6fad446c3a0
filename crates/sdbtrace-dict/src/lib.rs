//! Dictionary compression for state-database traces.
//!
//! Addresses, storage keys, values and code blobs are large and highly
//! repetitive in real traces. This crate replaces them with small dense
//! integers and tracks the little bit of per-block state that lets the
//! trace format drop repeated operands entirely.
//!
//! # Architecture
//!
//! - [`Dictionary`] is an append-only bijection between values and indices
//! - [`IndexCache`] keeps the recently used storage indices so that a
//!   repeated access can be encoded as a one-byte cache position
//! - [`SnapshotIndex`] maps snapshot ids from the recording to the ids a
//!   replay backend hands out
//! - [`DictionaryContext`] bundles all of the above and is the only type
//!   the codec talks to
//!
//! # Persistence
//!
//! ```text
//! contract-dictionary.dat  [MAGIC 4711 u64][20-byte address]...
//! storage-dictionary.dat   [MAGIC 4712 u64][32-byte key]...
//! value-dictionary.dat     [MAGIC 4713 u64][32-byte value]...
//! code-dictionary.dat      [MAGIC 4714 u64][u32 len][bytes]...
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod context;
pub mod dictionary;
pub mod error;
pub mod index_cache;
pub mod snapshot;

pub use context::{DictionaryContext, DictionaryLimits};
pub use dictionary::{Dictionary, DictionaryEntry, DictionaryKind};
pub use error::DictError;
pub use index_cache::{IndexCache, INDEX_CACHE_CAPACITY};
pub use snapshot::SnapshotIndex;
