//! Core types and traits for sdbtrace.
//!
//! This crate defines the vocabulary shared by the recorder, the replayer
//! and the stochastic generator: the 20-byte [`Address`] and 32-byte
//! [`Hash`] value types, the [`StateDb`] backend trait that every
//! state-database implementation plugs in through, and the small helpers
//! that derive values from code (see [`code_hash`]).

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod code_hash;
pub mod state;
pub mod types;

pub use code_hash::{keccak256, CodeHashCache, DEFAULT_CODE_HASH_CAPACITY};
pub use state::StateDb;
pub use types::{
    address_from_index, amount_from_u256, amount_to_u256, hash_from_index, Address, Amount, Hash,
    LogEntry, Topics, U256,
};
