//! sdbtrace: record, replay and synthesize state-database operation traces.
//!
//! This is the facade crate that re-exports the public API of the sdbtrace
//! sub-crates. Adding `sdbtrace` as a single dependency is enough for most
//! users.
//!
//! # Quick start
//!
//! ```rust
//! use sdbtrace::prelude::*;
//! use sdbtrace::core::{address_from_index, hash_from_index};
//! use sdbtrace_test_utils::InMemoryStateDb;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("blocks-1.trace");
//!
//! // Record three blocks while running them against a backend.
//! let mut db = Recorder::new(InMemoryStateDb::new(), open_for_record(&path, 1).unwrap());
//! for block in 1..=3 {
//!     db.begin_block(block);
//!     db.set_state(address_from_index(1), hash_from_index(2), hash_from_index(block));
//!     db.end_block();
//! }
//! let (_, ctx, _) = db.finish().unwrap();
//!
//! // Replay only block 2 into a fresh backend.
//! let mut trace = open_for_replay(&[path], 2, 2).unwrap();
//! let mut fresh = InMemoryStateDb::new();
//! let summary = Replayer::new(ctx).run(&mut trace, &mut fresh).unwrap();
//! assert_eq!(summary.operations, 3);
//! assert_eq!(
//!     fresh.get_state(address_from_index(1), hash_from_index(2)),
//!     hash_from_index(2),
//! );
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`core`] | `sdbtrace-core` | Primitive types and the [`StateDb`](core::StateDb) trait |
//! | [`dict`] | `sdbtrace-dict` | Dictionaries, the storage index cache, snapshot mapping |
//! | [`replay`] | `sdbtrace-replay` | Operation codec, trace files, recorder and replayer |
//! | [`stochastic`] | `sdbtrace-stochastic` | Markov-chain trace generation and model estimation |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Primitive types and the state-database trait (`sdbtrace-core`).
pub use sdbtrace_core as core;

/// Dictionary compression layer (`sdbtrace-dict`).
///
/// Most users only touch [`dict::DictionaryContext`], to persist it after
/// recording and load it before replaying.
pub use sdbtrace_dict as dict;

/// Operation codec, trace files, recording and replay (`sdbtrace-replay`).
pub use sdbtrace_replay as replay;

/// Synthetic trace generation (`sdbtrace-stochastic`).
pub use sdbtrace_stochastic as stochastic;

/// Common imports for recording, replaying and generating traces.
///
/// ```rust
/// use sdbtrace::prelude::*;
/// ```
pub mod prelude {
    // Core
    pub use sdbtrace_core::{Address, Hash, StateDb, U256};

    // Dictionaries
    pub use sdbtrace_dict::{DictionaryContext, DictionaryLimits};

    // Traces
    pub use sdbtrace_replay::{
        open_for_record, open_for_replay, Operation, OperationId, ProfileStats, RecordSession,
        Recorder, ReplaySummary, Replayer, TraceConfig, TraceIterator, TraceWriter,
    };

    // Errors
    pub use sdbtrace_dict::DictError;
    pub use sdbtrace_replay::{ConfigError, TraceError};
    pub use sdbtrace_stochastic::GeneratorError;

    // Generation
    pub use sdbtrace_stochastic::{
        generate, Distributions, EventRegistry, Generator, GeneratorConfig, SimulationModel,
        TransitionMatrix,
    };
}
