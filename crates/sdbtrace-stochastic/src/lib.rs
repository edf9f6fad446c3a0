//! Synthetic state-database traces from a Markov chain over operations.
//!
//! Generated traces are ordinary traces: they are encoded through the same
//! dictionaries as recorded ones, written with the same
//! [`TraceWriter`](sdbtrace_replay::TraceWriter) and replayed by the same
//! [`Replayer`](sdbtrace_replay::Replayer).
//!
//! # Architecture
//!
//! - [`TransitionMatrix`] holds the probability of each operation following
//!   each other operation
//! - [`StochasticGenerator`] decides per value kind whether an operand is new
//!   or a recency-biased reuse; [`Distributions`] bundles one per kind
//! - [`StateContext`] tracks nesting, snapshots and the dictionaries, and
//!   rejects operations that would be invalid in the current state
//! - [`Generator`] walks the chain, skipping infeasible successors
//! - [`SimulationModel`] is the JSON file format of a generator setup;
//!   [`EventRegistry`] estimates one from a recorded trace

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod distribution;
pub mod error;
pub mod generator;
pub mod matrix;
pub mod model;
pub mod registry;
pub mod state_context;

pub use config::GeneratorConfig;
pub use distribution::{
    exponential_rank, truncated_exponential, truncated_exponential_mean, Distributions,
    StochasticGenerator,
};
pub use error::GeneratorError;
pub use generator::{generate, Generator};
pub use matrix::{TransitionMatrix, ROW_SUM_TOLERANCE};
pub use model::{AccessStats, SimulationModel, UniformConfig, SIMULATION_FILE_ID};
pub use registry::{fit_lambda, EventRegistry};
pub use state_context::StateContext;
