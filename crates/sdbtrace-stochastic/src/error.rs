//! Error types for trace generation and model estimation.

use std::io;

use sdbtrace_dict::DictError;
use sdbtrace_replay::{OperationId, TraceError};

/// Errors that can occur while generating a synthetic trace.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    /// Every successor of the current operation is infeasible.
    #[error("no feasible successor of {from}")]
    Exhausted {
        /// The operation generation got stuck on.
        from: OperationId,
    },

    /// A transition matrix is malformed.
    #[error("invalid transition matrix: {detail}")]
    InvalidMatrix {
        /// What is wrong with it.
        detail: String,
    },

    /// An access distribution has out-of-range parameters.
    #[error("invalid distribution: {detail}")]
    InvalidDistribution {
        /// What is wrong with it.
        detail: String,
    },

    /// A simulation model file is inconsistent.
    #[error("invalid simulation model: {detail}")]
    InvalidModel {
        /// What is wrong with it.
        detail: String,
    },

    /// A transaction number does not fit the signed index `Prepare` carries.
    #[error("transaction {tx} does not fit in a Prepare transaction index")]
    TransactionIndexOverflow {
        /// The transaction number.
        tx: u32,
    },

    /// Writing the generated trace failed.
    #[error(transparent)]
    Trace(#[from] TraceError),

    /// The dictionary layer rejected an encode or decode.
    #[error(transparent)]
    Dict(#[from] DictError),

    /// A simulation model could not be (de)serialized.
    #[error("simulation model JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred while reading or writing a model.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
