//! Markov-chain trace generation.

use rand::Rng;
use sdbtrace_dict::DictionaryContext;
use sdbtrace_replay::{Operation, OperationId, TraceWriter, NUM_OPERATIONS};
use tracing::{debug, info};

use crate::config::GeneratorConfig;
use crate::distribution::Distributions;
use crate::error::GeneratorError;
use crate::matrix::{row_sum, TransitionMatrix};
use crate::state_context::StateContext;

/// Produces a bounded stream of feasible operations.
///
/// The first operation is [`GeneratorConfig::initial_operation`]; every
/// later one is drawn from the current operation's matrix row, restricted
/// to operations feasible in the simulated state and renormalized.
pub struct Generator {
    state: StateContext,
    matrix: TransitionMatrix,
    current: Option<OperationId>,
    emitted: u64,
    length: u64,
    done: bool,
}

impl Generator {
    /// Create a generator of at most `length` operations.
    pub fn new(
        matrix: TransitionMatrix,
        distributions: Distributions,
        config: GeneratorConfig,
        length: u64,
    ) -> Result<Self, GeneratorError> {
        matrix.validate()?;
        let state = StateContext::new(distributions, config)?;
        Ok(Self::with_state(matrix, state, length))
    }

    /// Create a generator over a prepared [`StateContext`].
    pub fn with_state(matrix: TransitionMatrix, state: StateContext, length: u64) -> Self {
        Self {
            state,
            matrix,
            current: None,
            emitted: 0,
            length,
            done: false,
        }
    }

    /// The simulated state.
    pub fn state(&self) -> &StateContext {
        &self.state
    }

    /// The dictionaries operations are encoded against.
    pub fn context(&self) -> &DictionaryContext {
        self.state.context()
    }

    /// Take the dictionaries, e.g. to persist them for replay.
    pub fn into_context(self) -> DictionaryContext {
        self.state.into_context()
    }

    /// Operations emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// The most recently emitted operation kind.
    pub fn current(&self) -> Option<OperationId> {
        self.current
    }

    /// Draw the successor of `from` among currently feasible operations.
    pub fn next_operation(&mut self, from: OperationId) -> Result<OperationId, GeneratorError> {
        let row = self.matrix.row(from);
        let mut feasible = [0.0; NUM_OPERATIONS];
        for id in OperationId::ALL {
            if row[id.index()] > 0.0 && self.state.is_feasible(id) {
                feasible[id.index()] = row[id.index()];
            }
        }
        let total = row_sum(&feasible);
        if total <= 0.0 {
            return Err(GeneratorError::Exhausted { from });
        }

        let r = self.state.rng().gen::<f64>() * total;
        let mut sum = 0.0;
        let mut c = 0.0;
        let mut last = None;
        for id in OperationId::ALL {
            let p = feasible[id.index()];
            if p == 0.0 {
                continue;
            }
            let y = p - c;
            let t = sum + y;
            c = (t - sum) - y;
            sum = t;
            if r < sum {
                return Ok(id);
            }
            last = Some(id);
        }
        // Rounding left `r` just above the accumulated sum.
        last.ok_or(GeneratorError::Exhausted { from })
    }

    /// Generate the next operation, or `None` once `length` is reached.
    pub fn step(&mut self) -> Result<Option<Operation>, GeneratorError> {
        if self.done || self.emitted >= self.length {
            return Ok(None);
        }
        let id = match self.current {
            None => {
                let initial = self.state.config().initial_operation;
                if !self.state.is_feasible(initial) {
                    return Err(GeneratorError::Exhausted { from: initial });
                }
                initial
            }
            Some(from) => self.next_operation(from)?,
        };
        let op = self.state.synthesize(id)?;
        self.current = Some(id);
        self.emitted += 1;
        Ok(Some(op))
    }

    /// Generate the remaining operations into `writer`.
    ///
    /// Returns the number written.
    pub fn write_to(&mut self, writer: &mut TraceWriter) -> Result<u64, GeneratorError> {
        let start = self.emitted;
        while let Some(op) = self.step()? {
            writer.write_operation(&op)?;
        }
        let written = self.emitted - start;
        info!(
            operations = written,
            contracts = self.context().contract_count(),
            storage_keys = self.context().storage_count(),
            "generated trace"
        );
        Ok(written)
    }
}

impl Iterator for Generator {
    type Item = Result<Operation, GeneratorError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(op) => op.map(Ok),
            Err(e) => {
                debug!(error = %e, emitted = self.emitted, "generation stopped");
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Generate up to `length` operations with the default configuration.
pub fn generate(
    matrix: TransitionMatrix,
    distributions: Distributions,
    length: u64,
) -> Result<Generator, GeneratorError> {
    Generator::new(matrix, distributions, GeneratorConfig::default(), length)
}
