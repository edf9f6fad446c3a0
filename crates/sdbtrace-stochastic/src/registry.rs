//! Estimation of simulation models from recorded traces.

use sdbtrace_replay::{Operation, OperationId, TraceIterator, NUM_OPERATIONS};
use tracing::info;

use crate::distribution::{truncated_exponential_mean, Distributions, StochasticGenerator};
use crate::error::GeneratorError;
use crate::matrix::TransitionMatrix;
use crate::model::SimulationModel;

/// Search interval for fitted lambdas.
const LAMBDA_RANGE: (f64, f64) = (1e-6, 1e4);
const BISECTION_STEPS: usize = 100;

/// Fit the rate whose truncated exponential mean on `[0, 1)` is `mean`.
///
/// Means outside the reachable range clamp to the interval bounds.
pub fn fit_lambda(mean: f64) -> f64 {
    let (mut lo, mut hi) = LAMBDA_RANGE;
    if mean >= truncated_exponential_mean(lo) {
        return lo;
    }
    if mean <= truncated_exponential_mean(hi) {
        return hi;
    }
    // The mean decreases monotonically in lambda.
    for _ in 0..BISECTION_STEPS {
        let mid = 0.5 * (lo + hi);
        if truncated_exponential_mean(mid) > mean {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// New-versus-reuse statistics of one value kind.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct AccessCounter {
    population: u64,
    fresh: u64,
    reused: u64,
    rank_sum: f64,
}

impl AccessCounter {
    /// Dictionary indices are handed out in order, so an index at or past
    /// the population is a first access.
    fn observe(&mut self, index: u64) {
        if index >= self.population {
            self.population = index + 1;
            self.fresh += 1;
            return;
        }
        let k = self.population - 1 - index;
        self.rank_sum += (k as f64 + 0.5) / self.population as f64;
        self.reused += 1;
    }

    fn estimate(&self, fallback: StochasticGenerator) -> StochasticGenerator {
        let total = self.fresh + self.reused;
        let new_value_probability = if total == 0 {
            fallback.new_value_probability
        } else {
            self.fresh as f64 / total as f64
        };
        let lambda = if self.reused == 0 {
            fallback.lambda
        } else {
            fit_lambda(self.rank_sum / self.reused as f64)
        };
        StochasticGenerator {
            new_value_probability,
            lambda,
            population: self.population,
        }
    }
}

/// Counts transitions and accesses over a recorded operation stream.
#[derive(Clone, Debug)]
pub struct EventRegistry {
    transitions: Vec<[u64; NUM_OPERATIONS]>,
    previous: Option<OperationId>,
    contracts: AccessCounter,
    keys: AccessCounter,
    values: AccessCounter,
    code: AccessCounter,
    snapshots: Vec<i32>,
    revert_depth: AccessCounter,
    operations: u64,
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            transitions: vec![[0; NUM_OPERATIONS]; NUM_OPERATIONS],
            previous: None,
            contracts: AccessCounter::default(),
            keys: AccessCounter::default(),
            values: AccessCounter::default(),
            code: AccessCounter::default(),
            snapshots: Vec::new(),
            revert_depth: AccessCounter::default(),
            operations: 0,
        }
    }

    /// Operations observed so far.
    pub fn operations(&self) -> u64 {
        self.operations
    }

    /// Number of observed `from -> to` transitions.
    pub fn transitions(&self, from: OperationId, to: OperationId) -> u64 {
        self.transitions[from.index()][to.index()]
    }

    /// Account for one operation.
    pub fn observe(&mut self, op: &Operation) {
        let id = op.id();
        if let Some(previous) = self.previous {
            self.transitions[previous.index()][id.index()] += 1;
        }
        self.previous = Some(id);
        self.operations += 1;

        match op {
            Operation::AddBalance { contract, .. }
            | Operation::SubBalance { contract, .. }
            | Operation::CreateAccount { contract }
            | Operation::Empty { contract }
            | Operation::Exist { contract }
            | Operation::GetBalance { contract }
            | Operation::GetCodeHash { contract }
            | Operation::GetCode { contract }
            | Operation::GetCodeSize { contract }
            | Operation::GetNonce { contract }
            | Operation::HasSuicided { contract }
            | Operation::SetNonce { contract, .. }
            | Operation::Suicide { contract }
            | Operation::AddAddressToAccessList { contract }
            | Operation::AddressInAccessList { contract }
            | Operation::ForEachStorage { contract } => {
                self.contracts.observe(u64::from(*contract));
            }
            Operation::GetCommittedState { contract, storage }
            | Operation::GetState { contract, storage }
            | Operation::AddSlotToAccessList { contract, storage }
            | Operation::SlotInAccessList { contract, storage } => {
                self.contracts.observe(u64::from(*contract));
                self.keys.observe(u64::from(*storage));
            }
            Operation::SetState {
                contract,
                storage,
                value,
            } => {
                self.contracts.observe(u64::from(*contract));
                self.keys.observe(u64::from(*storage));
                self.values.observe(*value);
            }
            Operation::GetStateLc { storage } => self.keys.observe(u64::from(*storage)),
            Operation::SetStateLcls { value } => self.values.observe(*value),
            Operation::SetCode { contract, code } => {
                self.contracts.observe(u64::from(*contract));
                self.code.observe(u64::from(*code));
            }
            Operation::PrepareAccessList { sender, dest } => {
                self.contracts.observe(u64::from(*sender));
                if let Some(dest) = dest {
                    self.contracts.observe(u64::from(*dest));
                }
            }
            Operation::AddLog {
                contract, topics, ..
            } => {
                self.contracts.observe(u64::from(*contract));
                topics.iter().for_each(|t| self.values.observe(*t));
            }
            Operation::AddPreimage { hash, .. } => self.values.observe(*hash),
            Operation::GetLogs {
                tx_hash,
                block_hash,
            } => {
                self.values.observe(*tx_hash);
                self.values.observe(*block_hash);
            }
            Operation::Prepare { tx_hash, .. } => self.values.observe(*tx_hash),
            Operation::BeginTransaction { .. } | Operation::EndTransaction => {
                self.snapshots.clear();
            }
            Operation::Snapshot { snapshot } => self.snapshots.push(*snapshot),
            Operation::RevertToSnapshot { snapshot } => {
                if let Some(pos) = self.snapshots.iter().rposition(|s| s == snapshot) {
                    // Depth from the top of the open snapshots, as a reuse index.
                    self.revert_depth.population = self.snapshots.len() as u64;
                    self.revert_depth.observe(pos as u64);
                    self.snapshots.truncate(pos);
                }
            }
            _ => {}
        }
    }

    /// Observe every operation of a trace.
    pub fn observe_trace(&mut self, trace: &mut TraceIterator) -> Result<(), GeneratorError> {
        while trace.next()? {
            if let Some(op) = trace.value() {
                self.observe(op);
            }
        }
        info!(operations = self.operations, "estimated trace statistics");
        Ok(())
    }

    /// The transition matrix of the observed stream.
    pub fn matrix(&self) -> Result<TransitionMatrix, GeneratorError> {
        let rows = self
            .transitions
            .iter()
            .map(|row| {
                let mut weights = [0.0; NUM_OPERATIONS];
                for (w, n) in weights.iter_mut().zip(row) {
                    *w = *n as f64;
                }
                weights
            })
            .collect();
        TransitionMatrix::from_weights(rows)
    }

    /// The access distributions of the observed stream. Kinds never seen
    /// keep their defaults.
    pub fn distributions(&self) -> Distributions {
        let defaults = Distributions::default();
        let snapshot_lambda = if self.revert_depth.reused == 0 {
            defaults.snapshot_lambda
        } else {
            fit_lambda(self.revert_depth.rank_sum / self.revert_depth.reused as f64)
        };
        Distributions {
            contract: self.contracts.estimate(defaults.contract),
            storage: self.keys.estimate(defaults.storage),
            value: self.values.estimate(defaults.value),
            code: self.code.estimate(defaults.code),
            snapshot_lambda,
        }
    }

    /// Build a simulation model from everything observed.
    pub fn estimate(&self) -> Result<SimulationModel, GeneratorError> {
        Ok(SimulationModel::new(&self.matrix()?, &self.distributions()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fitted_lambda_reproduces_mean() {
        for lambda in [0.5, 1.0, 5.0, 42.0] {
            let fitted = fit_lambda(truncated_exponential_mean(lambda));
            assert!((fitted - lambda).abs() / lambda < 1e-6, "{fitted} vs {lambda}");
        }
        assert_eq!(fit_lambda(0.9), LAMBDA_RANGE.0);
        assert_eq!(fit_lambda(0.0), LAMBDA_RANGE.1);
    }

    #[test]
    fn counts_transitions() {
        let mut r = EventRegistry::new();
        for op in [
            Operation::BeginBlock { block: 1 },
            Operation::GetBalance { contract: 0 },
            Operation::GetBalance { contract: 0 },
            Operation::EndBlock,
        ] {
            r.observe(&op);
        }
        assert_eq!(r.operations(), 4);
        assert_eq!(r.transitions(OperationId::GetBalance, OperationId::GetBalance), 1);
        let m = r.matrix().unwrap();
        assert_eq!(m.get(OperationId::GetBalance, OperationId::EndBlock), 0.5);
        assert!(m.is_absorbing(OperationId::EndBlock));
    }

    #[test]
    fn new_value_probability_is_fresh_share() {
        let mut r = EventRegistry::new();
        for contract in [0, 1, 1, 1] {
            r.observe(&Operation::GetNonce { contract });
        }
        let d = r.distributions();
        assert_eq!(d.contract.population, 2);
        assert_eq!(d.contract.new_value_probability, 0.5);
        // Untouched kinds keep their defaults.
        assert_eq!(d.code, Distributions::default().code);
    }

    #[test]
    fn recent_reuse_gives_large_lambda() {
        let mut recent = EventRegistry::new();
        let mut spread = EventRegistry::new();
        for i in 0..100u32 {
            recent.observe(&Operation::GetNonce { contract: i });
            recent.observe(&Operation::GetNonce { contract: i });
            spread.observe(&Operation::GetNonce { contract: i });
            spread.observe(&Operation::GetNonce { contract: i / 2 });
        }
        assert!(recent.distributions().contract.lambda > spread.distributions().contract.lambda);
    }

    #[test]
    fn reverts_measure_snapshot_depth() {
        let mut r = EventRegistry::new();
        r.observe(&Operation::BeginTransaction { tx: 0 });
        for snapshot in 0..4 {
            r.observe(&Operation::Snapshot { snapshot });
        }
        r.observe(&Operation::RevertToSnapshot { snapshot: 3 });
        r.observe(&Operation::RevertToSnapshot { snapshot: 2 });
        // Unknown ids are ignored.
        r.observe(&Operation::RevertToSnapshot { snapshot: 9 });
        assert_eq!(r.revert_depth.reused, 2);
        assert!(r.distributions().snapshot_lambda > 1.0);
    }
}
