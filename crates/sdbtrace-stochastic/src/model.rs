//! Simulation model files.
//!
//! A [`SimulationModel`] is the JSON form of everything the generator needs:
//! a transition matrix over operation labels and access statistics per value
//! kind. Models come from [`EventRegistry::estimate`](crate::EventRegistry::estimate)
//! or from [`SimulationModel::uniform`].
//!
//! # Format
//!
//! ```text
//! {
//!     "FileId": "simulation",
//!     "operations": ["AddBalance", "BeginBlock", ...],
//!     "stochasticMatrix": [[0.0, 1.0, ...], ...],
//!     "contractStats": { "n": 10, "exponentialParameter": 5.0, "newValueProbability": 0.1 },
//!     "keyStats": { ... },
//!     "valueStats": { ... },
//!     "codeStats": { ... },
//!     "snapshotLambda": 5.0
//! }
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use sdbtrace_replay::{OperationId, NUM_OPERATIONS};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::distribution::{Distributions, StochasticGenerator};
use crate::error::GeneratorError;
use crate::matrix::TransitionMatrix;

/// Value of the `FileId` field of every model file.
pub const SIMULATION_FILE_ID: &str = "simulation";

/// Access statistics of one value kind.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessStats {
    /// Distinct values to prime the dictionary with.
    #[serde(rename = "n")]
    pub population: u64,
    /// Recency bias of reuses.
    #[serde(rename = "exponentialParameter")]
    pub lambda: f64,
    /// Probability of a new value.
    #[serde(default = "default_new_value_probability")]
    pub new_value_probability: f64,
}

fn default_new_value_probability() -> f64 {
    0.1
}

impl AccessStats {
    fn code_default() -> Self {
        Distributions::default().code.into()
    }

    /// The generator these statistics describe.
    pub fn to_generator(&self) -> StochasticGenerator {
        StochasticGenerator {
            new_value_probability: self.new_value_probability,
            lambda: self.lambda,
            population: self.population,
        }
    }
}

impl From<StochasticGenerator> for AccessStats {
    fn from(g: StochasticGenerator) -> Self {
        Self {
            population: g.population,
            lambda: g.lambda,
            new_value_probability: g.new_value_probability,
        }
    }
}

/// A serialized generator setup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationModel {
    /// Always [`SIMULATION_FILE_ID`].
    #[serde(rename = "FileId")]
    pub file_id: String,
    /// Labels of the matrix rows and columns.
    pub operations: Vec<String>,
    /// Square matrix over `operations`.
    pub stochastic_matrix: Vec<Vec<f64>>,
    /// Contract address accesses.
    #[serde(rename = "contractStats")]
    pub contracts: AccessStats,
    /// Storage key accesses.
    #[serde(rename = "keyStats")]
    pub keys: AccessStats,
    /// Value accesses.
    #[serde(rename = "valueStats")]
    pub values: AccessStats,
    /// Code accesses.
    #[serde(rename = "codeStats", default = "AccessStats::code_default")]
    pub code: AccessStats,
    /// Recency bias of snapshot reverts.
    pub snapshot_lambda: f64,
}

impl SimulationModel {
    /// Describe `matrix` and `distributions` over every operation label.
    pub fn new(matrix: &TransitionMatrix, distributions: &Distributions) -> Self {
        Self {
            file_id: SIMULATION_FILE_ID.to_string(),
            operations: OperationId::ALL
                .iter()
                .map(|id| id.label().to_string())
                .collect(),
            stochastic_matrix: OperationId::ALL
                .iter()
                .map(|id| matrix.row(*id).to_vec())
                .collect(),
            contracts: distributions.contract.into(),
            keys: distributions.storage.into(),
            values: distributions.value.into(),
            code: distributions.code.into(),
            snapshot_lambda: distributions.snapshot_lambda,
        }
    }

    /// Check the file id, the labels and the matrix shape.
    pub fn validate(&self) -> Result<(), GeneratorError> {
        if self.file_id != SIMULATION_FILE_ID {
            return Err(invalid(format!(
                "file id {:?} is not {SIMULATION_FILE_ID:?}",
                self.file_id
            )));
        }
        let n = self.operations.len();
        if self.stochastic_matrix.len() != n
            || self.stochastic_matrix.iter().any(|row| row.len() != n)
        {
            return Err(invalid(format!("matrix is not {n} x {n}")));
        }
        self.ids()?;
        Ok(())
    }

    fn ids(&self) -> Result<Vec<OperationId>, GeneratorError> {
        let mut seen = [false; NUM_OPERATIONS];
        self.operations
            .iter()
            .map(|label| {
                let id = OperationId::from_label(label)
                    .ok_or_else(|| invalid(format!("unknown operation {label:?}")))?;
                if std::mem::replace(&mut seen[id.index()], true) {
                    return Err(invalid(format!("operation {label:?} listed twice")));
                }
                Ok(id)
            })
            .collect()
    }

    /// The dense transition matrix. Operations not listed are absorbing.
    pub fn to_matrix(&self) -> Result<TransitionMatrix, GeneratorError> {
        self.validate()?;
        let ids = self.ids()?;
        let mut rows = vec![[0.0; NUM_OPERATIONS]; NUM_OPERATIONS];
        for (from, row) in ids.iter().zip(&self.stochastic_matrix) {
            for (to, p) in ids.iter().zip(row) {
                rows[from.index()][to.index()] = *p;
            }
        }
        TransitionMatrix::from_rows(rows)
    }

    /// The access distributions.
    pub fn to_distributions(&self) -> Result<Distributions, GeneratorError> {
        let distributions = Distributions {
            contract: self.contracts.to_generator(),
            storage: self.keys.to_generator(),
            value: self.values.to_generator(),
            code: self.code.to_generator(),
            snapshot_lambda: self.snapshot_lambda,
        };
        distributions.validate()?;
        Ok(distributions)
    }

    /// Read and validate a model file.
    pub fn read_file(path: &Path) -> Result<Self, GeneratorError> {
        let model: Self = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        model.validate()?;
        info!(model = %path.display(), operations = model.operations.len(), "read simulation model");
        Ok(model)
    }

    /// Write the model as indented JSON.
    pub fn write_file(&self, path: &Path) -> Result<(), GeneratorError> {
        let mut w = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut w, self)?;
        w.flush()?;
        info!(model = %path.display(), "wrote simulation model");
        Ok(())
    }

    /// A structured model: sync periods of blocks of transactions of
    /// uniformly chosen operations.
    pub fn uniform(config: &UniformConfig) -> Result<Self, GeneratorError> {
        config.validate()?;
        let body: Vec<OperationId> = OperationId::ALL
            .into_iter()
            .filter(|id| !is_boundary(*id))
            .collect();
        let mut rows = vec![[0.0; NUM_OPERATIONS]; NUM_OPERATIONS];
        let mut set = |from: OperationId, to: OperationId, w: f64| {
            rows[from.index()][to.index()] = w;
        };
        use OperationId as Id;
        set(Id::BeginSyncPeriod, Id::BeginBlock, 1.0);
        set(Id::BeginBlock, Id::BeginTransaction, 1.0);
        set(Id::EndTransaction, Id::BeginTransaction, (config.block_length - 1) as f64);
        set(Id::EndTransaction, Id::EndBlock, 1.0);
        set(Id::EndBlock, Id::BeginBlock, (config.sync_period_length - 1) as f64);
        set(Id::EndBlock, Id::EndSyncPeriod, 1.0);
        set(Id::EndSyncPeriod, Id::BeginSyncPeriod, 1.0);
        let stay = (config.transaction_length - 1) as f64 / body.len() as f64;
        for &to in &body {
            set(Id::BeginTransaction, to, 1.0);
            for &from in &body {
                set(from, to, stay);
            }
        }
        for &from in &body {
            set(from, Id::EndTransaction, 1.0);
        }
        let matrix = TransitionMatrix::from_weights(rows)?;
        Ok(Self::new(&matrix, &config.distributions))
    }
}

/// Shape of a [`SimulationModel::uniform`] model. Lengths are means.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UniformConfig {
    /// Transactions per block. Default: 10.
    pub block_length: u64,
    /// Blocks per sync period. Default: 300.
    pub sync_period_length: u64,
    /// Operations per transaction. Default: 20.
    pub transaction_length: u64,
    /// Access distributions. Default: [`Distributions::default`].
    pub distributions: Distributions,
}

impl Default for UniformConfig {
    fn default() -> Self {
        Self {
            block_length: 10,
            sync_period_length: 300,
            transaction_length: 20,
            distributions: Distributions::default(),
        }
    }
}

impl UniformConfig {
    /// Reject zero lengths and invalid distributions.
    pub fn validate(&self) -> Result<(), GeneratorError> {
        if self.block_length == 0 || self.sync_period_length == 0 || self.transaction_length == 0
        {
            return Err(invalid("lengths must be at least 1".to_string()));
        }
        self.distributions.validate()
    }
}

fn is_boundary(id: OperationId) -> bool {
    use OperationId as Id;
    matches!(
        id,
        Id::BeginSyncPeriod
            | Id::EndSyncPeriod
            | Id::BeginBlock
            | Id::EndBlock
            | Id::BeginTransaction
            | Id::EndTransaction
            | Id::Close
    )
}

fn invalid(detail: String) -> GeneratorError {
    GeneratorError::InvalidModel { detail }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_model_nests_scopes() {
        let model = SimulationModel::uniform(&UniformConfig::default()).unwrap();
        let m = model.to_matrix().unwrap();
        use OperationId as Id;
        assert_eq!(m.get(Id::BeginBlock, Id::BeginTransaction), 1.0);
        assert_eq!(m.get(Id::EndSyncPeriod, Id::BeginSyncPeriod), 1.0);
        assert!((m.get(Id::EndTransaction, Id::EndBlock) - 0.1).abs() < 1e-12);
        assert_eq!(m.get(Id::GetState, Id::EndBlock), 0.0);
        assert!(m.get(Id::GetState, Id::EndTransaction) > 0.0);
        assert!(m.is_absorbing(Id::Close));
    }

    #[test]
    fn json_round_trip() {
        let model = SimulationModel::uniform(&UniformConfig::default()).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        assert!(json.contains("\"FileId\":\"simulation\""));
        assert!(json.contains("\"exponentialParameter\""));
        let back: SimulationModel = serde_json::from_str(&json).unwrap();
        assert_eq!(back.operations, model.operations);
        assert_eq!(back.contracts.population, model.contracts.population);
        for (a, b) in back.stochastic_matrix.iter().flatten().zip(model.stochastic_matrix.iter().flatten()) {
            assert!((a - b).abs() < 1e-12);
        }
        back.to_matrix().unwrap();
    }

    #[test]
    fn wrong_file_id_is_rejected() {
        let mut model = SimulationModel::uniform(&UniformConfig::default()).unwrap();
        model.file_id = "profile".to_string();
        assert!(matches!(
            model.validate(),
            Err(GeneratorError::InvalidModel { .. })
        ));
    }

    #[test]
    fn subset_of_labels_maps_onto_dense_matrix() {
        let model = SimulationModel {
            file_id: SIMULATION_FILE_ID.to_string(),
            operations: vec!["BeginBlock".to_string(), "EndBlock".to_string()],
            stochastic_matrix: vec![vec![0.0, 1.0], vec![1.0, 0.0]],
            contracts: Distributions::default().contract.into(),
            keys: Distributions::default().storage.into(),
            values: Distributions::default().value.into(),
            code: Distributions::default().code.into(),
            snapshot_lambda: 5.0,
        };
        let m = model.to_matrix().unwrap();
        assert_eq!(m.get(OperationId::BeginBlock, OperationId::EndBlock), 1.0);
        assert!(m.is_absorbing(OperationId::GetState));
    }

    #[test]
    fn unknown_and_duplicate_labels_are_rejected() {
        let mut model = SimulationModel::uniform(&UniformConfig::default()).unwrap();
        model.operations[0] = "Teleport".to_string();
        assert!(model.validate().is_err());
        model.operations[0] = model.operations[1].clone();
        assert!(model.validate().is_err());
    }

    #[test]
    fn missing_code_stats_use_defaults() {
        let model = SimulationModel::uniform(&UniformConfig::default()).unwrap();
        let mut value = serde_json::to_value(&model).unwrap();
        value.as_object_mut().unwrap().remove("codeStats");
        let back: SimulationModel = serde_json::from_value(value).unwrap();
        assert_eq!(back.code, AccessStats::code_default());
    }
}
