//! Dense operation-to-operation transition matrix.

use sdbtrace_replay::{OperationId, NUM_OPERATIONS};

use crate::error::GeneratorError;

/// Tolerance on row sums.
pub const ROW_SUM_TOLERANCE: f64 = 1e-6;

/// `T[from][to]`: probability that operation `to` follows `from`.
///
/// Every row is either a probability distribution or all zero. An all-zero
/// row makes its operation absorbing: nothing can follow it.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionMatrix {
    rows: Vec<[f64; NUM_OPERATIONS]>,
}

impl TransitionMatrix {
    /// A matrix in which every operation is absorbing.
    pub fn zeros() -> Self {
        Self {
            rows: vec![[0.0; NUM_OPERATIONS]; NUM_OPERATIONS],
        }
    }

    /// Build from dense rows, validating them.
    pub fn from_rows(rows: Vec<[f64; NUM_OPERATIONS]>) -> Result<Self, GeneratorError> {
        if rows.len() != NUM_OPERATIONS {
            return Err(GeneratorError::InvalidMatrix {
                detail: format!("expected {NUM_OPERATIONS} rows, got {}", rows.len()),
            });
        }
        let matrix = Self { rows };
        matrix.validate()?;
        Ok(matrix)
    }

    /// Build from unnormalized weights, scaling each non-zero row to sum 1.
    pub fn from_weights(mut rows: Vec<[f64; NUM_OPERATIONS]>) -> Result<Self, GeneratorError> {
        for row in &mut rows {
            let total: f64 = row.iter().sum();
            if total > 0.0 {
                row.iter_mut().for_each(|p| *p /= total);
            }
        }
        Self::from_rows(rows)
    }

    /// A matrix whose only transition is `from -> to` with probability 1.
    pub fn one_hot(from: OperationId, to: OperationId) -> Self {
        let mut matrix = Self::zeros();
        matrix.rows[from.index()][to.index()] = 1.0;
        matrix
    }

    /// Check that every entry is finite in `[0, 1]` and every row sums to
    /// 1 or 0.
    pub fn validate(&self) -> Result<(), GeneratorError> {
        for (from, row) in OperationId::ALL.iter().zip(&self.rows) {
            if let Some(p) = row.iter().find(|p| !p.is_finite() || **p < 0.0 || **p > 1.0) {
                return Err(GeneratorError::InvalidMatrix {
                    detail: format!("row {from} has entry {p} outside [0, 1]"),
                });
            }
            let sum = row_sum(row);
            if sum != 0.0 && (sum - 1.0).abs() > ROW_SUM_TOLERANCE {
                return Err(GeneratorError::InvalidMatrix {
                    detail: format!("row {from} sums to {sum}"),
                });
            }
        }
        Ok(())
    }

    /// Transition probabilities out of `from`.
    pub fn row(&self, from: OperationId) -> &[f64; NUM_OPERATIONS] {
        &self.rows[from.index()]
    }

    /// Probability of `from -> to`.
    pub fn get(&self, from: OperationId, to: OperationId) -> f64 {
        self.rows[from.index()][to.index()]
    }

    /// Returns `true` if no operation can follow `from`.
    pub fn is_absorbing(&self, from: OperationId) -> bool {
        self.rows[from.index()].iter().all(|p| *p == 0.0)
    }
}

/// Compensated sum of a row.
pub(crate) fn row_sum(row: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut c = 0.0;
    for p in row {
        let y = p - c;
        let t = sum + y;
        c = (t - sum) - y;
        sum = t;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_rows_that_do_not_sum_to_one() {
        let mut rows = vec![[0.0; NUM_OPERATIONS]; NUM_OPERATIONS];
        rows[0][1] = 0.5;
        assert!(matches!(
            TransitionMatrix::from_rows(rows),
            Err(GeneratorError::InvalidMatrix { .. })
        ));
    }

    #[test]
    fn rejects_negative_entries() {
        let mut rows = vec![[0.0; NUM_OPERATIONS]; NUM_OPERATIONS];
        rows[3][0] = 1.5;
        rows[3][1] = -0.5;
        assert!(TransitionMatrix::from_rows(rows).is_err());
    }

    #[test]
    fn weights_are_normalized() {
        let mut rows = vec![[0.0; NUM_OPERATIONS]; NUM_OPERATIONS];
        rows[OperationId::EndBlock.index()][OperationId::BeginBlock.index()] = 3.0;
        rows[OperationId::EndBlock.index()][OperationId::EndSyncPeriod.index()] = 1.0;
        let m = TransitionMatrix::from_weights(rows).unwrap();
        assert_eq!(m.get(OperationId::EndBlock, OperationId::BeginBlock), 0.75);
        assert!(m.is_absorbing(OperationId::Close));
        assert!(!m.is_absorbing(OperationId::EndBlock));
    }

    #[test]
    fn one_hot_is_valid() {
        let m = TransitionMatrix::one_hot(OperationId::GetState, OperationId::SetState);
        m.validate().unwrap();
        assert_eq!(m.get(OperationId::GetState, OperationId::SetState), 1.0);
    }

    #[test]
    fn wrong_row_count_is_rejected() {
        assert!(TransitionMatrix::from_rows(vec![[0.0; NUM_OPERATIONS]; 3]).is_err());
    }
}
