//! Generator configuration.

use sdbtrace_replay::OperationId;

use crate::error::GeneratorError;

/// Settings for a [`Generator`](crate::Generator) run.
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratorConfig {
    /// RNG seed. Equal seeds produce equal traces. Default: 0.
    pub seed: u64,
    /// Operation emitted first. Default: `BeginSyncPeriod`.
    pub initial_operation: OperationId,
    /// Number of the first generated block. Default: 1.
    pub first_block: u64,
    /// Number of the first generated sync period. Default: 1.
    pub first_sync_period: u64,
    /// Largest generated code blob in bytes. Default: 256.
    pub max_code_size: usize,
    /// Balance changes are drawn from `0..balance_range`. Default: 100 000.
    pub balance_range: u64,
    /// Nonces are drawn from `0..nonce_range`. Default: 1 000 000.
    pub nonce_range: u64,
    /// Refund changes are drawn from `0..refund_range`. Default: 50 000.
    pub refund_range: u64,
    /// Largest generated log payload in bytes. Default: 64.
    pub max_log_data: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            initial_operation: OperationId::BeginSyncPeriod,
            first_block: 1,
            first_sync_period: 1,
            max_code_size: 256,
            balance_range: 100_000,
            nonce_range: 1_000_000,
            refund_range: 50_000,
            max_log_data: 64,
        }
    }
}

impl GeneratorConfig {
    /// Reject ranges nothing can be drawn from.
    pub fn validate(&self) -> Result<(), GeneratorError> {
        let ranges = [
            ("balance", self.balance_range),
            ("nonce", self.nonce_range),
            ("refund", self.refund_range),
        ];
        for (name, range) in ranges {
            if range == 0 {
                return Err(GeneratorError::InvalidDistribution {
                    detail: format!("{name} range must be non-zero"),
                });
            }
        }
        Ok(())
    }
}
