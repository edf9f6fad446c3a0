//! Access distributions over contracts, storage keys, values and code.
//!
//! Each value kind draws indices from a [`StochasticGenerator`]: with some
//! probability a brand-new value, otherwise an already-seen one chosen with
//! an exponential bias towards the most recently introduced values.

use rand::Rng;

use crate::error::GeneratorError;

/// Draw `X` on `[0, 1)` from an exponential distribution with rate
/// `lambda` truncated to the unit interval.
pub fn truncated_exponential<R: Rng + ?Sized>(rng: &mut R, lambda: f64) -> f64 {
    let u: f64 = rng.gen();
    let x = (u * (-lambda).exp() - u + 1.0).ln() / -lambda;
    x.clamp(0.0, 1.0)
}

/// Mean of the exponential distribution with rate `lambda` truncated to
/// `[0, 1)`.
pub fn truncated_exponential_mean(lambda: f64) -> f64 {
    1.0 / lambda - 1.0 / lambda.exp_m1()
}

/// Rank `k` in `0..n` drawn from the truncated exponential scaled by `n`.
///
/// Rank 0 is the most likely.
pub fn exponential_rank<R: Rng + ?Sized>(rng: &mut R, lambda: f64, n: u64) -> u64 {
    let k = (n as f64 * truncated_exponential(rng, lambda)) as u64;
    k.min(n.saturating_sub(1))
}

/// New-versus-reuse index generator for one value kind.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StochasticGenerator {
    /// Probability of introducing a new value.
    pub new_value_probability: f64,
    /// Rate of the recency bias. Larger values favour recent values more.
    pub lambda: f64,
    /// Number of values introduced so far.
    pub population: u64,
}

impl StochasticGenerator {
    /// Create a generator, validating its parameters.
    pub fn new(
        new_value_probability: f64,
        lambda: f64,
        population: u64,
    ) -> Result<Self, GeneratorError> {
        let generator = Self {
            new_value_probability,
            lambda,
            population,
        };
        generator.validate()?;
        Ok(generator)
    }

    /// Check that the probability is in `[0, 1]` and lambda is positive.
    pub fn validate(&self) -> Result<(), GeneratorError> {
        if !(0.0..=1.0).contains(&self.new_value_probability) {
            return Err(GeneratorError::InvalidDistribution {
                detail: format!(
                    "new value probability {} outside [0, 1]",
                    self.new_value_probability
                ),
            });
        }
        if !self.lambda.is_finite() || self.lambda <= 0.0 {
            return Err(GeneratorError::InvalidDistribution {
                detail: format!("lambda {} must be finite and positive", self.lambda),
            });
        }
        Ok(())
    }

    /// Returns `true` if [`next_index`](Self::next_index) can produce anything.
    pub fn can_generate(&self) -> bool {
        self.population > 0 || self.new_value_probability > 0.0
    }

    /// Draw the next index.
    ///
    /// Returns `population` (a new value, growing the population) with
    /// probability `new_value_probability`, or always when the population
    /// is empty. Otherwise returns `population - 1 - k` for an
    /// exponentially distributed rank `k`.
    pub fn next_index<R: Rng + ?Sized>(&mut self, rng: &mut R) -> u64 {
        let fresh = self.population == 0 || rng.gen::<f64>() < self.new_value_probability;
        if fresh {
            self.population += 1;
            return self.population - 1;
        }
        let k = exponential_rank(rng, self.lambda, self.population);
        self.population - 1 - k
    }
}

/// Access generators for every value kind, plus the snapshot depth bias.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Distributions {
    /// Contract addresses.
    pub contract: StochasticGenerator,
    /// Storage keys.
    pub storage: StochasticGenerator,
    /// Storage values, topics and hashes.
    pub value: StochasticGenerator,
    /// Code blobs.
    pub code: StochasticGenerator,
    /// Recency bias when choosing which open snapshot to revert to.
    pub snapshot_lambda: f64,
}

impl Default for Distributions {
    fn default() -> Self {
        let balanced = StochasticGenerator {
            new_value_probability: 0.1,
            lambda: 5.0,
            population: 0,
        };
        Self {
            contract: balanced,
            storage: balanced,
            value: balanced,
            code: StochasticGenerator {
                new_value_probability: 0.5,
                ..balanced
            },
            snapshot_lambda: 5.0,
        }
    }
}

impl Distributions {
    /// Validate every generator and the snapshot lambda.
    pub fn validate(&self) -> Result<(), GeneratorError> {
        self.contract.validate()?;
        self.storage.validate()?;
        self.value.validate()?;
        self.code.validate()?;
        if !self.snapshot_lambda.is_finite() || self.snapshot_lambda <= 0.0 {
            return Err(GeneratorError::InvalidDistribution {
                detail: format!(
                    "snapshot lambda {} must be finite and positive",
                    self.snapshot_lambda
                ),
            });
        }
        Ok(())
    }
}
