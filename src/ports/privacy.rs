//! Differential Privacy port: Traits for per-budget noise generation.
//!
//! The sweep asks a factory for one fresh source per budget, so no two
//! budgets ever draw from the same random stream.

use crate::domain::PrivacyBudget;

/// Errors that can occur while producing a noised value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DpError {
    #[error("Invalid epsilon: {0}")]
    InvalidEpsilon(f64),

    #[error("Invalid sensitivity: {0}")]
    InvalidSensitivity(i64),

    #[error("DP RNG unavailable: {0}")]
    RngUnavailable(String),

    #[error("Budget computation panicked: {0}")]
    Panicked(String),
}

/// A source of Laplace noise owned by a single budget computation.
pub trait NoiseSource: Send {
    /// Draw one sample from `Laplace(0, scale)`.
    ///
    /// # Errors
    /// Returns error if the underlying generator cannot produce a sample.
    fn sample_laplace(&mut self, scale: f64) -> Result<f64, DpError>;

    /// Add Laplacian noise to a single value.
    ///
    /// # Arguments
    /// * `value` - The true value to protect
    /// * `sensitivity` - Maximum change from one user's data
    /// * `epsilon` - Privacy budget for this release
    ///
    /// # Errors
    /// Returns error for non-positive epsilon or sensitivity.
    fn add_laplace_noise(&mut self, value: f64, sensitivity: i64, epsilon: f64) -> Result<f64, DpError> {
        if !epsilon.is_finite() || epsilon <= 0.0 {
            tracing::error!("Invalid epsilon: {epsilon}. Refusing to release statistic.");
            return Err(DpError::InvalidEpsilon(epsilon));
        }
        if sensitivity <= 0 {
            tracing::error!("Invalid sensitivity: {sensitivity}. Refusing to release statistic.");
            return Err(DpError::InvalidSensitivity(sensitivity));
        }

        let scale = sensitivity as f64 / epsilon;
        Ok(value + self.sample_laplace(scale)?)
    }
}

/// Hands out independent noise sources, one per budget.
pub trait NoiseSourceFactory: Send + Sync {
    type Source: NoiseSource;

    /// Create the source for `budget`.
    ///
    /// # Errors
    /// Returns `DpError::RngUnavailable` if no randomness can be obtained.
    fn source_for(&self, budget: &PrivacyBudget) -> Result<Self::Source, DpError>;
}
