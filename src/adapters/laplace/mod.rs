//! Laplace adapter: Implementation of NoiseSourceFactory.
//!
//! Every budget gets its own ChaCha20 generator. In production each one is
//! seeded from the OS RNG; for reproducible runs the factory can instead
//! derive one ChaCha20 stream per budget from a master seed.
//!
//! # Ownership
//!
//! Sources are moved into the worker that computes their budget and are
//! never shared, so there is no lock around the generator.

use rand::distributions::Open01;
use rand::rngs::OsRng;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};

use crate::domain::PrivacyBudget;
use crate::ports::{DpError, NoiseSource, NoiseSourceFactory};

/// Laplace sampler over a ChaCha20 CSPRNG.
#[derive(Debug, Clone)]
pub struct ChaChaNoiseSource {
    rng: ChaCha20Rng,
}

impl ChaChaNoiseSource {
    fn new(rng: ChaCha20Rng) -> Self {
        Self { rng }
    }
}

/// Laplace(0, b) via inverse CDF of a uniform draw in (0, 1).
///
/// Both endpoints must be excluded: at 0 or 1 the log argument is 0.
fn laplace_inverse_cdf(u01: f64, scale: f64) -> f64 {
    let u = u01 - 0.5;
    let inner = 1.0 - 2.0 * u.abs();
    -scale * u.signum() * inner.ln()
}

impl NoiseSource for ChaChaNoiseSource {
    fn sample_laplace(&mut self, scale: f64) -> Result<f64, DpError> {
        // Open01 never yields a value closer than 2^-53 to either end, and
        // u01 - 0.5 is exact there.
        let u01: f64 = self.rng.sample(Open01);
        Ok(laplace_inverse_cdf(u01, scale))
    }
}

#[derive(Debug, Clone)]
enum Seeding {
    Entropy,
    Master([u8; 32]),
}

/// Factory handing out one independent [`ChaChaNoiseSource`] per budget.
#[derive(Debug, Clone)]
pub struct ChaChaNoiseFactory {
    seeding: Seeding,
}

impl ChaChaNoiseFactory {
    /// Seed every budget's generator from the operating system.
    #[must_use]
    pub fn new() -> Self {
        Self {
            seeding: Seeding::Entropy,
        }
    }

    /// Derive every budget's generator from `seed`.
    ///
    /// The same seed and budget always give the same stream; distinct
    /// budgets get distinct ChaCha20 stream ids.
    #[must_use]
    pub fn seeded(seed: [u8; 32]) -> Self {
        Self {
            seeding: Seeding::Master(seed),
        }
    }

    fn stream_id(budget: &PrivacyBudget) -> u64 {
        let digest = Sha256::digest(budget.key().as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(prefix)
    }
}

impl Default for ChaChaNoiseFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl NoiseSourceFactory for ChaChaNoiseFactory {
    type Source = ChaChaNoiseSource;

    fn source_for(&self, budget: &PrivacyBudget) -> Result<Self::Source, DpError> {
        let rng = match &self.seeding {
            Seeding::Entropy => ChaCha20Rng::from_rng(OsRng).map_err(|e| {
                tracing::error!("Could not seed noise generator for {budget}: {e}");
                DpError::RngUnavailable(e.to_string())
            })?,
            Seeding::Master(seed) => {
                let mut rng = ChaCha20Rng::from_seed(*seed);
                rng.set_stream(Self::stream_id(budget));
                rng
            }
        };
        Ok(ChaChaNoiseSource::new(rng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draws(source: &mut ChaChaNoiseSource, n: usize) -> Vec<f64> {
        (0..n)
            .map(|_| source.sample_laplace(1.0).expect("sample"))
            .collect()
    }

    #[test]
    fn test_laplace_noise() {
        let factory = ChaChaNoiseFactory::seeded([7u8; 32]);
        let mut source = factory
            .source_for(&PrivacyBudget::new(0.01, 0.0))
            .expect("source");

        let noisy = source
            .add_laplace_noise(100.0, 1, 0.01)
            .expect("DP noise should work");
        assert!(noisy.is_finite());
        assert_ne!(noisy, 100.0);
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        let mut source = ChaChaNoiseFactory::new()
            .source_for(&PrivacyBudget::new(1.0, 0.0))
            .expect("source");
        assert_eq!(
            source.add_laplace_noise(1.0, 1, 0.0),
            Err(DpError::InvalidEpsilon(0.0))
        );
        assert_eq!(
            source.add_laplace_noise(1.0, 0, 1.0),
            Err(DpError::InvalidSensitivity(0))
        );
    }

    #[test]
    fn test_seeded_is_reproducible_per_budget() {
        let budget = PrivacyBudget::new(0.5, 0.01);
        let a = ChaChaNoiseFactory::seeded([1u8; 32]);
        let b = ChaChaNoiseFactory::seeded([1u8; 32]);
        let mut sa = a.source_for(&budget).expect("source");
        let mut sb = b.source_for(&budget).expect("source");
        assert_eq!(draws(&mut sa, 16), draws(&mut sb, 16));
    }

    #[test]
    fn test_budgets_get_independent_streams() {
        let factory = ChaChaNoiseFactory::seeded([3u8; 32]);
        let mut first = factory
            .source_for(&PrivacyBudget::new(1.0, 0.1))
            .expect("source");
        let mut second = factory
            .source_for(&PrivacyBudget::new(1.0, 0.5))
            .expect("source");
        assert_ne!(draws(&mut first, 16), draws(&mut second, 16));
    }

    #[test]
    fn test_entropy_sources_differ() {
        let factory = ChaChaNoiseFactory::new();
        let budget = PrivacyBudget::new(1.0, 0.0);
        let mut first = factory.source_for(&budget).expect("source");
        let mut second = factory.source_for(&budget).expect("source");
        assert_ne!(draws(&mut first, 16), draws(&mut second, 16));
    }

    #[test]
    fn test_extreme_uniform_draws_stay_finite() {
        // Smallest and largest values Open01 can produce.
        let lowest = f64::EPSILON / 2.0;
        let highest = 1.0 - f64::EPSILON / 2.0;
        let low = laplace_inverse_cdf(lowest, 1.0);
        let high = laplace_inverse_cdf(highest, 1.0);
        assert!(low.is_finite() && low < -30.0, "{low}");
        assert!(high.is_finite() && high > 30.0, "{high}");
        assert_eq!(laplace_inverse_cdf(0.5, 1.0), 0.0);
    }

    #[test]
    fn test_mean_absolute_deviation_matches_scale() {
        // E|X| = b for X ~ Laplace(0, b).
        let mut source = ChaChaNoiseFactory::seeded([11u8; 32])
            .source_for(&PrivacyBudget::new(0.5, 0.0))
            .expect("source");
        let n = 50_000;
        let scale = 2.0;
        let total: f64 = (0..n)
            .map(|_| source.sample_laplace(scale).expect("sample").abs())
            .sum();
        let mad = total / n as f64;
        assert!((mad - scale).abs() < 0.1, "mean |x| = {mad}");
    }
}
