//! # dpviews
//!
//! Exact and differentially private popularity counts for a catalog of
//! items visited by users on a given day.
//!
//! This crate provides:
//! - Per-user contribution bounding of visit events
//! - Exact grouped counts and Laplace-noised counts under a grid of
//!   (epsilon, delta) budgets, computed concurrently
//! - Utility diagnostics (belief bound, suppression threshold)
//! - A reconciled report joining exact and noised ranks
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture:
//! - `domain`: Core value types and diagnostic formulas
//! - `ports`: Trait definitions for event sources and noise generation
//! - `adapters`: Concrete implementations (ChaCha20 Laplace, SQLite, in-memory)
//! - `application`: Normalization, aggregation, sweep and reconciliation
//! - `config`: Sweep parameters and validation

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

pub use application::{CancellationToken, PopularityService};
pub use config::{RetentionPolicy, SweepConfig, ValidatedConfig};
pub use domain::{Event, PrivacyBudget, Report, Scope};

use ports::DpError;

/// Result type for dpviews operations
pub type Result<T> = std::result::Result<T, DpViewsError>;

/// Main error type for dpviews
#[derive(Debug, thiserror::Error)]
pub enum DpViewsError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("No events for scope {scope} after normalization")]
    EmptyInput { scope: String },

    #[error("Noise generation failed for budget {budget}: {source}")]
    NoiseGenerationFailure {
        budget: String,
        #[source]
        source: DpError,
    },

    #[error("Budget {budget} failed: {source}")]
    PartialBudgetFailure {
        budget: String,
        #[source]
        source: DpError,
    },

    #[error("Item {item_id:?} under budget {budget} has no exact count")]
    ReconciliationContractViolation { item_id: String, budget: String },

    #[error("Sweep cancelled: {completed} budgets completed, {skipped} skipped")]
    Cancelled {
        completed: usize,
        skipped: usize,
        /// Report over everything that finished before cancellation.
        partial: Box<Report>,
    },

    #[error("Storage operation failed: {0}")]
    Storage(#[from] adapters::StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<std::convert::Infallible> for DpViewsError {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}
