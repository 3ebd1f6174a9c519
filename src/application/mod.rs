//! Application layer: Use cases and services.
//!
//! This module orchestrates domain logic with ports: bound contributions,
//! count exactly and under every budget, then reconcile.

pub mod aggregate;
pub mod normalize;
pub mod reconcile;
mod service;
pub mod sweep;

pub use normalize::{normalize, NormalizedEvents};
pub use reconcile::Reconciler;
pub use service::PopularityService;
pub use sweep::{BudgetFailure, CancellationToken, SweepController, SweepOutcome};
