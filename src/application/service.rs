//! Popularity service: one scope in, one reconciled report out.

use std::sync::Arc;

use super::normalize::normalize;
use super::reconcile::Reconciler;
use super::sweep::{CancellationToken, SweepController};
use crate::config::{SweepConfig, ValidatedConfig};
use crate::domain::{BudgetSummary, Event, Report, Scope};
use crate::ports::{EventSource, NoiseSourceFactory};
use crate::{DpViewsError, Result};

/// Service computing exact and private popularity for a scope.
pub struct PopularityService<S, F>
where
    S: EventSource,
    F: NoiseSourceFactory,
{
    source: Arc<S>,
    factory: Arc<F>,
    config: ValidatedConfig,
}

impl<S, F> PopularityService<S, F>
where
    S: EventSource,
    S::Error: Into<DpViewsError>,
    F: NoiseSourceFactory,
{
    /// Create a new popularity service.
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` if `config` is rejected. No events are
    /// read in that case.
    pub fn new(source: Arc<S>, factory: Arc<F>, config: &SweepConfig) -> Result<Self> {
        Ok(Self {
            source,
            factory,
            config: config.validate()?,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    /// Load the scope's events and build its report.
    ///
    /// # Errors
    /// Returns error if the event source fails.
    pub fn run(&self, scope: &Scope) -> Result<Report> {
        self.run_with_cancel(scope, &CancellationToken::new())
    }

    /// Same as [`run`](Self::run), stopping early once `cancel` fires.
    ///
    /// # Errors
    /// Returns error if the event source fails, or `Cancelled` carrying the
    /// partial report if some budgets were never started.
    pub fn run_with_cancel(&self, scope: &Scope, cancel: &CancellationToken) -> Result<Report> {
        let events = self.source.load_events(scope).map_err(Into::into)?;
        self.report_for_events(scope, events, cancel)
    }

    /// Build the report for events already in hand.
    ///
    /// Events dated outside the scope's day are dropped. Budgets that fail
    /// are listed in `failed_budgets` and leave no entry in any item's
    /// `per_budget`.
    ///
    /// # Errors
    /// Returns `Cancelled` carrying the partial report if some budgets were
    /// never started.
    pub fn report_for_events(
        &self,
        scope: &Scope,
        events: Vec<Event>,
        cancel: &CancellationToken,
    ) -> Result<Report> {
        let total = events.len();
        let events: Vec<Event> = events.into_iter().filter(|e| e.day == scope.day).collect();
        if events.len() < total {
            tracing::warn!(
                "Discarded {} events dated outside {scope}",
                total - events.len()
            );
        }

        let normalized = normalize(&events, self.config.retention);
        let summaries: Vec<BudgetSummary> = self
            .config
            .budgets
            .iter()
            .map(|&b| {
                BudgetSummary::new(b, self.config.sensitivity, self.config.alpha, self.config.prop_within)
            })
            .collect();

        let empty_input = normalized.is_empty();
        if empty_input {
            let empty = DpViewsError::EmptyInput {
                scope: scope.to_string(),
            };
            tracing::warn!("{empty}");
        }

        let outcome = match SweepController::new(&*self.factory, self.config.sensitivity, self.config.workers)
            .with_cancellation(cancel.clone())
            .run(&normalized, &self.config.budgets)
        {
            Ok(outcome) => outcome,
            Err(DpViewsError::Cancelled {
                completed,
                skipped,
                mut partial,
            }) => {
                partial.budgets = summaries;
                partial.empty_input = empty_input;
                return Err(DpViewsError::Cancelled {
                    completed,
                    skipped,
                    partial,
                });
            }
            Err(e) => return Err(e),
        };

        let mut report = Reconciler::from(&self.config).reconcile(&outcome.exact, &outcome.noised);
        report.budgets = summaries;
        report.empty_input = empty_input;
        report.failed_budgets = outcome
            .failures
            .iter()
            .map(|f| (f.budget.key(), f.to_error().to_string()))
            .collect();

        if outcome.was_cancelled() {
            return Err(DpViewsError::Cancelled {
                completed: outcome.noised.len() + outcome.failures.len(),
                skipped: outcome.skipped.len(),
                partial: Box::new(report),
            });
        }

        tracing::info!(
            "Report for {scope}: {} items, {} budgets, {} failed",
            report.items.len(),
            outcome.noised.len(),
            report.failed_budgets.len()
        );

        Ok(report)
    }
}
