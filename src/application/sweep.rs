//! Budget sweep controller.
//!
//! Runs the exact pass once, then one DP pass per budget on a bounded pool
//! of scoped worker threads. Workers claim budgets from a shared cursor and
//! keep their results in their own vector; the vectors are merged in grid
//! order after every worker has joined.
//!
//! A failing or panicking budget is isolated to its own slot. Cancellation
//! stops workers from claiming further budgets; budgets already claimed run
//! to completion.

use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use super::aggregate;
use super::normalize::NormalizedEvents;
use crate::domain::{BudgetCounts, PrivacyBudget, Report};
use crate::ports::{DpError, NoiseSourceFactory};
use crate::DpViewsError;

/// Shared flag asking a running sweep to stop scheduling budgets.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One budget whose DP pass failed.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetFailure {
    pub budget: PrivacyBudget,
    pub error: DpError,
}

impl BudgetFailure {
    /// Crate error for this failure. Missing randomness is reported as
    /// `NoiseGenerationFailure`, everything else as `PartialBudgetFailure`.
    #[must_use]
    pub fn to_error(&self) -> DpViewsError {
        let budget = self.budget.key();
        match &self.error {
            DpError::RngUnavailable(_) => DpViewsError::NoiseGenerationFailure {
                budget,
                source: self.error.clone(),
            },
            _ => DpViewsError::PartialBudgetFailure {
                budget,
                source: self.error.clone(),
            },
        }
    }
}

/// Everything a sweep produced.
#[derive(Debug, Clone)]
pub struct SweepOutcome {
    /// Exact pass, tagged with the sentinel budget.
    pub exact: BudgetCounts,

    /// Successful DP passes, in grid order.
    pub noised: Vec<BudgetCounts>,

    /// Failed DP passes, in grid order.
    pub failures: Vec<BudgetFailure>,

    /// Budgets never started because the sweep was cancelled.
    pub skipped: Vec<PrivacyBudget>,
}

impl SweepOutcome {
    /// Number of result sets, the exact pass included.
    #[must_use]
    pub fn result_sets(&self) -> usize {
        1 + self.noised.len()
    }

    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        !self.skipped.is_empty()
    }
}

type Slot = Vec<(usize, Result<BudgetCounts, DpError>)>;

/// Runs the exact pass and the DP grid over one set of normalized events.
pub struct SweepController<'a, F: NoiseSourceFactory> {
    factory: &'a F,
    sensitivity: i64,
    workers: NonZeroUsize,
    cancel: CancellationToken,
}

impl<'a, F: NoiseSourceFactory> SweepController<'a, F> {
    #[must_use]
    pub fn new(factory: &'a F, sensitivity: i64, workers: NonZeroUsize) -> Self {
        Self {
            factory,
            sensitivity,
            workers,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sweep `budgets` over `events`.
    ///
    /// # Errors
    /// Returns `Cancelled` with an empty partial report if cancellation was
    /// requested before the exact pass; callers add whatever depends only on
    /// configuration. Failures of individual budgets are never errors here;
    /// they are collected in the outcome.
    pub fn run(
        &self,
        events: &NormalizedEvents,
        budgets: &[PrivacyBudget],
    ) -> Result<SweepOutcome, DpViewsError> {
        if self.cancel.is_cancelled() {
            return Err(DpViewsError::Cancelled {
                completed: 0,
                skipped: budgets.len(),
                partial: Box::new(Report::default()),
            });
        }

        let exact = aggregate::exact_counts(events);
        tracing::debug!("Exact pass counted {} items", exact.len());

        let worker_count = self.workers.get().min(budgets.len());
        tracing::info!(
            "Sweeping {} budgets over {} events with {worker_count} workers",
            budgets.len(),
            events.len()
        );

        let cursor = AtomicUsize::new(0);
        let slots: Vec<Slot> = thread::scope(|s| {
            let handles: Vec<_> = (0..worker_count)
                .map(|_| s.spawn(|| self.work(events, budgets, &cursor)))
                .collect();

            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(slot) => slot,
                    Err(payload) => panic::resume_unwind(payload),
                })
                .collect()
        });

        let mut finished: Vec<(usize, Result<BudgetCounts, DpError>)> =
            slots.into_iter().flatten().collect();
        finished.sort_by_key(|(idx, _)| *idx);

        let mut started = vec![false; budgets.len()];
        let mut noised = Vec::new();
        let mut failures = Vec::new();
        for (idx, result) in finished {
            started[idx] = true;
            match result {
                Ok(counts) => noised.push(counts),
                Err(error) => {
                    let failure = BudgetFailure {
                        budget: budgets[idx],
                        error,
                    };
                    tracing::warn!("{}", failure.to_error());
                    failures.push(failure);
                }
            }
        }

        let skipped: Vec<PrivacyBudget> = budgets
            .iter()
            .zip(started)
            .filter(|(_, ran)| !ran)
            .map(|(b, _)| *b)
            .collect();
        if !skipped.is_empty() {
            tracing::warn!("Sweep cancelled with {} budgets not started", skipped.len());
        }

        tracing::info!(
            "Sweep finished: {} succeeded, {} failed, {} skipped",
            noised.len(),
            failures.len(),
            skipped.len()
        );

        Ok(SweepOutcome {
            exact,
            noised,
            failures,
            skipped,
        })
    }

    fn work(&self, events: &NormalizedEvents, budgets: &[PrivacyBudget], cursor: &AtomicUsize) -> Slot {
        let mut slot = Vec::new();
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let idx = cursor.fetch_add(1, Ordering::SeqCst);
            let Some(&budget) = budgets.get(idx) else {
                break;
            };
            slot.push((idx, self.run_budget(events, budget)));
        }
        slot
    }

    fn run_budget(&self, events: &NormalizedEvents, budget: PrivacyBudget) -> Result<BudgetCounts, DpError> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut source = self.factory.source_for(&budget)?;
            aggregate::private_counts(events, budget, self.sensitivity, &mut source)
        }));

        match outcome {
            Ok(result) => {
                if let Ok(counts) = &result {
                    tracing::debug!("Budget {} produced {} noised counts", budget.key(), counts.len());
                }
                result
            }
            Err(payload) => Err(DpError::Panicked(panic_message(payload.as_ref()))),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ChaChaNoiseFactory;
    use crate::application::normalize::normalize;
    use crate::config::RetentionPolicy;
    use crate::domain::Event;
    use crate::ports::NoiseSource;
    use chrono::NaiveDate;
    use std::collections::HashSet;

    fn sample_events() -> NormalizedEvents {
        let day = NaiveDate::from_ymd_opt(2021, 7, 14).expect("valid date");
        let raw: Vec<Event> = (0..30)
            .map(|u| Event::new(format!("u{u}"), ["A", "B", "C"][u % 3], day))
            .collect();
        normalize(&raw, RetentionPolicy::FirstSeen)
    }

    fn grid(epsilons: &[f64], deltas: &[f64]) -> Vec<PrivacyBudget> {
        epsilons
            .iter()
            .flat_map(|&e| deltas.iter().map(move |&d| PrivacyBudget::new(e, d)))
            .collect()
    }

    fn workers(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).expect("non-zero")
    }

    /// Fails or panics for chosen epsilons, otherwise adds no noise.
    struct FlakyFactory {
        fail_at: f64,
        panic_at: f64,
    }

    struct ZeroNoise;

    impl NoiseSource for ZeroNoise {
        fn sample_laplace(&mut self, _scale: f64) -> Result<f64, DpError> {
            Ok(0.0)
        }
    }

    impl NoiseSourceFactory for FlakyFactory {
        type Source = ZeroNoise;

        fn source_for(&self, budget: &PrivacyBudget) -> Result<ZeroNoise, DpError> {
            if budget.epsilon == self.panic_at {
                panic!("generator exploded");
            }
            if budget.epsilon == self.fail_at {
                return Err(DpError::RngUnavailable("entropy pool empty".to_string()));
            }
            Ok(ZeroNoise)
        }
    }

    #[test]
    fn test_produces_one_result_set_per_budget_plus_exact() {
        let budgets = grid(&[0.1, 0.5, 1.0], &[0.0, 0.01]);
        let factory = ChaChaNoiseFactory::seeded([2u8; 32]);
        let outcome = SweepController::new(&factory, 1, workers(4))
            .run(&sample_events(), &budgets)
            .expect("sweep");

        assert_eq!(outcome.result_sets(), 3 * 2 + 1);
        assert!(outcome.exact.budget.is_exact());
        let keys: HashSet<String> = outcome.noised.iter().map(BudgetCounts::key).collect();
        assert_eq!(keys.len(), 6);
        assert!(!keys.contains(&PrivacyBudget::EXACT.key()));
        assert!(outcome.failures.is_empty());
        assert!(!outcome.was_cancelled());
    }

    #[test]
    fn test_results_in_grid_order_regardless_of_workers() {
        let budgets = grid(&[0.1, 0.5, 1.0, 5.0], &[0.0001, 0.5]);
        let factory = ChaChaNoiseFactory::seeded([4u8; 32]);
        let events = sample_events();

        let single = SweepController::new(&factory, 1, workers(1))
            .run(&events, &budgets)
            .expect("sweep");
        let many = SweepController::new(&factory, 1, workers(8))
            .run(&events, &budgets)
            .expect("sweep");

        let order: Vec<PrivacyBudget> = many.noised.iter().map(|c| c.budget).collect();
        assert_eq!(order, budgets);
        // Seeded streams are per budget, so scheduling does not change draws.
        assert_eq!(single.noised, many.noised);
    }

    #[test]
    fn test_failures_are_isolated() {
        let budgets = grid(&[0.1, 0.5, 1.0], &[0.0]);
        let factory = FlakyFactory {
            fail_at: 0.5,
            panic_at: 1.0,
        };
        let outcome = SweepController::new(&factory, 1, workers(2))
            .run(&sample_events(), &budgets)
            .expect("sweep");

        assert_eq!(outcome.noised.len(), 1);
        assert_eq!(outcome.noised[0].budget, PrivacyBudget::new(0.1, 0.0));
        assert_eq!(outcome.failures.len(), 2);
        assert!(matches!(
            outcome.failures[0].to_error(),
            DpViewsError::NoiseGenerationFailure { .. }
        ));
        assert_eq!(
            outcome.failures[1].error,
            DpError::Panicked("generator exploded".to_string())
        );
        assert!(matches!(
            outcome.failures[1].to_error(),
            DpViewsError::PartialBudgetFailure { .. }
        ));
    }

    #[test]
    fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let factory = ChaChaNoiseFactory::seeded([0u8; 32]);
        let result = SweepController::new(&factory, 1, workers(2))
            .with_cancellation(token)
            .run(&sample_events(), &grid(&[1.0], &[0.0]));
        assert!(matches!(
            result,
            Err(DpViewsError::Cancelled { completed: 0, skipped: 1, .. })
        ));
    }

    /// Cancels the sweep from inside the first budget's computation.
    struct CancellingFactory {
        token: CancellationToken,
    }

    impl NoiseSourceFactory for CancellingFactory {
        type Source = ZeroNoise;

        fn source_for(&self, _budget: &PrivacyBudget) -> Result<ZeroNoise, DpError> {
            self.token.cancel();
            Ok(ZeroNoise)
        }
    }

    #[test]
    fn test_cancellation_mid_sweep_keeps_completed_sets() {
        let token = CancellationToken::new();
        let factory = CancellingFactory {
            token: token.clone(),
        };
        let budgets = grid(&[0.1, 0.5, 1.0, 5.0], &[0.0]);
        let outcome = SweepController::new(&factory, 1, workers(1))
            .with_cancellation(token)
            .run(&sample_events(), &budgets)
            .expect("exact pass ran");

        assert_eq!(outcome.noised.len(), 1);
        assert_eq!(outcome.noised[0].budget, budgets[0]);
        assert_eq!(outcome.skipped, budgets[1..].to_vec());
        assert!(outcome.was_cancelled());
        // Zero noise: the completed set is intact.
        let exact: Vec<i64> = outcome.exact.records.iter().map(|r| r.count).collect();
        let noised: Vec<i64> = outcome.noised[0].records.iter().map(|r| r.count).collect();
        assert_eq!(exact, noised);
    }

    #[test]
    fn test_empty_grid_runs_exact_only() {
        let factory = ChaChaNoiseFactory::seeded([0u8; 32]);
        let outcome = SweepController::new(&factory, 1, workers(4))
            .run(&sample_events(), &[])
            .expect("sweep");
        assert_eq!(outcome.result_sets(), 1);
        assert_eq!(outcome.exact.len(), 3);
    }
}
