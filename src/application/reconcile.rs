//! Reconciler: joins the exact pass with every noised pass.
//!
//! Ranks are 1-based and come from a stable descending sort on count, so
//! ties keep the aggregator's first-seen order. Noised ranks are derived
//! from noised counts; they are not themselves a private release.

use std::collections::{HashMap, HashSet};

use crate::config::ValidatedConfig;
use crate::domain::{
    diagnostics, BudgetCounts, BudgetDiagnostic, CountRecord, DiagnosticRecord, ItemReport,
    Report, Violation,
};
use crate::DpViewsError;

/// Records paired with their rank, highest count first.
fn ranked(records: &[CountRecord]) -> Vec<(&CountRecord, i64)> {
    let mut sorted: Vec<&CountRecord> = records.iter().collect();
    sorted.sort_by(|a, b| b.count.cmp(&a.count));
    sorted
        .into_iter()
        .zip(1..)
        .collect()
}

/// Suppression parameters applied to every (item, budget) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reconciler {
    pub sensitivity: i64,
    pub alpha: f64,
    pub prop_within: f64,
}

impl From<&ValidatedConfig> for Reconciler {
    fn from(config: &ValidatedConfig) -> Self {
        Self {
            sensitivity: config.sensitivity,
            alpha: config.alpha,
            prop_within: config.prop_within,
        }
    }
}

impl Reconciler {
    /// Diagnostic records for one noised pass, in noised rank order.
    ///
    /// Rows whose item has no exact count are returned as violations
    /// instead.
    #[must_use]
    pub fn diagnose(
        &self,
        exact: &HashMap<&str, (i64, i64)>,
        noised: &BudgetCounts,
    ) -> (Vec<DiagnosticRecord>, Vec<Violation>) {
        let mut records = Vec::with_capacity(noised.len());
        let mut violations = Vec::new();

        for (record, noised_rank) in ranked(&noised.records) {
            let Some(&(exact_count, exact_rank)) = exact.get(record.item_id.as_str()) else {
                let violation = Violation {
                    item_id: record.item_id.clone(),
                    budget: noised.key(),
                };
                let error = DpViewsError::ReconciliationContractViolation {
                    item_id: violation.item_id.clone(),
                    budget: violation.budget.clone(),
                };
                tracing::warn!("Rejected noised row: {error}");
                violations.push(violation);
                continue;
            };

            records.push(DiagnosticRecord {
                item_id: record.item_id.clone(),
                exact_count,
                exact_rank,
                noised_count: record.count,
                noised_rank,
                suppress: diagnostics::do_aggregate(
                    record.count,
                    self.sensitivity,
                    noised.budget.epsilon,
                    self.alpha,
                    self.prop_within,
                ),
            });
        }

        (records, violations)
    }

    /// Build the report keyed by item.
    ///
    /// Every exact item appears once. Under each noised pass it gets either
    /// its diagnostic or, if that pass has no row for it, the missing entry.
    /// Budget summaries and failures are left for the caller to fill in.
    #[must_use]
    pub fn reconcile(&self, exact: &BudgetCounts, noised: &[BudgetCounts]) -> Report {
        let exact_ranks: HashMap<&str, (i64, i64)> = ranked(&exact.records)
            .into_iter()
            .map(|(r, rank)| (r.item_id.as_str(), (r.count, rank)))
            .collect();

        let mut report = Report::default();
        for (&item_id, &(exact_count, exact_rank)) in &exact_ranks {
            report.items.insert(
                item_id.to_string(),
                ItemReport {
                    exact_count,
                    exact_rank,
                    per_budget: Default::default(),
                },
            );
        }

        for counts in noised {
            let key = counts.key();
            let (records, violations) = self.diagnose(&exact_ranks, counts);

            let mut covered: HashSet<&str> = HashSet::with_capacity(records.len());
            for record in &records {
                covered.insert(record.item_id.as_str());
                if let Some(item) = report.items.get_mut(&record.item_id) {
                    item.per_budget.insert(key.clone(), BudgetDiagnostic::from(record));
                }
            }
            for (item_id, item) in report.items.iter_mut() {
                if !covered.contains(item_id.as_str()) {
                    item.per_budget.insert(key.clone(), BudgetDiagnostic::missing());
                }
            }

            report.violations.extend(violations);
        }

        report
    }
}
