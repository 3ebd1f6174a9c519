//! Reconciled report types.
//!
//! Serialized with camelCase field names so an external presentation layer
//! can hand the value straight to a client.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::budget::PrivacyBudget;
use super::diagnostics::{self, DEFAULT_PRIOR};

/// Rank or count placeholder for an item with no row under a budget.
pub const MISSING: i64 = -1;

/// Exact and noised view of one item under one budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticRecord {
    pub item_id: String,
    pub exact_count: i64,
    pub exact_rank: i64,
    pub noised_count: i64,
    pub noised_rank: i64,
    pub suppress: bool,
}

/// Per-budget entry nested under an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetDiagnostic {
    pub noised_count: i64,
    pub noised_rank: i64,
    pub suppress: bool,
}

impl BudgetDiagnostic {
    /// Entry for an item the budget's pass produced no row for. Always
    /// suppressed.
    #[must_use]
    pub fn missing() -> Self {
        Self {
            noised_count: MISSING,
            noised_rank: MISSING,
            suppress: true,
        }
    }
}

impl From<&DiagnosticRecord> for BudgetDiagnostic {
    fn from(record: &DiagnosticRecord) -> Self {
        Self {
            noised_count: record.noised_count,
            noised_rank: record.noised_rank,
            suppress: record.suppress,
        }
    }
}

/// Everything known about one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemReport {
    pub exact_count: i64,
    pub exact_rank: i64,

    /// Keyed by `"epsilon|delta"`. The exact sentinel never appears here.
    pub per_budget: BTreeMap<String, BudgetDiagnostic>,
}

/// Parameters-only view of one configured budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSummary {
    pub key: String,
    pub epsilon: f64,
    pub delta: f64,

    /// Worst-case posterior at a 50/50 prior.
    pub qual_eps: f64,

    /// Noised count below which values are suppressed.
    pub aggregation_threshold: f64,
}

impl BudgetSummary {
    #[must_use]
    pub fn new(budget: PrivacyBudget, sensitivity: i64, alpha: f64, prop_within: f64) -> Self {
        Self {
            key: budget.key(),
            epsilon: budget.epsilon,
            delta: budget.delta,
            qual_eps: diagnostics::qual_eps(budget.epsilon, DEFAULT_PRIOR),
            aggregation_threshold: diagnostics::aggregation_threshold(
                sensitivity,
                budget.epsilon,
                alpha,
                prop_within,
            ),
        }
    }
}

/// A noised row rejected because its item is missing from the exact pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub item_id: String,
    pub budget: String,
}

/// Reconciled output for one scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// Keyed by item ID.
    pub items: BTreeMap<String, ItemReport>,

    /// One entry per configured budget, in grid order.
    pub budgets: Vec<BudgetSummary>,

    /// Budgets whose pass failed, keyed by budget key, with the error text.
    /// These keys are absent from every item's `per_budget`.
    pub failed_budgets: BTreeMap<String, String>,

    pub violations: Vec<Violation>,

    /// No events survived normalization.
    pub empty_input: bool,
}

impl Report {
    #[must_use]
    pub fn item(&self, item_id: &str) -> Option<&ItemReport> {
        self.items.get(item_id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items ordered by exact rank.
    #[must_use]
    pub fn ranked(&self) -> Vec<(&str, &ItemReport)> {
        let mut ranked: Vec<(&str, &ItemReport)> =
            self.items.iter().map(|(k, v)| (k.as_str(), v)).collect();
        ranked.sort_by_key(|(_, item)| item.exact_rank);
        ranked
    }
}
