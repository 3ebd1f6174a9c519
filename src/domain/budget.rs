//! Privacy budgets and the records produced under them.

use serde::{Deserialize, Serialize};

/// An (epsilon, delta) pair a count is released under.
///
/// The sentinel `(-1, -1)` is the exact, non-private pass. Delta is carried
/// for noise kinds that consume it; the Laplace mechanism ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrivacyBudget {
    pub epsilon: f64,
    pub delta: f64,
}

impl PrivacyBudget {
    /// Sentinel budget for the exact count.
    pub const EXACT: Self = Self {
        epsilon: -1.0,
        delta: -1.0,
    };

    #[must_use]
    pub fn new(epsilon: f64, delta: f64) -> Self {
        Self { epsilon, delta }
    }

    /// Whether this is the exact-count sentinel.
    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.epsilon == Self::EXACT.epsilon && self.delta == Self::EXACT.delta
    }

    /// Report key, `"epsilon|delta"` with the shortest decimal form of each
    /// value (`"0.1|0.0001"`, `"5|0.5"`, `"-1|-1"`).
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}|{}", self.epsilon, self.delta)
    }
}

impl std::fmt::Display for PrivacyBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_exact() {
            write!(f, "exact")
        } else {
            write!(f, "ε={} δ={}", self.epsilon, self.delta)
        }
    }
}

/// Count of one item under one budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountRecord {
    pub item_id: String,
    pub count: i64,
    pub budget: PrivacyBudget,
}

/// All count records produced by one aggregator pass.
///
/// `records` keeps the order the aggregator emitted them in (first
/// appearance of each item in the normalized events), which is the
/// tie-break order for ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetCounts {
    pub budget: PrivacyBudget,
    pub records: Vec<CountRecord>,
}

impl BudgetCounts {
    #[must_use]
    pub fn key(&self) -> String {
        self.budget.key()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
