//! Visit events and the scope they are requested for.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One visit of a user to an item (page) on a given day.
///
/// Events are produced by an external ingestion collaborator and never
/// mutated here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    /// Opaque visitor identifier. This is the privacy unit.
    pub user_id: String,

    /// Item (page) visited.
    pub item_id: String,

    /// Calendar day of the visit.
    pub day: NaiveDate,
}

impl Event {
    /// Create a new event.
    #[must_use]
    pub fn new(user_id: impl Into<String>, item_id: impl Into<String>, day: NaiveDate) -> Self {
        Self {
            user_id: user_id.into(),
            item_id: item_id.into(),
            day,
        }
    }
}

/// The slice of events a single report is computed over.
///
/// `label` is caller-defined (e.g. a wiki language code); the engine only
/// uses it to select events from a source and to tag log lines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub label: String,
    pub day: NaiveDate,
}

impl Scope {
    #[must_use]
    pub fn new(label: impl Into<String>, day: NaiveDate) -> Self {
        Self {
            label: label.into(),
            day,
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.label, self.day.format("%Y-%m-%d"))
    }
}
