//! Event source port: Trait for the ingestion collaborator.
//!
//! The engine never reads storage itself; callers inject whatever holds
//! the visit log.

use crate::domain::{Event, Scope};

/// Read access to recorded visit events.
pub trait EventSource: Send + Sync {
    /// Error type for source operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load every event recorded for `scope`.
    ///
    /// Sources may return events in any order and may include events for
    /// other days; the engine filters and bounds them.
    ///
    /// # Errors
    /// Returns error if the underlying store cannot be read.
    fn load_events(&self, scope: &Scope) -> Result<Vec<Event>, Self::Error>;
}
