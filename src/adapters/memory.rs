//! In-memory adapter: Implementation of EventSource.
//!
//! Holds a fixed event list. Used by tests and by callers that already
//! have the day's events loaded.

use std::convert::Infallible;

use crate::domain::{Event, Scope};
use crate::ports::EventSource;

/// Event source over an owned vector.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventSource {
    events: Vec<Event>,
}

impl InMemoryEventSource {
    #[must_use]
    pub fn new(events: Vec<Event>) -> Self {
        Self { events }
    }
}

impl FromIterator<Event> for InMemoryEventSource {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl EventSource for InMemoryEventSource {
    type Error = Infallible;

    /// Returns every held event for the scope's day. The label is ignored:
    /// an in-memory source holds a single scope.
    fn load_events(&self, scope: &Scope) -> Result<Vec<Event>, Self::Error> {
        Ok(self
            .events
            .iter()
            .filter(|e| e.day == scope.day)
            .cloned()
            .collect())
    }
}
