//! Ports layer: Trait definitions for external operations.
//!
//! Following Hexagonal Architecture, these traits define the boundaries
//! between the engine and what it is handed: an event source and a
//! randomness provider.

mod events;
mod privacy;

pub use events::EventSource;
pub use privacy::{DpError, NoiseSource, NoiseSourceFactory};
