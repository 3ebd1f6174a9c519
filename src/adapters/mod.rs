//! Adapters layer: Concrete implementations of ports.
//!
//! - `laplace`: ChaCha20-backed Laplace noise, one generator per budget
//! - `memory`: in-memory event source
//! - `sqlite`: SQLite event source
//! - `sanitize`: visitor-identifier filtering for logs

pub mod laplace;
pub mod memory;
pub mod sanitize;
pub mod sqlite;

pub use laplace::{ChaChaNoiseFactory, ChaChaNoiseSource};
pub use memory::InMemoryEventSource;
pub use sqlite::{SqliteEventSource, StorageError};
