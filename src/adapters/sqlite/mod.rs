//! SQLite adapter: Implementation of EventSource.
//!
//! Reads the visit log from a `pageviews` table with one row per visit.
//! Days are stored as `YYYY-MM-DD` text.
//!
//! # Mutex Behavior
//!
//! The connection is protected by `Mutex`. A poisoned mutex (from a panic
//! in another thread) is reported as `StorageError::LockPoisoned` rather
//! than retried.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use rusqlite::{params, Connection};

use crate::domain::{Event, Scope};
use crate::ports::EventSource;

const DAY_FORMAT: &str = "%Y-%m-%d";

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid stored day {value:?}: {source}")]
    InvalidDay {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("Database connection lock poisoned")]
    LockPoisoned,
}

/// SQLite-backed event source.
pub struct SqliteEventSource {
    conn: Mutex<Connection>,
}

impl SqliteEventSource {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    /// Returns error if database cannot be opened or initialized.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let source = Self {
            conn: Mutex::new(conn),
        };
        source.init_schema()?;
        Ok(source)
    }

    /// Create an in-memory SQLite database (for testing).
    ///
    /// # Errors
    /// Returns error if database cannot be created.
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let source = Self {
            conn: Mutex::new(conn),
        };
        source.init_schema()?;
        Ok(source)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.lock()?;

        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS pageviews (
                user_id TEXT NOT NULL,
                item_id TEXT NOT NULL,
                scope TEXT NOT NULL,
                day TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_pageviews_scope_day
                ON pageviews(scope, day);
            ",
        )?;

        Ok(())
    }

    /// Append one visit under `scope_label`.
    ///
    /// # Errors
    /// Returns error if the insert fails.
    pub fn record_event(&self, scope_label: &str, event: &Event) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO pageviews (user_id, item_id, scope, day) VALUES (?1, ?2, ?3, ?4)",
            params![
                event.user_id,
                event.item_id,
                scope_label,
                event.day.format(DAY_FORMAT).to_string()
            ],
        )?;
        Ok(())
    }
}

impl EventSource for SqliteEventSource {
    type Error = StorageError;

    fn load_events(&self, scope: &Scope) -> Result<Vec<Event>, Self::Error> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            r"
            SELECT user_id, item_id, day
            FROM pageviews
            WHERE scope = ?1 AND day = ?2
            ORDER BY rowid
            ",
        )?;

        let rows = stmt
            .query_map(
                params![scope.label, scope.day.format(DAY_FORMAT).to_string()],
                |row| {
                    let user_id: String = row.get(0)?;
                    let item_id: String = row.get(1)?;
                    let day: String = row.get(2)?;
                    Ok((user_id, item_id, day))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(user_id, item_id, day)| {
                let parsed = NaiveDate::parse_from_str(&day, DAY_FORMAT)
                    .map_err(|source| StorageError::InvalidDay { value: day, source })?;
                Ok(Event::new(user_id, item_id, parsed))
            })
            .collect()
    }
}
