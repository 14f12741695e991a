//! Beacon Storage Layer
//!
//! Implements the repository traits from `beacon_domain::traits` on SQLite.
//!
//! # Architecture
//!
//! - One connection behind a mutex; every trait method is one short critical section
//! - Multi-row writes (check-and-create, versioned updates plus log entries)
//!   run inside a single transaction
//! - Append-only tables for samples, alert transitions, progress entries and expenses
//!
//! # Examples
//!
//! ```no_run
//! use beacon_store::SqliteStore;
//!
//! let store = SqliteStore::open(":memory:").unwrap();
//! // Store is now ready for repository operations
//! store.close().unwrap();
//! ```

#![warn(missing_docs)]

mod alerts;
mod codec;
mod dispatch;
mod interventions;
mod students;
mod trends;

use beacon_domain::RepoError;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid data format
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Version or status check lost against another writer
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    /// Record already exists
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// A thread panicked while holding the connection
    #[error("Connection lock poisoned")]
    Poisoned,
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::InvalidData(e.to_string())
    }
}

impl From<StoreError> for RepoError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => RepoError::NotFound(what),
            StoreError::ConcurrentModification(what) | StoreError::Duplicate(what) => {
                RepoError::Conflict(what)
            }
            other => RepoError::Backend(other.to_string()),
        }
    }
}

/// SQLite-based implementation of the Beacon repositories
///
/// # Thread Safety
///
/// The connection is guarded by a mutex, so one store can be shared behind an
/// `Arc` by the engine and the HTTP handlers.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path
    ///
    /// Use `:memory:` for an in-memory database (useful for testing).
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use beacon_store::SqliteStore;
    ///
    /// let store = SqliteStore::open("beacon.db").unwrap();
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(include_str!("schema.sql"))?;
        tracing::debug!("Store schema initialized");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Flush and close the underlying connection
    pub fn close(self) -> Result<(), StoreError> {
        let conn = self.conn.into_inner().map_err(|_| StoreError::Poisoned)?;
        conn.close().map_err(|(_, e)| StoreError::Database(e))?;
        tracing::debug!("Store closed");
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}
