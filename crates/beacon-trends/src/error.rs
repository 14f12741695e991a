//! Error types for trend aggregation

use beacon_domain::RepoError;
use beacon_engine::EngineError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while building trend points
#[derive(Error, Debug)]
pub enum TrendError {
    /// Profile or effectiveness computation failed
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Storage layer error
    #[error("Storage error: {0}")]
    Store(String),

    /// The snapshot was cancelled before completion; nothing was written
    #[error("Snapshot cancelled")]
    Cancelled,

    /// The snapshot exceeded its time budget; nothing was written
    #[error("Snapshot timed out after {0:?}")]
    TimedOut(Duration),

    /// Worker error (tokio runtime issues)
    #[error("Worker error: {0}")]
    Worker(String),
}

impl From<RepoError> for TrendError {
    fn from(e: RepoError) -> Self {
        TrendError::Store(e.to_string())
    }
}
