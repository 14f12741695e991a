//! Engine error types

use beacon_domain::{DomainError, RepoError};
use thiserror::Error;

/// Errors that can occur during engine operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Student, alert or intervention does not exist (or has no history)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Input value rejected
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Lifecycle change not permitted
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// Another writer changed the record first
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    /// Spending would exceed the approved budget
    #[error("Budget exceeded: spending {requested} on top of {spent} exceeds budget {budget}")]
    BudgetExceeded {
        /// Approved budget
        budget: f64,
        /// Already spent
        spent: f64,
        /// Amount requested
        requested: f64,
    },

    /// Storage failure
    #[error("Store error: {0}")]
    Store(String),
}

impl EngineError {
    /// Stable machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "NotFound",
            EngineError::InvalidValue(_) => "InvalidValue",
            EngineError::InvalidTransition { .. } => "InvalidTransition",
            EngineError::ConcurrentModification(_) => "ConcurrentModification",
            EngineError::BudgetExceeded { .. } => "BudgetExceeded",
            EngineError::Store(_) => "StoreError",
        }
    }
}

impl From<DomainError> for EngineError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::InvalidValue(msg) => EngineError::InvalidValue(msg),
            DomainError::InvalidTransition { from, to } => {
                EngineError::InvalidTransition { from, to }
            }
            DomainError::BudgetExceeded {
                budget,
                spent,
                requested,
            } => EngineError::BudgetExceeded {
                budget,
                spent,
                requested,
            },
        }
    }
}

impl From<RepoError> for EngineError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound(what) => EngineError::NotFound(what),
            RepoError::Conflict(what) => EngineError::ConcurrentModification(what),
            RepoError::Backend(msg) => EngineError::Store(msg),
        }
    }
}
