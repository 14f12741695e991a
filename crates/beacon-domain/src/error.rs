//! Value-level validation errors

use thiserror::Error;

/// Errors raised when a domain value or state change is rejected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// A value is outside its allowed range or malformed
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// A lifecycle status change is not permitted
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

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
}

/// Errors surfaced by repository implementations
///
/// Backends map their own error types into this enum so the traits in
/// [`crate::traits`] stay object-safe and backend-agnostic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepoError {
    /// The referenced record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A compare-and-set or version check lost against a concurrent writer,
    /// or a uniqueness rule was violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Storage backend failure
    #[error("Storage backend error: {0}")]
    Backend(String),
}
