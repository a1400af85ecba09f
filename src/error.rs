//! Error taxonomy for the identity, ledger and moderation components.

use thiserror::Error;

use crate::notify::NotifyError;

/// Errors returned by the core components.
///
/// There is no `AlreadyTransitioned` variant: a losing moderation call is
/// reported as a successful [`crate::moderation::TransitionOutcome`], not an error.
#[derive(Error, Debug)]
pub enum CivicError {
    /// Token or email already belongs to a different identity.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed input, rejected before any write.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Referenced record does not exist (or is tombstoned).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller's trust level does not allow the operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Clerk lacks the capability for the requested action.
    #[error("{0}")]
    CapabilityDenied(String),

    /// Outbound notification failed.
    #[error("Notifier failure: {0}")]
    Notifier(#[from] NotifyError),

    /// Underlying store failure.
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Schema migration failure.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored column held a value outside its declared domain.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl CivicError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        CivicError::Conflict(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        CivicError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CivicError::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        CivicError::Forbidden(msg.into())
    }

    /// True when the underlying store rejected a write on a UNIQUE constraint.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            CivicError::Storage(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

/// Result alias for the core components.
pub type Result<T> = std::result::Result<T, CivicError>;
