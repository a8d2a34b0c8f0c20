//! Error types for the delivery attempt ledger

use thiserror::Error;

/// Result type for ledger operations
pub type AttemptResult<T> = Result<T, AttemptError>;

/// Errors that can occur while tracking delivery attempts
#[derive(Error, Debug)]
pub enum AttemptError {
    /// Database operation failed (connection, query execution, etc.)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Attempt key validation failed (empty, too long)
    #[error("Invalid attempt key: {0}")]
    InvalidKey(String),

    /// Retention window does not fit into a timestamp offset
    #[error("Invalid retention window: {0}")]
    InvalidRetention(String),
}

impl AttemptError {
    /// Check if error is transient (should retry)
    pub fn is_transient(&self) -> bool {
        match self {
            AttemptError::Database(sqlx_err) => matches!(
                sqlx_err,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            _ => false,
        }
    }
}
