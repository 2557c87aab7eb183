//! Error types for commitsync-core

use thiserror::Error;

/// Result type alias using commitsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in commitsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Caller supplied an incomplete collection or scope. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A delivered commit reappeared in an export scan. Needs an operator.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// Job queue is closed or rejected the job
    #[error("Queue error: {0}")]
    Queue(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity or collection not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether a caller may retry the failed operation later.
    ///
    /// Store and queue failures are transient; configuration mistakes and
    /// invariant violations are not.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::LibSql(_) | Self::Queue(_) | Self::Io(_)
        )
    }
}
