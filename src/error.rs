//! Crate-wide error taxonomy.
//!
//! Every fallible operation in the engine returns [`DbResult`]. The variants
//! distinguish retry-safe conditions (a conflicting commit, a latch timeout)
//! from fatal ones (checksum corruption that the WAL cannot repair), so
//! callers can decide between retrying a transaction and refusing to serve
//! the data directory.

use thiserror::Error;

/// Errors surfaced by the storage, transaction and query layers.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("transaction conflict: {0}")]
    TransactionConflict(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("syntax error: {0}")]
    QuerySyntax(String),

    #[error("unsupported query construct: {0}")]
    QueryPlan(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("capacity exhausted: {0}")]
    Capacity(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl DbError {
    /// Whether the failed operation can be retried against the same handle.
    ///
    /// Conflicts and capacity pressure are transient; corruption and I/O
    /// failures indicate the data directory itself is in trouble.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DbError::TransactionConflict(_) | DbError::Capacity(_)
        )
    }
}

impl From<bincode::Error> for DbError {
    fn from(e: bincode::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}

/// Result type used throughout the crate.
pub type DbResult<T> = Result<T, DbError>;
