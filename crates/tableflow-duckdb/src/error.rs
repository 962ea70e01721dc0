//! Error types for the DuckDB backend.

use tableflow_core::ExecutionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DuckdbError {
    /// Database file could not be opened.
    #[error("Failed to open database: {0}")]
    Open(String),

    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    /// Connection mutex was poisoned by a panicking holder.
    #[error("Failed to acquire connection lock: {0}")]
    Lock(String),

    /// Blocking task panicked or was cancelled.
    #[error("Task join error: {0}")]
    Join(String),

    /// Reconciliation-level failure raised inside a blocking task.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl From<DuckdbError> for ExecutionError {
    fn from(err: DuckdbError) -> Self {
        match err {
            DuckdbError::Execution(inner) => inner,
            other => ExecutionError::Engine(other.to_string()),
        }
    }
}

/// Storage-side failures are reported as storage errors rather than engine
/// errors.
pub(crate) fn storage_error(err: DuckdbError) -> ExecutionError {
    match err {
        DuckdbError::Execution(inner) => inner,
        other => ExecutionError::Storage(other.to_string()),
    }
}
