//! Error types for Tableflow.
//!
//! Structural errors ([`WorkflowError`]) block a workflow until the user
//! corrects it. Execution errors ([`ExecutionError`]) are contained to a
//! single table and window and are reported, never propagated past the
//! coordinator.

use std::time::Duration;

use thiserror::Error;

use crate::model::{FunctionType, TableId};

/// Structural errors raised while editing, building or validating a workflow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// Two tables share a name (names compare case-insensitively).
    #[error("Duplicate table name: {name}")]
    DuplicateTableName { name: String },

    /// Two tables share an id.
    #[error("Duplicate table id: {id}")]
    DuplicateTableId { id: TableId },

    /// The dependency graph contains a cycle.
    #[error("Cyclic dependency: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<String> },

    /// Table lookup failed.
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Table cannot be removed while other tables reference it.
    #[error("Table '{table}' is still referenced by: {}", .dependents.join(", "))]
    TableInUse {
        table: String,
        dependents: Vec<String>,
    },

    /// Window configuration is unusable.
    #[error("Invalid window configuration: {0}")]
    InvalidWindow(String),
}

fn format_cycle(cycle: &[String]) -> String {
    match cycle.first() {
        Some(first) => format!("{} -> {}", cycle.join(" -> "), first),
        None => String::new(),
    }
}

/// Errors from executing one table for one window.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The external SQL engine rejected or failed the query.
    #[error("Engine error: {0}")]
    Engine(String),

    /// Execution exceeded the configured per-table timeout.
    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),

    /// Window placeholders could not be rendered.
    #[error("Template error: {0}")]
    Template(String),

    /// Reconciling rows into table storage failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A result row lacks one of the table's upsert constraint columns.
    #[error("Row for table '{table}' is missing upsert key column '{column}'")]
    MissingKeyColumn { table: String, column: String },

    /// The table's function type has no executor.
    #[error("Unsupported function type: {0}")]
    UnsupportedFunctionType(FunctionType),
}

impl From<minijinja::Error> for ExecutionError {
    fn from(err: minijinja::Error) -> Self {
        ExecutionError::Template(err.to_string())
    }
}

/// Errors from exporting or importing a workflow document.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Document is not well-formed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Document declares an unknown API version.
    #[error("Unsupported API version: {0}")]
    UnsupportedApiVersion(String),

    /// Document is not a workflow.
    #[error("Invalid kind: {0}")]
    InvalidKind(String),

    /// Workflow could not be serialized.
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Document parsed but describes an invalid workflow.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

/// Crate-level error.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<envy::Error> for Error {
    fn from(err: envy::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
