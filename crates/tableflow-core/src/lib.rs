//! Tableflow Core
//!
//! Windowed, incremental SQL table workflows.
//!
//! This crate provides:
//! - Workflow model: tables, tumbling window configuration
//! - Dependency analysis: reference extraction, cycle detection, topological scheduling
//! - Table executor over pluggable SQL engines and table stores
//! - Window coordinators and a registry of active workflows
//! - YAML/JSON workflow documents

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod model;

pub use codec::Format;
pub use config::CoordinatorConfig;
pub use engine::{
    MemoryStore, RowSet, SqlEngine, TableExecutor, TableStatus, TableStore, WindowCoordinator,
    WindowReport, WorkflowRegistry,
};
pub use error::{CodecError, Error, ExecutionError, Result, WorkflowError};
pub use graph::{ExecutionPlan, GraphSnapshot, UnresolvedReference};
pub use model::{
    FunctionType, RemovalPolicy, Table, TableId, Window, WindowConfig, WindowType, Workflow,
    WorkflowId,
};
