//! Dependency analysis: reference extraction, graph building, cycle
//! detection and topological scheduling.

mod builder;
pub mod extractor;
mod plan;
pub mod scheduler;
pub mod validator;

pub use builder::{DependencyGraph, UnresolvedReference};
pub use plan::{EdgeSnapshot, ExecutionPlan, GraphSnapshot};
