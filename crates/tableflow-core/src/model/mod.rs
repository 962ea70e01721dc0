//! Workflow data model: tables, workflows and windows.

mod table;
mod window;
mod workflow;

pub use table::{FunctionType, Table, TableId};
pub use window::{Window, WindowConfig, WindowType};
pub use workflow::{RemovalPolicy, Workflow, WorkflowId};
