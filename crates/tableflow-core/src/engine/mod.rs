//! Windowed execution: table executor, storage, coordinators and their
//! registry.

pub mod coordinator;
pub mod executor;
pub mod registry;
pub mod state;
pub mod store;

pub use coordinator::{
    Clock, CoordinatorCommand, CoordinatorHandle, SystemClock, WindowCoordinator,
};
pub use executor::{quote_identifier, SqlEngine, TableExecutor, TableOutput};
pub use registry::WorkflowRegistry;
pub use state::{CoordinatorState, TableOutcome, TableStatus, WindowReport};
pub use store::{MemoryStore, ReconcileSummary, Row, RowSet, TableStore};
