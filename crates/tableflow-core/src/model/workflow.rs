//! Workflow: a named set of tables sharing one window cadence.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::WorkflowError;
use crate::graph::{extractor, ExecutionPlan};

use super::table::{Table, TableId};
use super::window::WindowConfig;

/// Workflow identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(String);

impl WorkflowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkflowId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// What to do with dependents when a referenced table is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemovalPolicy {
    /// Refuse while any other table references it.
    #[default]
    Restrict,
    /// Remove anyway; dependents keep a dangling reference.
    Detach,
}

/// A named collection of tables and their window configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub window: WindowConfig,
    pub tables: Vec<Table>,
}

impl Workflow {
    /// Create an empty workflow with a generated id and default window.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: WorkflowId::generate(),
            name: name.into(),
            window: WindowConfig::default(),
            tables: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<WorkflowId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_window(mut self, window: WindowConfig) -> Self {
        self.window = window;
        self
    }

    /// Builder-style [`Workflow::add_table`].
    pub fn with_table(mut self, table: Table) -> Result<Self, WorkflowError> {
        self.add_table(table)?;
        Ok(self)
    }

    pub fn table(&self, id: &TableId) -> Option<&Table> {
        self.tables.iter().find(|t| &t.id == id)
    }

    /// Look a table up by name, ignoring case.
    pub fn table_by_name(&self, name: &str) -> Option<&Table> {
        let key = name.to_lowercase();
        self.tables.iter().find(|t| t.name_key() == key)
    }

    /// Add a table, rejecting id or name collisions.
    pub fn add_table(&mut self, table: Table) -> Result<(), WorkflowError> {
        if self.table(&table.id).is_some() {
            return Err(WorkflowError::DuplicateTableId { id: table.id });
        }
        if self.table_by_name(&table.name).is_some() {
            return Err(WorkflowError::DuplicateTableName { name: table.name });
        }
        self.tables.push(table);
        Ok(())
    }

    /// Replace the table with the same id.
    pub fn update_table(&mut self, table: Table) -> Result<(), WorkflowError> {
        let key = table.name_key();
        if self
            .tables
            .iter()
            .any(|t| t.id != table.id && t.name_key() == key)
        {
            return Err(WorkflowError::DuplicateTableName { name: table.name });
        }

        let slot = self
            .tables
            .iter_mut()
            .find(|t| t.id == table.id)
            .ok_or_else(|| WorkflowError::TableNotFound(table.id.to_string()))?;
        *slot = table;
        Ok(())
    }

    /// Remove a table, enforcing referential integrity per `policy`.
    pub fn remove_table(
        &mut self,
        id: &TableId,
        policy: RemovalPolicy,
    ) -> Result<Table, WorkflowError> {
        let position = self
            .tables
            .iter()
            .position(|t| &t.id == id)
            .ok_or_else(|| WorkflowError::TableNotFound(id.to_string()))?;

        let dependents: Vec<String> = self
            .dependents_of(id)
            .into_iter()
            .map(|t| t.name.clone())
            .collect();

        if !dependents.is_empty() {
            match policy {
                RemovalPolicy::Restrict => {
                    return Err(WorkflowError::TableInUse {
                        table: self.tables[position].name.clone(),
                        dependents,
                    });
                }
                RemovalPolicy::Detach => {
                    warn!(
                        workflow = %self.name,
                        table = %self.tables[position].name,
                        dependents = ?dependents,
                        "Removing referenced table; dependents now hold a dangling reference"
                    );
                }
            }
        }

        Ok(self.tables.remove(position))
    }

    /// Tables whose definitions reference the given table.
    pub fn dependents_of(&self, id: &TableId) -> Vec<&Table> {
        let Some(source) = self.table(id) else {
            return Vec::new();
        };
        self.tables
            .iter()
            .filter(|t| t.id != source.id)
            .filter(|t| extractor::references_name(&t.definition, &source.name))
            .collect()
    }

    /// Build, validate and schedule the dependency graph.
    ///
    /// A workflow is runnable exactly when this succeeds.
    pub fn plan(&self) -> Result<ExecutionPlan, WorkflowError> {
        self.window.validate()?;
        ExecutionPlan::build(&self.tables)
    }
}
