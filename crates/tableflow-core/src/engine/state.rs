//! Coordinator states and per-window reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{TableId, Window, WorkflowId};

/// Lifecycle of a window coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    /// Computing the next window.
    Idle,
    /// Waiting for the window end to pass.
    Scheduled,
    /// Executing tables for the window.
    Running,
    /// Unloaded; terminal.
    Stopped,
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

impl From<&str> for CoordinatorState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "scheduled" | "waiting" => Self::Scheduled,
            "running" => Self::Running,
            "stopped" | "unloaded" => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

/// What happened to one table in one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableStatus {
    Completed {
        rows: usize,
        inserted: usize,
        replaced: usize,
    },
    Failed {
        error: String,
    },
    /// Skipped because an upstream table failed or was skipped.
    DependencyFailed {
        upstream: String,
    },
}

impl TableStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Failed or skipped; downstream tables must not run.
    pub fn blocks_dependents(&self) -> bool {
        !self.is_completed()
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::DependencyFailed { .. } => "dependency_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOutcome {
    pub table_id: TableId,
    pub table_name: String,
    #[serde(flatten)]
    pub status: TableStatus,
    pub duration_ms: u64,
}

/// Outcome of every table for one finished window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowReport {
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub window: Window,
    pub outcomes: Vec<TableOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl WindowReport {
    pub fn outcome(&self, table_name: &str) -> Option<&TableOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.table_name.eq_ignore_ascii_case(table_name))
    }

    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_completed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, TableStatus::Failed { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, TableStatus::DependencyFailed { .. }))
            .count()
    }

    pub fn is_success(&self) -> bool {
        self.completed() == self.outcomes.len()
    }
}
