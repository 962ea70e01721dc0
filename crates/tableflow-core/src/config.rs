//! Coordinator configuration.

use std::time::Duration;

use serde::Deserialize;

/// Settings shared by every window coordinator.
///
/// Environment variables are prefixed with `TABLEFLOW_`:
/// - `TABLEFLOW_TABLE_TIMEOUT_SECS`: Per-table execution timeout (optional)
/// - `TABLEFLOW_MAX_PARALLEL_TABLES`: Independent tables run concurrently within a level (default: 1)
/// - `TABLEFLOW_REPORT_CHANNEL_CAPACITY`: Buffer size of the window report channel (default: 64)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CoordinatorConfig {
    /// Per-table timeout in seconds; unbounded when absent
    #[serde(default)]
    pub table_timeout_secs: Option<u64>,

    #[serde(default = "default_max_parallel_tables")]
    pub max_parallel_tables: usize,

    #[serde(default = "default_report_channel_capacity")]
    pub report_channel_capacity: usize,
}

fn default_max_parallel_tables() -> usize {
    1
}

fn default_report_channel_capacity() -> usize {
    64
}

impl CoordinatorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("TABLEFLOW_").from_env::<CoordinatorConfig>()
    }

    pub fn table_timeout(&self) -> Option<Duration> {
        self.table_timeout_secs.map(Duration::from_secs)
    }

    /// Parallelism clamped to at least one table at a time.
    pub fn parallelism(&self) -> usize {
        self.max_parallel_tables.max(1)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            table_timeout_secs: None,
            max_parallel_tables: default_max_parallel_tables(),
            report_channel_capacity: default_report_channel_capacity(),
        }
    }
}
