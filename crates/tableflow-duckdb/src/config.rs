//! DuckDB backend configuration.

use serde::Deserialize;

/// Environment variables are prefixed with `TABLEFLOW_DUCKDB_`:
/// - `TABLEFLOW_DUCKDB_PATH`: Database file (in-memory when absent)
/// - `TABLEFLOW_DUCKDB_THREADS`: DuckDB worker threads (optional)
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DuckdbConfig {
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub threads: Option<usize>,
}

impl DuckdbConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("TABLEFLOW_DUCKDB_").from_env::<DuckdbConfig>()
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Human-readable location for logs.
    pub fn location(&self) -> &str {
        self.path.as_deref().unwrap_or(":memory:")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_memory() {
        let config = DuckdbConfig::default();
        assert_eq!(config.location(), ":memory:");
        assert!(config.threads.is_none());
    }

    #[test]
    fn test_prefixed_variables() {
        let config: DuckdbConfig = envy::prefixed("TABLEFLOW_DUCKDB_")
            .from_iter(vec![
                ("TABLEFLOW_DUCKDB_PATH".to_string(), "/tmp/flow.duckdb".to_string()),
                ("TABLEFLOW_DUCKDB_THREADS".to_string(), "2".to_string()),
            ])
            .unwrap();
        assert_eq!(config.location(), "/tmp/flow.duckdb");
        assert_eq!(config.threads, Some(2));
    }
}
