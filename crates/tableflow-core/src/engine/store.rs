//! Result sets and table storage.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::ExecutionError;
use crate::model::{Table, TableId};

/// One result row keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// Rows returned by the engine, with column order preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// Build from rows alone; columns are taken in first-seen order.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Counts produced by reconciling one result set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub inserted: usize,
    pub replaced: usize,
}

/// Key identifying a row under `table`'s upsert constraints.
///
/// Values are compared by their JSON encoding, so `1` and `"1"` are
/// different keys.
pub fn row_key(table: &Table, row: &Row) -> Result<String, ExecutionError> {
    let mut values = Vec::with_capacity(table.upsert_constraints.len());
    for column in &table.upsert_constraints {
        let value = row
            .get(column)
            .ok_or_else(|| ExecutionError::MissingKeyColumn {
                table: table.name.clone(),
                column: column.clone(),
            })?;
        values.push(value);
    }
    serde_json::to_string(&values).map_err(|e| ExecutionError::Storage(e.to_string()))
}

/// Materialized table storage.
///
/// `upsert` merges rows by the table's upsert constraints; `append` only
/// adds. Both must leave the table untouched when they fail.
#[async_trait]
pub trait TableStore: Send + Sync {
    async fn upsert(&self, table: &Table, rows: RowSet) -> Result<ReconcileSummary, ExecutionError>;

    async fn append(&self, table: &Table, rows: RowSet) -> Result<ReconcileSummary, ExecutionError>;

    /// Current contents of a table; empty if never written.
    async fn rows(&self, table: &Table) -> Result<RowSet, ExecutionError>;
}

#[derive(Debug, Default)]
struct StoredTable {
    columns: Vec<String>,
    rows: Vec<Row>,
    index: HashMap<String, usize>,
}

impl StoredTable {
    fn merge_columns(&mut self, columns: &[String]) {
        for column in columns {
            if !self.columns.contains(column) {
                self.columns.push(column.clone());
            }
        }
    }
}

/// In-process store, keyed by table id.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<TableId, StoredTable>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TableStore for MemoryStore {
    async fn upsert(&self, table: &Table, rows: RowSet) -> Result<ReconcileSummary, ExecutionError> {
        // Compute every key first so a bad row leaves the table as it was.
        let keys = rows
            .rows
            .iter()
            .map(|row| row_key(table, row))
            .collect::<Result<Vec<_>, _>>()?;

        let mut tables = self.tables.write().await;
        let stored = tables.entry(table.id.clone()).or_default();
        stored.merge_columns(&rows.columns);

        let mut summary = ReconcileSummary::default();
        for (key, row) in keys.into_iter().zip(rows.rows) {
            match stored.index.get(&key) {
                Some(&pos) => {
                    stored.rows[pos] = row;
                    summary.replaced += 1;
                }
                None => {
                    stored.index.insert(key, stored.rows.len());
                    stored.rows.push(row);
                    summary.inserted += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn append(&self, table: &Table, rows: RowSet) -> Result<ReconcileSummary, ExecutionError> {
        let mut tables = self.tables.write().await;
        let stored = tables.entry(table.id.clone()).or_default();
        stored.merge_columns(&rows.columns);

        let inserted = rows.rows.len();
        stored.rows.extend(rows.rows);
        Ok(ReconcileSummary {
            inserted,
            replaced: 0,
        })
    }

    async fn rows(&self, table: &Table) -> Result<RowSet, ExecutionError> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(&table.id)
            .map(|stored| RowSet::new(stored.columns.clone(), stored.rows.clone()))
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn keyed() -> Table {
        Table::sql("daily_agg", "SELECT 1").with_upsert_constraints(["day"])
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_replaces() {
        let store = MemoryStore::new();
        let table = keyed();

        let first = RowSet::from_rows(vec![
            row(json!({"day": "2024-01-01", "n": 1})),
            row(json!({"day": "2024-01-02", "n": 2})),
        ]);
        let summary = store.upsert(&table, first).await.unwrap();
        assert_eq!(summary, ReconcileSummary { inserted: 2, replaced: 0 });

        let second = RowSet::from_rows(vec![row(json!({"day": "2024-01-02", "n": 5}))]);
        let summary = store.upsert(&table, second).await.unwrap();
        assert_eq!(summary, ReconcileSummary { inserted: 0, replaced: 1 });

        let stored = store.rows(&table).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored.rows[1]["n"], json!(5));
    }

    #[tokio::test]
    async fn test_later_row_in_batch_wins() {
        let store = MemoryStore::new();
        let table = keyed();
        let rows = RowSet::from_rows(vec![
            row(json!({"day": "d", "n": 1})),
            row(json!({"day": "d", "n": 2})),
        ]);
        store.upsert(&table, rows).await.unwrap();
        let stored = store.rows(&table).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored.rows[0]["n"], json!(2));
    }

    #[tokio::test]
    async fn test_missing_key_column_leaves_table_untouched() {
        let store = MemoryStore::new();
        let table = keyed();
        store
            .upsert(&table, RowSet::from_rows(vec![row(json!({"day": "d", "n": 1}))]))
            .await
            .unwrap();

        let bad = RowSet::from_rows(vec![
            row(json!({"day": "e", "n": 2})),
            row(json!({"n": 3})),
        ]);
        let err = store.upsert(&table, bad).await.unwrap_err();
        assert_eq!(
            err,
            ExecutionError::MissingKeyColumn {
                table: "daily_agg".to_string(),
                column: "day".to_string()
            }
        );
        assert_eq!(store.rows(&table).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_append_accumulates() {
        let store = MemoryStore::new();
        let table = Table::sql("events", "SELECT 1");
        let rows = RowSet::from_rows(vec![row(json!({"v": 1}))]);
        store.append(&table, rows.clone()).await.unwrap();
        store.append(&table, rows).await.unwrap();
        assert_eq!(store.rows(&table).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_table_is_empty() {
        let store = MemoryStore::new();
        let rows = store.rows(&Table::sql("nothing", "SELECT 1")).await.unwrap();
        assert!(rows.is_empty());
        assert!(rows.columns.is_empty());
    }

    #[test]
    fn test_row_key_distinguishes_types() {
        let table = Table::sql("t", "SELECT 1").with_upsert_constraints(["k"]);
        let a = row_key(&table, &row(json!({"k": 1}))).unwrap();
        let b = row_key(&table, &row(json!({"k": "1"}))).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_rows_collects_columns() {
        let rows = RowSet::from_rows(vec![row(json!({"a": 1})), row(json!({"a": 2, "b": 3}))]);
        assert_eq!(rows.columns, vec!["a", "b"]);
    }
}
