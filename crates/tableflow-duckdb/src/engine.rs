//! DuckDB SQL engine.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveTime};
use duckdb::types::{TimeUnit, Value};
use duckdb::{Connection, ToSql};
use tracing::{debug, info};

use tableflow_core::engine::quote_identifier;
use tableflow_core::{ExecutionError, RowSet, SqlEngine, Window};

use crate::config::DuckdbConfig;
use crate::error::DuckdbError;

/// Days from 0001-01-01 (CE) to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// SQL engine and table store backed by a single DuckDB connection.
///
/// DuckDB is synchronous, so every call runs on the blocking pool while
/// holding the connection lock.
///
/// An engine returned by [`DuckdbEngine::scoped`] materializes tables in a
/// schema of their own and resolves names in that schema before `main`, so
/// workflows sharing a database never see each other's tables.
#[derive(Clone)]
pub struct DuckdbEngine {
    conn: Arc<Mutex<Connection>>,
    location: String,
    schema: Option<String>,
}

/// Schema holding the tables of workflow `workflow_id`.
pub fn schema_for(workflow_id: &str) -> String {
    let sanitized: String = workflow_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("wf_{sanitized}")
}

impl DuckdbEngine {
    pub fn open(config: &DuckdbConfig) -> Result<Self, DuckdbError> {
        let conn = match &config.path {
            Some(path) => Connection::open(path),
            None => Connection::open_in_memory(),
        }
        .map_err(|e| DuckdbError::Open(e.to_string()))?;

        if let Some(threads) = config.threads {
            conn.execute_batch(&format!("SET threads = {threads}"))?;
        }

        info!(database = config.location(), "Opened DuckDB database");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location: config.location().to_string(),
            schema: None,
        })
    }

    /// A second connection to the same database whose tables live in the
    /// schema of `workflow_id`. Source tables in `main` stay readable.
    pub async fn scoped(&self, workflow_id: &str) -> Result<Self, DuckdbError> {
        let schema = schema_for(workflow_id);
        let setup = format!(
            "CREATE SCHEMA IF NOT EXISTS {}; SET search_path = '{schema},main';",
            quote_identifier(&schema)
        );
        let conn = self
            .with_connection(move |conn| {
                let scoped = conn.try_clone()?;
                scoped.execute_batch(&setup)?;
                Ok(scoped)
            })
            .await?;

        info!(database = %self.location, schema = %schema, "Opened workflow schema");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location: self.location.clone(),
            schema: Some(schema),
        })
    }

    pub fn in_memory() -> Result<Self, DuckdbError> {
        Self::open(&DuckdbConfig::default())
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Schema written by this engine; `None` for the database default.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Run statements that return no rows, e.g. seeding source tables.
    pub async fn execute_batch(&self, sql: &str) -> Result<(), DuckdbError> {
        let sql = sql.to_string();
        self.with_connection(move |conn| Ok(conn.execute_batch(&sql)?))
            .await
    }

    /// Run a query and collect every row.
    pub async fn query_rows(&self, sql: &str) -> Result<RowSet, DuckdbError> {
        let sql = sql.to_string();
        self.with_connection(move |conn| query_rows(conn, &sql, &[]))
            .await
    }

    /// Run `f` on the blocking pool with exclusive access to the connection.
    pub(crate) async fn with_connection<F, T>(&self, f: F) -> Result<T, DuckdbError>
    where
        F: FnOnce(&mut Connection) -> Result<T, DuckdbError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|e| DuckdbError::Lock(e.to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| DuckdbError::Join(e.to_string()))?
    }
}

#[async_trait]
impl SqlEngine for DuckdbEngine {
    fn name(&self) -> &str {
        "duckdb"
    }

    async fn query(&self, sql: &str, window: &Window) -> Result<RowSet, ExecutionError> {
        debug!(
            database = %self.location,
            window_start = %window.start,
            window_end = %window.end,
            "Running DuckDB query"
        );
        Ok(self.query_rows(sql).await?)
    }
}

/// Prepare and run `sql`, converting every value to JSON.
pub(crate) fn query_rows(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<RowSet, DuckdbError> {
    let mut stmt = conn.prepare(sql)?;

    let mapped = stmt.query_map(params, |row| {
        let count = row.as_ref().column_count();
        let mut values = Vec::with_capacity(count);
        for idx in 0..count {
            let value: Value = row.get(idx)?;
            values.push(value_to_json(&value));
        }
        Ok(values)
    })?;

    let mut raw: Vec<Vec<serde_json::Value>> = Vec::new();
    for row in mapped {
        raw.push(row?);
    }

    // Column metadata is only complete once the statement has run.
    let columns: Vec<String> = (0..stmt.column_count())
        .map(|i| stmt.column_name(i).map_or("", |v| v).to_string())
        .collect();

    let rows = raw
        .into_iter()
        .map(|values| {
            columns
                .iter()
                .cloned()
                .zip(values)
                .collect::<serde_json::Map<_, _>>()
        })
        .collect();

    Ok(RowSet::new(columns, rows))
}

/// Bind a JSON value as a DuckDB parameter.
pub(crate) fn json_to_param(value: &serde_json::Value) -> Box<dyn ToSql> {
    match value {
        serde_json::Value::Null => Box::new(Option::<String>::None),
        serde_json::Value::Bool(b) => Box::new(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Box::new(i)
            } else if let Some(f) = n.as_f64() {
                Box::new(f)
            } else {
                Box::new(n.to_string())
            }
        }
        serde_json::Value::String(s) => Box::new(s.clone()),
        _ => Box::new(value.to_string()),
    }
}

fn timestamp_to_json(unit: &TimeUnit, value: i64) -> serde_json::Value {
    let micros = match unit {
        TimeUnit::Second => value.saturating_mul(1_000_000),
        TimeUnit::Millisecond => value.saturating_mul(1_000),
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    };
    match DateTime::from_timestamp_micros(micros) {
        Some(ts) => {
            let base = ts.format("%Y-%m-%d %H:%M:%S").to_string();
            match ts.timestamp_subsec_micros() {
                0 => serde_json::json!(base),
                frac => serde_json::json!(format!("{base}.{frac:06}")),
            }
        }
        None => serde_json::json!(value),
    }
}

fn time_to_json(unit: &TimeUnit, value: i64) -> serde_json::Value {
    let micros = match unit {
        TimeUnit::Second => value.saturating_mul(1_000_000),
        TimeUnit::Millisecond => value.saturating_mul(1_000),
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    };
    let seconds = u32::try_from(micros.div_euclid(1_000_000)).ok();
    let nanos = u32::try_from(micros.rem_euclid(1_000_000) * 1_000).ok();
    match seconds
        .zip(nanos)
        .and_then(|(s, n)| NaiveTime::from_num_seconds_from_midnight_opt(s, n))
    {
        Some(time) => serde_json::json!(time.format("%H:%M:%S%.f").to_string()),
        None => serde_json::json!(value),
    }
}

/// Convert a DuckDB value to JSON. Temporal values become
/// `YYYY-MM-DD HH:MM:SS` style strings so they can be written back into
/// timestamp columns.
pub(crate) fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::json!(*b),
        Value::TinyInt(n) => serde_json::json!(*n),
        Value::SmallInt(n) => serde_json::json!(*n),
        Value::Int(n) => serde_json::json!(*n),
        Value::BigInt(n) => serde_json::json!(*n),
        Value::HugeInt(n) => serde_json::json!(n.to_string()),
        Value::UTinyInt(n) => serde_json::json!(*n),
        Value::USmallInt(n) => serde_json::json!(*n),
        Value::UInt(n) => serde_json::json!(*n),
        Value::UBigInt(n) => serde_json::json!(*n),
        Value::Float(f) => serde_json::json!(*f),
        Value::Double(f) => serde_json::json!(*f),
        Value::Decimal(d) => serde_json::json!(d.to_string()),
        Value::Text(s) => serde_json::json!(s),
        Value::Blob(b) => serde_json::json!(base64::engine::general_purpose::STANDARD.encode(b)),
        Value::Timestamp(unit, t) => timestamp_to_json(unit, *t),
        Value::Date32(days) => days
            .checked_add(UNIX_EPOCH_DAYS_FROM_CE)
            .and_then(NaiveDate::from_num_days_from_ce_opt)
            .map(|d| serde_json::json!(d.format("%Y-%m-%d").to_string()))
            .unwrap_or_else(|| serde_json::json!(*days)),
        Value::Time64(unit, t) => time_to_json(unit, *t),
        Value::Interval {
            months,
            days,
            nanos,
        } => serde_json::json!({
            "months": months,
            "days": days,
            "nanos": nanos
        }),
        Value::List(list) => serde_json::Value::Array(list.iter().map(value_to_json).collect()),
        Value::Enum(s) => serde_json::json!(s),
        Value::Struct(fields) => serde_json::Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
        Value::Array(arr) => serde_json::Value::Array(arr.iter().map(value_to_json).collect()),
        Value::Map(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (format!("{:?}", k), value_to_json(v)))
                .collect(),
        ),
        Value::Union(inner) => value_to_json(inner),
        #[allow(unreachable_patterns)]
        other => serde_json::json!(format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn window() -> Window {
        Window::new(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(), Duration::hours(1))
    }

    #[tokio::test]
    async fn test_simple_query() {
        let engine = DuckdbEngine::in_memory().unwrap();
        let rows = engine
            .query("SELECT 1 AS num, 'hello' AS msg", &window())
            .await
            .unwrap();
        assert_eq!(rows.columns, vec!["num", "msg"]);
        assert_eq!(rows.rows[0]["num"], 1);
        assert_eq!(rows.rows[0]["msg"], "hello");
    }

    #[tokio::test]
    async fn test_temporal_values_are_formatted() {
        let engine = DuckdbEngine::in_memory().unwrap();
        let rows = engine
            .query_rows(
                "SELECT TIMESTAMP '2024-03-01 10:30:00' AS ts, \
                 TIMESTAMP '2024-03-01 10:30:00.25' AS frac, \
                 DATE '2024-03-01' AS d",
            )
            .await
            .unwrap();
        assert_eq!(rows.rows[0]["ts"], "2024-03-01 10:30:00");
        assert_eq!(rows.rows[0]["frac"], "2024-03-01 10:30:00.250000");
        assert_eq!(rows.rows[0]["d"], "2024-03-01");
    }

    #[tokio::test]
    async fn test_empty_result_keeps_columns() {
        let engine = DuckdbEngine::in_memory().unwrap();
        let rows = engine
            .query_rows("SELECT 1 AS a, 2 AS b WHERE false")
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert_eq!(rows.columns, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_invalid_sql_is_an_engine_error() {
        let engine = DuckdbEngine::in_memory().unwrap();
        let err = engine
            .query("SELECT * FROM missing_relation", &window())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Engine(_)));
    }

    #[tokio::test]
    async fn test_wide_rows_keep_every_column() {
        let engine = DuckdbEngine::in_memory().unwrap();
        let rows = engine
            .query_rows(
                "SELECT 1 AS a, INTERVAL 1 DAY AS i, [1, 2] AS l, CAST(NULL AS INTEGER) AS n, 'z' AS z",
            )
            .await
            .unwrap();
        assert_eq!(rows.columns, vec!["a", "i", "l", "n", "z"]);
        assert_eq!(rows.rows[0].len(), 5);
        assert_eq!(rows.rows[0]["n"], serde_json::Value::Null);
        assert_eq!(rows.rows[0]["l"], serde_json::json!([1, 2]));
        assert_eq!(rows.rows[0]["z"], "z");
    }

    #[test]
    fn test_schema_names_are_sanitized() {
        assert_eq!(schema_for("wf-Orders.1"), "wf_wf_orders_1");
    }

    #[tokio::test]
    async fn test_scoped_engine_reads_main_and_writes_own_schema() {
        let engine = DuckdbEngine::in_memory().unwrap();
        engine
            .execute_batch("CREATE TABLE src AS SELECT 7 AS v")
            .await
            .unwrap();

        let scoped = engine.scoped("wf-a").await.unwrap();
        assert_eq!(scoped.schema(), Some("wf_wf_a"));
        scoped
            .execute_batch("CREATE TABLE wf_wf_a.copied AS SELECT * FROM src")
            .await
            .unwrap();

        let rows = scoped.query_rows("SELECT v FROM copied").await.unwrap();
        assert_eq!(rows.rows[0]["v"], 7);
        assert!(engine.query_rows("SELECT * FROM copied").await.is_err());
    }

    #[tokio::test]
    async fn test_seed_then_query() {
        let engine = DuckdbEngine::in_memory().unwrap();
        engine
            .execute_batch(
                "CREATE TABLE events (id INTEGER, name VARCHAR); \
                 INSERT INTO events VALUES (1, 'Alice'), (2, 'Bob');",
            )
            .await
            .unwrap();
        let rows = engine
            .query_rows("SELECT name FROM events ORDER BY id")
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.rows[1]["name"], "Bob");
    }

    #[tokio::test]
    async fn test_file_backed_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.duckdb");
        let config = DuckdbConfig::default().with_path(path.to_string_lossy());

        {
            let engine = DuckdbEngine::open(&config).unwrap();
            engine
                .execute_batch("CREATE TABLE kept AS SELECT 42 AS answer")
                .await
                .unwrap();
        }

        let engine = DuckdbEngine::open(&config).unwrap();
        let rows = engine.query_rows("SELECT answer FROM kept").await.unwrap();
        assert_eq!(rows.rows[0]["answer"], 42);
    }
}
