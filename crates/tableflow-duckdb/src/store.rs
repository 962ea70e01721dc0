//! Table storage inside DuckDB.
//!
//! Each workflow table is materialized as a DuckDB table of the same name,
//! in the engine's workflow schema when it has one, so downstream
//! definitions can select from it directly. The schema is
//! created from the first non-empty result and widened with new columns as
//! they appear; column types are inferred from the JSON values.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use duckdb::{Connection, ToSql};
use serde_json::Value;
use tracing::debug;

use tableflow_core::engine::store::row_key;
use tableflow_core::engine::{quote_identifier, ReconcileSummary, Row, RowSet, TableStore};
use tableflow_core::{ExecutionError, Table};

use crate::engine::{json_to_param, query_rows, DuckdbEngine};
use crate::error::{storage_error, DuckdbError};

const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Column type for a JSON value, `None` for nulls.
fn sql_type_of(value: &Value) -> Option<&'static str> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some("BOOLEAN"),
        Value::Number(n) if n.is_i64() => Some("BIGINT"),
        Value::Number(n) if n.is_u64() => Some("UBIGINT"),
        Value::Number(_) => Some("DOUBLE"),
        Value::String(s) => {
            if TIMESTAMP_FORMATS
                .iter()
                .any(|f| NaiveDateTime::parse_from_str(s, f).is_ok())
            {
                Some("TIMESTAMP")
            } else if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() {
                Some("DATE")
            } else {
                Some("VARCHAR")
            }
        }
        Value::Array(_) | Value::Object(_) => Some("VARCHAR"),
    }
}

/// Type of `column` inferred from the first non-null value in `rows`.
fn infer_column_type(column: &str, rows: &[Row]) -> &'static str {
    rows.iter()
        .filter_map(|row| row.get(column))
        .find_map(sql_type_of)
        .unwrap_or("VARCHAR")
}

/// Quoted, schema-qualified name of `table`.
fn relation(schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(schema) => format!("{}.{}", quote_identifier(schema), quote_identifier(table)),
        None => quote_identifier(table),
    }
}

/// `(name, data_type)` for every column of `table`, in ordinal order.
fn table_columns(
    conn: &Connection,
    schema: Option<&str>,
    table: &str,
) -> Result<Vec<(String, String)>, DuckdbError> {
    let mut stmt = conn.prepare(
        "SELECT column_name, data_type FROM information_schema.columns \
         WHERE table_name = ? AND table_schema = COALESCE(?, current_schema()) \
         ORDER BY ordinal_position",
    )?;
    let mapped = stmt.query_map(duckdb::params![table, schema], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut columns = Vec::new();
    for column in mapped {
        columns.push(column?);
    }
    Ok(columns)
}

fn find_type<'a>(schema: &'a [(String, String)], column: &str) -> Option<&'a str> {
    schema
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(column))
        .map(|(_, ty)| ty.as_str())
}

/// Create or widen the table so it can hold `rows`.
fn ensure_table(
    conn: &Connection,
    schema: Option<&str>,
    table: &Table,
    columns: &[String],
    rows: &[Row],
) -> Result<Vec<(String, String)>, DuckdbError> {
    let name = relation(schema, &table.name);
    let existing = table_columns(conn, schema, &table.name)?;

    if existing.is_empty() {
        let definitions: Vec<String> = columns
            .iter()
            .map(|c| format!("{} {}", quote_identifier(c), infer_column_type(c, rows)))
            .collect();
        let ddl = format!("CREATE TABLE {name} ({})", definitions.join(", "));
        debug!(table = %table.name, ddl = %ddl, "Creating table");
        conn.execute_batch(&ddl)?;
    } else {
        for column in columns {
            if find_type(&existing, column).is_none() {
                let ddl = format!(
                    "ALTER TABLE {name} ADD COLUMN {} {}",
                    quote_identifier(column),
                    infer_column_type(column, rows)
                );
                debug!(table = %table.name, ddl = %ddl, "Adding column");
                conn.execute_batch(&ddl)?;
            }
        }
    }

    table_columns(conn, schema, &table.name)
}

/// Drop earlier rows that share a key with a later one, keeping the later
/// row at the earlier position. Returns the rows and the number dropped.
fn dedup_by_key(table: &Table, rows: Vec<Row>) -> Result<(Vec<Row>, usize), ExecutionError> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<Row> = Vec::with_capacity(rows.len());
    let mut dropped = 0;
    for row in rows {
        let key = row_key(table, &row)?;
        match positions.get(&key) {
            Some(&pos) => {
                unique[pos] = row;
                dropped += 1;
            }
            None => {
                positions.insert(key, unique.len());
                unique.push(row);
            }
        }
    }
    Ok((unique, dropped))
}

fn write_rows(
    conn: &mut Connection,
    schema: Option<&str>,
    table: &Table,
    rows: RowSet,
    upsert: bool,
) -> Result<ReconcileSummary, DuckdbError> {
    let (data, duplicates) = if upsert {
        dedup_by_key(table, rows.rows)?
    } else {
        (rows.rows, 0)
    };

    let mut summary = ReconcileSummary {
        inserted: 0,
        replaced: duplicates,
    };
    if data.is_empty() {
        return Ok(summary);
    }

    let types = ensure_table(conn, schema, table, &rows.columns, &data)?;
    let name = relation(schema, &table.name);
    let cast = |column: &str| {
        format!(
            "CAST(? AS {})",
            find_type(&types, column).unwrap_or("VARCHAR")
        )
    };

    let delete_sql = format!(
        "DELETE FROM {name} WHERE {}",
        table
            .upsert_constraints
            .iter()
            .map(|c| format!("{} IS NOT DISTINCT FROM {}", quote_identifier(c), cast(c.as_str())))
            .collect::<Vec<_>>()
            .join(" AND ")
    );

    let tx = conn.transaction()?;
    for row in &data {
        let mut existed = false;
        if upsert {
            let keys: Vec<Box<dyn ToSql>> = table
                .upsert_constraints
                .iter()
                .map(|c| json_to_param(row.get(c).unwrap_or(&Value::Null)))
                .collect();
            let params: Vec<&dyn ToSql> = keys.iter().map(|p| p.as_ref()).collect();
            existed = tx.execute(&delete_sql, params.as_slice())? > 0;
        }

        let columns: Vec<&String> = row.keys().collect();
        let values: Vec<Box<dyn ToSql>> = row.values().map(json_to_param).collect();
        let params: Vec<&dyn ToSql> = values.iter().map(|p| p.as_ref()).collect();
        let insert_sql = format!(
            "INSERT INTO {name} ({}) VALUES ({})",
            columns
                .iter()
                .map(|c| quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", "),
            columns
                .iter()
                .map(|c| cast(c.as_str()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        tx.execute(&insert_sql, params.as_slice())?;

        if existed {
            summary.replaced += 1;
        } else {
            summary.inserted += 1;
        }
    }
    tx.commit()?;

    Ok(summary)
}

#[async_trait]
impl TableStore for DuckdbEngine {
    async fn upsert(&self, table: &Table, rows: RowSet) -> Result<ReconcileSummary, ExecutionError> {
        let table = table.clone();
        let schema = self.schema().map(str::to_string);
        self.with_connection(move |conn| write_rows(conn, schema.as_deref(), &table, rows, true))
            .await
            .map_err(storage_error)
    }

    async fn append(&self, table: &Table, rows: RowSet) -> Result<ReconcileSummary, ExecutionError> {
        let table = table.clone();
        let schema = self.schema().map(str::to_string);
        self.with_connection(move |conn| write_rows(conn, schema.as_deref(), &table, rows, false))
            .await
            .map_err(storage_error)
    }

    async fn rows(&self, table: &Table) -> Result<RowSet, ExecutionError> {
        let name = table.name.clone();
        let schema = self.schema().map(str::to_string);
        self.with_connection(move |conn| {
            let schema = schema.as_deref();
            if table_columns(conn, schema, &name)?.is_empty() {
                return Ok(RowSet::default());
            }
            query_rows(conn, &format!("SELECT * FROM {}", relation(schema, &name)), &[])
        })
        .await
        .map_err(storage_error)
    }
}
