//! Table executor: renders a table for a window, runs it on the engine and
//! reconciles the result into storage.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minijinja::{context, Environment, UndefinedBehavior};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ExecutionError;
use crate::graph::extractor::filters_on_column;
use crate::model::{FunctionType, Table, TableId, Window};

use super::store::{ReconcileSummary, RowSet, TableStore};

/// Alias given to the user's query when a window filter is injected.
pub const WINDOW_ALIAS: &str = "__tableflow_window";

const TEMPLATE_WINDOW_VARS: &[&str] = &["window_start", "window_end"];

/// External SQL engine.
#[async_trait]
pub trait SqlEngine: Send + Sync {
    /// Engine name for logs.
    fn name(&self) -> &str;

    /// Run a fully rendered query for `window`.
    async fn query(&self, sql: &str, window: &Window) -> Result<RowSet, ExecutionError>;
}

/// Result of executing one table for one window.
#[derive(Debug, Clone, PartialEq)]
pub struct TableOutput {
    pub rows: RowSet,
    pub reconcile: ReconcileSummary,
}

/// Quote a SQL identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `YYYY-MM-DD HH:MM:SS`, with milliseconds only when non-zero.
pub fn format_timestamp(instant: &DateTime<Utc>) -> String {
    let base = instant.format("%Y-%m-%d %H:%M:%S").to_string();
    match instant.timestamp_subsec_millis() {
        0 => base,
        millis => format!("{base}.{millis:03}"),
    }
}

fn is_template(text: &str) -> bool {
    text.contains("{{") || text.contains("{%")
}

/// Executes tables against an engine and a store.
///
/// Holds one async lock per table id so two executions of the same table
/// never reconcile concurrently.
pub struct TableExecutor {
    engine: Arc<dyn SqlEngine>,
    store: Arc<dyn TableStore>,
    templates: Environment<'static>,
    locks: Mutex<HashMap<TableId, Arc<Mutex<()>>>>,
}

impl TableExecutor {
    pub fn new(engine: Arc<dyn SqlEngine>, store: Arc<dyn TableStore>) -> Self {
        let mut templates = Environment::new();
        templates.set_undefined_behavior(UndefinedBehavior::Strict);
        Self {
            engine,
            store,
            templates,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<dyn SqlEngine> {
        &self.engine
    }

    pub fn store(&self) -> &Arc<dyn TableStore> {
        &self.store
    }

    /// Produce the SQL sent to the engine for `table` over `window`.
    ///
    /// A window filter on `timeColumn` is injected unless the definition
    /// already restricts the window, either through the `window_start` /
    /// `window_end` template variables or with its own `WHERE`/`ON`
    /// predicate on that column.
    pub fn render(&self, table: &Table, window: &Window) -> Result<String, ExecutionError> {
        if table.function_type != FunctionType::Sql {
            return Err(ExecutionError::UnsupportedFunctionType(table.function_type));
        }

        let start = format_timestamp(&window.start);
        let end = format_timestamp(&window.end);

        let (body, windowed_template) = if is_template(&table.definition) {
            let template = self.templates.template_from_str(&table.definition)?;
            let variables = template.undeclared_variables(false);
            let windowed = TEMPLATE_WINDOW_VARS.iter().any(|v| variables.contains(*v));
            let ctx = context! {
                window_start => start.as_str(),
                window_end => end.as_str(),
                window_size_seconds => window.size().num_seconds(),
                table_name => table.name.as_str(),
            };
            (template.render(ctx)?, windowed)
        } else {
            (table.definition.clone(), false)
        };

        let Some(column) = table.time_column.as_deref() else {
            return Ok(body);
        };
        if windowed_template {
            return Ok(body);
        }
        if filters_on_column(&body, column) {
            debug!(
                table = %table.name,
                time_column = column,
                "Definition already filters on the time column, no window filter injected"
            );
            return Ok(body);
        }

        let inner = body.trim().trim_end_matches(';').trim_end();
        Ok(format!(
            "SELECT * FROM ({inner}) AS {WINDOW_ALIAS} WHERE {col} >= TIMESTAMP '{start}' AND {col} < TIMESTAMP '{end}'",
            col = quote_identifier(column),
        ))
    }

    async fn table_lock(&self, id: &TableId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(id.clone()).or_default().clone()
    }

    /// Drop the map entry once no other execution holds or waits on it.
    async fn release_lock(&self, id: &TableId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        drop(lock);
        if locks.get(id).is_some_and(|entry| Arc::strong_count(entry) == 1) {
            locks.remove(id);
        }
    }

    /// Execute and reconcile one table for one window.
    pub async fn execute(
        &self,
        table: &Table,
        window: &Window,
    ) -> Result<TableOutput, ExecutionError> {
        let lock = self.table_lock(&table.id).await;
        let result = {
            let _guard = lock.lock().await;
            self.execute_locked(table, window).await
        };
        self.release_lock(&table.id, lock).await;
        result
    }

    async fn execute_locked(
        &self,
        table: &Table,
        window: &Window,
    ) -> Result<TableOutput, ExecutionError> {
        let sql = self.render(table, window)?;
        debug!(
            table = %table.name,
            engine = self.engine.name(),
            window_start = %window.start,
            window_end = %window.end,
            sql = %sql,
            "Executing table"
        );

        let rows = self.engine.query(&sql, window).await?;
        let reconcile = if table.is_append_only() {
            self.store.append(table, rows.clone()).await?
        } else {
            self.store.upsert(table, rows.clone()).await?
        };

        Ok(TableOutput { rows, reconcile })
    }
}
