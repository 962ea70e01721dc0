//! Tableflow DuckDB backend
//!
//! Runs table definitions on an embedded DuckDB database and materializes
//! their results as DuckDB tables, so one connection serves as both the
//! [`SqlEngine`](tableflow_core::SqlEngine) and the
//! [`TableStore`](tableflow_core::TableStore) of a workflow.

pub mod config;
pub mod engine;
pub mod error;
mod store;

pub use config::DuckdbConfig;
pub use engine::DuckdbEngine;
pub use error::DuckdbError;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use tableflow_core::{
        CoordinatorConfig, Table, TableExecutor, TableStatus, Window, WindowConfig,
        WindowCoordinator, Workflow,
    };

    use super::*;

    const SEED: &str = "
        CREATE TABLE source_orders (order_id INTEGER, created_at TIMESTAMP, amount DOUBLE);
        INSERT INTO source_orders VALUES
            (1, TIMESTAMP '2024-03-01 00:05:00', 10.0),
            (2, TIMESTAMP '2024-03-01 00:40:00', 15.5),
            (3, TIMESTAMP '2024-03-01 01:10:00', 7.0);
    ";

    fn workflow() -> Workflow {
        Workflow::new("orders")
            .with_window(WindowConfig::tumbling(Duration::hours(1)))
            .with_table(
                Table::sql("raw", "SELECT * FROM source_orders")
                    .with_time_column("created_at")
                    .with_upsert_constraints(["order_id"]),
            )
            .unwrap()
            .with_table(
                Table::sql(
                    "hourly_totals",
                    "SELECT TIMESTAMP '{{ window_start }}' AS hour, count(*) AS orders, sum(amount) AS total \
                     FROM raw WHERE created_at >= TIMESTAMP '{{ window_start }}' \
                     AND created_at < TIMESTAMP '{{ window_end }}'",
                )
                .with_upsert_constraints(["hour"]),
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_windows_materialize_downstream_tables() {
        let engine = Arc::new(DuckdbEngine::in_memory().unwrap());
        engine.execute_batch(SEED).await.unwrap();

        let executor = Arc::new(TableExecutor::new(engine.clone(), engine.clone()));
        let coordinator =
            WindowCoordinator::new(&workflow(), executor, CoordinatorConfig::default()).unwrap();

        let first = Window::new(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(), Duration::hours(1));
        let report = coordinator.run_window(first).await;
        assert!(report.is_success(), "{report:?}");
        assert_eq!(
            report.outcome("raw").unwrap().status,
            TableStatus::Completed {
                rows: 2,
                inserted: 2,
                replaced: 0
            }
        );

        // Re-running the same window changes nothing.
        coordinator.run_window(first).await;
        let report = coordinator.run_window(first.next()).await;
        assert!(report.is_success(), "{report:?}");

        let raw = engine
            .query_rows("SELECT order_id FROM raw ORDER BY order_id")
            .await
            .unwrap();
        assert_eq!(raw.len(), 3);

        let totals = engine
            .query_rows("SELECT hour, orders, total FROM hourly_totals ORDER BY hour")
            .await
            .unwrap();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals.rows[0]["hour"], "2024-03-01 00:00:00");
        assert_eq!(totals.rows[0]["orders"], 2);
        assert_eq!(totals.rows[0]["total"], 25.5);
        assert_eq!(totals.rows[1]["orders"], 1);
    }
}
