//! Window coordinator.
//!
//! One coordinator drives one workflow through consecutive tumbling windows:
//!
//! ```text
//! Idle -> Scheduled -> Running -> Idle -> ...
//!            \            \
//!             +------------+--> Stopped   (on Stop or when the handle is dropped)
//! ```
//!
//! `Scheduled` waits for the window end on the tokio timer. `Running` executes
//! every table in plan order. A failed table never aborts the window; only
//! its transitive dependents are skipped. Windows are gapless: the next one
//! always starts at the previous end, so a coordinator that falls behind
//! catches up back to back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::CoordinatorConfig;
use crate::error::{ExecutionError, WorkflowError};
use crate::graph::ExecutionPlan;
use crate::model::{Window, WindowConfig, Workflow, WorkflowId};

use super::executor::TableExecutor;
use super::state::{CoordinatorState, TableOutcome, TableStatus, WindowReport};

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Commands accepted by a running coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorCommand {
    /// Cancel the pending wait or abandon the in-flight window, then exit.
    Stop,
}

pub struct WindowCoordinator {
    workflow_id: WorkflowId,
    workflow_name: String,
    window: WindowConfig,
    plan: ExecutionPlan,
    executor: Arc<TableExecutor>,
    config: CoordinatorConfig,
    clock: Arc<dyn Clock>,
    reports: Option<mpsc::Sender<WindowReport>>,
    start_at: Option<DateTime<Utc>>,
}

impl WindowCoordinator {
    /// Plan the workflow; fails if it is not runnable.
    pub fn new(
        workflow: &Workflow,
        executor: Arc<TableExecutor>,
        config: CoordinatorConfig,
    ) -> Result<Self, WorkflowError> {
        let plan = workflow.plan()?;
        Ok(Self {
            workflow_id: workflow.id.clone(),
            workflow_name: workflow.name.clone(),
            window: workflow.window.clone(),
            plan,
            executor,
            config,
            clock: Arc::new(SystemClock),
            reports: None,
            start_at: None,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Publish every finished window on `reports`.
    pub fn with_reports(mut self, reports: mpsc::Sender<WindowReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    /// Seed the first window from `instant` instead of the current time.
    pub fn starting_at(mut self, instant: DateTime<Utc>) -> Self {
        self.start_at = Some(instant);
        self
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    /// The window the coordinator begins with.
    pub fn first_window(&self) -> Window {
        let seed = self.start_at.unwrap_or_else(|| self.clock.now());
        self.window.window_containing(seed)
    }

    /// Execute every table once for `window`.
    pub async fn run_window(&self, window: Window) -> WindowReport {
        let started_at = self.clock.now();
        info!(
            workflow = %self.workflow_name,
            window_start = %window.start,
            window_end = %window.end,
            tables = self.plan.len(),
            "Window started"
        );

        let parallelism = self.config.parallelism();
        let batches: Vec<Vec<usize>> = if parallelism == 1 {
            self.plan.order().iter().map(|idx| vec![*idx]).collect()
        } else {
            self.plan.levels().to_vec()
        };

        let mut statuses: Vec<Option<TableStatus>> = vec![None; self.plan.len()];
        let mut outcomes = Vec::with_capacity(self.plan.len());
        let semaphore = Semaphore::new(parallelism);

        for batch in batches {
            let mut runnable = Vec::with_capacity(batch.len());
            for idx in batch {
                match self.blocked_by(idx, &statuses) {
                    Some(upstream) => {
                        let table = self.plan.table(idx);
                        debug!(
                            workflow = %self.workflow_name,
                            table = %table.name,
                            upstream = %upstream,
                            "Skipping table with failed dependency"
                        );
                        let status = TableStatus::DependencyFailed { upstream };
                        outcomes.push(self.outcome(idx, status.clone(), 0));
                        statuses[idx] = Some(status);
                    }
                    None => runnable.push(idx),
                }
            }

            let runs = runnable.iter().map(|&idx| {
                let semaphore = &semaphore;
                async move {
                    let _permit = semaphore.acquire().await;
                    self.run_table(idx, &window).await
                }
            });
            for (idx, status, duration_ms) in futures::future::join_all(runs).await {
                outcomes.push(self.outcome(idx, status.clone(), duration_ms));
                statuses[idx] = Some(status);
            }
        }

        let report = WindowReport {
            workflow_id: self.workflow_id.clone(),
            workflow_name: self.workflow_name.clone(),
            window,
            outcomes,
            started_at,
            finished_at: self.clock.now(),
        };

        info!(
            workflow = %self.workflow_name,
            window_start = %window.start,
            window_end = %window.end,
            completed = report.completed(),
            failed = report.failed(),
            skipped = report.skipped(),
            "Window finished"
        );

        if let Some(reports) = &self.reports {
            if reports.send(report.clone()).await.is_err() {
                debug!(workflow = %self.workflow_name, "Report receiver dropped");
            }
        }

        report
    }

    /// Name of the first direct dependency that failed or was skipped.
    fn blocked_by(&self, idx: usize, statuses: &[Option<TableStatus>]) -> Option<String> {
        self.plan
            .graph()
            .dependencies(idx)
            .iter()
            .find(|dep| {
                statuses[**dep]
                    .as_ref()
                    .is_some_and(TableStatus::blocks_dependents)
            })
            .map(|dep| self.plan.table(*dep).name.clone())
    }

    async fn run_table(&self, idx: usize, window: &Window) -> (usize, TableStatus, u64) {
        let table = self.plan.table(idx);
        let started = tokio::time::Instant::now();

        let result = match self.config.table_timeout() {
            Some(limit) => {
                match tokio::time::timeout(limit, self.executor.execute(table, window)).await {
                    Ok(result) => result,
                    Err(_) => Err(ExecutionError::Timeout(limit)),
                }
            }
            None => self.executor.execute(table, window).await,
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let status = match result {
            Ok(output) => {
                info!(
                    workflow = %self.workflow_name,
                    table = %table.name,
                    rows = output.rows.len(),
                    inserted = output.reconcile.inserted,
                    replaced = output.reconcile.replaced,
                    duration_ms,
                    "Table completed"
                );
                TableStatus::Completed {
                    rows: output.rows.len(),
                    inserted: output.reconcile.inserted,
                    replaced: output.reconcile.replaced,
                }
            }
            Err(e) => {
                error!(
                    workflow = %self.workflow_name,
                    table = %table.name,
                    window_start = %window.start,
                    error = %e,
                    "Table failed"
                );
                TableStatus::Failed {
                    error: e.to_string(),
                }
            }
        };

        (idx, status, duration_ms)
    }

    fn outcome(&self, idx: usize, status: TableStatus, duration_ms: u64) -> TableOutcome {
        let table = self.plan.table(idx);
        TableOutcome {
            table_id: table.id.clone(),
            table_name: table.name.clone(),
            status,
            duration_ms,
        }
    }

    fn until(&self, instant: DateTime<Utc>) -> std::time::Duration {
        (instant - self.clock.now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }

    /// Run windows on a background task until stopped.
    pub fn spawn(self) -> CoordinatorHandle {
        let (commands, mut command_rx) = mpsc::channel(8);
        let (state_tx, state) = watch::channel(CoordinatorState::Idle);

        let task = tokio::spawn(async move {
            self.run_loop(&mut command_rx, &state_tx).await;
            state_tx.send_replace(CoordinatorState::Stopped);
            info!(workflow = %self.workflow_name, "Coordinator stopped");
        });

        CoordinatorHandle {
            commands,
            state,
            task,
        }
    }

    async fn run_loop(
        &self,
        commands: &mut mpsc::Receiver<CoordinatorCommand>,
        state: &watch::Sender<CoordinatorState>,
    ) {
        let mut window = self.first_window();

        loop {
            state.send_replace(CoordinatorState::Idle);

            let wait = self.until(window.end);
            state.send_replace(CoordinatorState::Scheduled);
            debug!(
                workflow = %self.workflow_name,
                window_start = %window.start,
                window_end = %window.end,
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                "Window scheduled"
            );

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                command = commands.recv() => {
                    match command {
                        Some(CoordinatorCommand::Stop) | None => return,
                    }
                }
            }

            state.send_replace(CoordinatorState::Running);
            tokio::select! {
                _ = self.run_window(window) => {}
                command = commands.recv() => {
                    match command {
                        Some(CoordinatorCommand::Stop) | None => {
                            warn!(
                                workflow = %self.workflow_name,
                                window_start = %window.start,
                                "Abandoning in-flight window"
                            );
                            return;
                        }
                    }
                }
            }

            window = window.next();
        }
    }
}

/// Control handle for a spawned coordinator.
pub struct CoordinatorHandle {
    commands: mpsc::Sender<CoordinatorCommand>,
    state: watch::Receiver<CoordinatorState>,
    task: JoinHandle<()>,
}

impl CoordinatorHandle {
    pub fn state(&self) -> CoordinatorState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the coordinator and wait for its task to exit.
    pub async fn stop(self) {
        // Fails only if the task already exited.
        let _ = self.commands.send(CoordinatorCommand::Stop).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "Coordinator task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::executor::SqlEngine;
    use crate::engine::store::{MemoryStore, RowSet};
    use crate::model::Table;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    /// Fails any query mentioning `fail_on`; sleeps for `delay` otherwise.
    struct ScriptedEngine {
        fail_on: &'static str,
        delay: std::time::Duration,
    }

    #[async_trait]
    impl SqlEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn query(&self, sql: &str, window: &Window) -> Result<RowSet, ExecutionError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if sql.contains(self.fail_on) {
                return Err(ExecutionError::Engine(format!("relation {} is broken", self.fail_on)));
            }
            let row = json!({"window_start": window.start.to_rfc3339(), "n": 1});
            Ok(RowSet::from_rows(row.as_object().cloned().into_iter().collect()))
        }
    }

    /// Wall clock that follows tokio's (possibly paused) timer.
    struct TokioClock {
        base: DateTime<Utc>,
        origin: tokio::time::Instant,
    }

    impl Clock for TokioClock {
        fn now(&self) -> DateTime<Utc> {
            let elapsed = Duration::from_std(self.origin.elapsed()).unwrap_or_else(|_| Duration::zero());
            self.base + elapsed
        }
    }

    fn midnight() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn pipeline() -> Workflow {
        Workflow::new("orders")
            .with_id("wf-orders")
            .with_table(Table::sql("raw", "SELECT * FROM landing"))
            .unwrap()
            .with_table(Table::sql("daily_agg", "SELECT * FROM raw JOIN broken_source ON true"))
            .unwrap()
            .with_table(Table::sql("summary", "SELECT * FROM daily_agg"))
            .unwrap()
            .with_table(Table::sql("raw_copy", "SELECT * FROM landing"))
            .unwrap()
    }

    fn coordinator(config: CoordinatorConfig, delay: std::time::Duration) -> WindowCoordinator {
        let engine = Arc::new(ScriptedEngine {
            fail_on: "broken_source",
            delay,
        });
        let executor = Arc::new(TableExecutor::new(engine, Arc::new(MemoryStore::new())));
        WindowCoordinator::new(&pipeline(), executor, config).unwrap()
    }

    fn assert_failure_policy(report: &WindowReport) {
        assert!(report.outcome("raw").unwrap().status.is_completed());
        assert!(matches!(
            report.outcome("daily_agg").unwrap().status,
            TableStatus::Failed { .. }
        ));
        assert_eq!(
            report.outcome("summary").unwrap().status,
            TableStatus::DependencyFailed {
                upstream: "daily_agg".to_string()
            }
        );
        assert!(report.outcome("raw_copy").unwrap().status.is_completed());
        assert_eq!((report.completed(), report.failed(), report.skipped()), (2, 1, 1));
    }

    #[tokio::test]
    async fn test_failed_table_skips_only_dependents() {
        let coord = coordinator(CoordinatorConfig::default(), std::time::Duration::ZERO);
        let window = Window::new(midnight(), Duration::hours(1));
        let report = coord.run_window(window).await;

        assert_eq!(report.window, window);
        assert_failure_policy(&report);
        let names: Vec<&str> = report.outcomes.iter().map(|o| o.table_name.as_str()).collect();
        assert_eq!(names, vec!["raw", "daily_agg", "raw_copy", "summary"]);
    }

    #[tokio::test]
    async fn test_parallel_levels_follow_same_policy() {
        let config = CoordinatorConfig {
            max_parallel_tables: 4,
            ..Default::default()
        };
        let coord = coordinator(config, std::time::Duration::ZERO);
        let report = coord.run_window(Window::new(midnight(), Duration::hours(1))).await;
        assert_failure_policy(&report);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let config = CoordinatorConfig {
            table_timeout_secs: Some(1),
            ..Default::default()
        };
        let coord = coordinator(config, std::time::Duration::from_secs(5));
        let report = coord.run_window(Window::new(midnight(), Duration::hours(1))).await;

        for name in ["raw", "raw_copy"] {
            assert_eq!(
                report.outcome(name).unwrap().status,
                TableStatus::Failed {
                    error: "Execution timed out after 1s".to_string()
                }
            );
        }
        // Skips propagate transitively.
        assert_eq!(
            report.outcome("daily_agg").unwrap().status,
            TableStatus::DependencyFailed {
                upstream: "raw".to_string()
            }
        );
        assert_eq!(
            report.outcome("summary").unwrap().status,
            TableStatus::DependencyFailed {
                upstream: "daily_agg".to_string()
            }
        );
    }

    #[test]
    fn test_first_window_truncates_start() {
        let coord = coordinator(CoordinatorConfig::default(), std::time::Duration::ZERO)
            .starting_at(midnight() + Duration::minutes(42));
        let window = coord.first_window();
        assert_eq!(window.start, midnight());
        assert_eq!(window.end, midnight() + Duration::hours(1));
    }

    #[test]
    fn test_run_window_blocking() {
        let coord = coordinator(CoordinatorConfig::default(), std::time::Duration::ZERO);
        let report = tokio_test::block_on(coord.run_window(Window::new(midnight(), Duration::hours(1))));
        assert_eq!(report.outcomes.len(), 4);
        assert!(!report.is_success());
    }

    #[test]
    fn test_cyclic_workflow_cannot_be_coordinated() {
        let workflow = Workflow::new("loop")
            .with_table(Table::sql("x", "SELECT * FROM y"))
            .unwrap()
            .with_table(Table::sql("y", "SELECT * FROM x"))
            .unwrap();
        let engine = Arc::new(ScriptedEngine {
            fail_on: "never",
            delay: std::time::Duration::ZERO,
        });
        let executor = Arc::new(TableExecutor::new(engine, Arc::new(MemoryStore::new())));
        assert!(matches!(
            WindowCoordinator::new(&workflow, executor, CoordinatorConfig::default()),
            Err(WorkflowError::CyclicDependency { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_emits_gapless_windows_until_stopped() {
        let clock = Arc::new(TokioClock {
            base: midnight() + Duration::minutes(10),
            origin: tokio::time::Instant::now(),
        });
        let (tx, mut rx) = mpsc::channel(16);
        let handle = coordinator(CoordinatorConfig::default(), std::time::Duration::ZERO)
            .with_clock(clock)
            .with_reports(tx)
            .spawn();
        let mut state = handle.subscribe();

        let mut windows = Vec::new();
        for _ in 0..3 {
            let report = rx.recv().await.unwrap();
            windows.push(report.window);
        }

        assert_eq!(windows[0], Window::new(midnight(), Duration::hours(1)));
        assert_eq!(windows[0].end, windows[1].start);
        assert_eq!(windows[1].end, windows[2].start);

        handle.stop().await;
        assert_eq!(*state.borrow_and_update(), CoordinatorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_scheduled() {
        let clock = Arc::new(TokioClock {
            base: midnight(),
            origin: tokio::time::Instant::now(),
        });
        let (tx, mut rx) = mpsc::channel(4);
        let handle = coordinator(CoordinatorConfig::default(), std::time::Duration::ZERO)
            .with_clock(clock)
            .with_reports(tx)
            .spawn();

        let mut state = handle.subscribe();
        state
            .wait_for(|s| *s == CoordinatorState::Scheduled)
            .await
            .unwrap();
        handle.stop().await;

        // The pending window was cancelled, so no report was published and
        // the sender is gone.
        assert!(rx.recv().await.is_none());
    }
}
