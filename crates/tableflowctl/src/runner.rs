use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use tableflow_core::codec;
use tableflow_core::engine::TableOutcome;
use tableflow_core::{
    CoordinatorConfig, Format, TableExecutor, TableStatus, WindowCoordinator, WindowReport,
    Workflow, WorkflowRegistry,
};
use tableflow_duckdb::{DuckdbConfig, DuckdbEngine};

/// Read and validate a workflow document. The format follows the file
/// extension unless `format` is given.
pub fn load_workflow(path: &Path, format: Option<Format>) -> Result<Workflow> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read workflow file: {}", path.display()))?;
    let format = format.unwrap_or_else(|| Format::from_path(path));
    codec::import(&text, format)
        .with_context(|| format!("Invalid workflow document: {}", path.display()))
}

pub struct RunOptions {
    pub files: Vec<PathBuf>,
    pub db: Option<String>,
    pub init: Option<PathBuf>,
    pub window_start: Option<DateTime<Utc>>,
    pub windows: usize,
    pub follow: bool,
    pub json: bool,
}

/// Open the DuckDB backend shared by every workflow of one invocation.
async fn open_engine(db: Option<String>, init: Option<&Path>) -> Result<Arc<DuckdbEngine>> {
    let mut config = DuckdbConfig::from_env().context("Invalid TABLEFLOW_DUCKDB_* settings")?;
    if let Some(path) = db {
        config = config.with_path(path);
    }

    let engine = DuckdbEngine::open(&config)
        .with_context(|| format!("Failed to open DuckDB at {}", config.location()))?;

    if let Some(script) = init {
        let sql = fs::read_to_string(script)
            .with_context(|| format!("Failed to read init script: {}", script.display()))?;
        engine
            .execute_batch(&sql)
            .await
            .with_context(|| format!("Init script failed: {}", script.display()))?;
        info!(script = %script.display(), "Init script applied");
    }

    Ok(Arc::new(engine))
}

/// Executor over a connection scoped to the workflow's own schema.
async fn executor_for(engine: &DuckdbEngine, workflow: &Workflow) -> Result<Arc<TableExecutor>> {
    let scoped = Arc::new(
        engine
            .scoped(workflow.id.as_str())
            .await
            .with_context(|| format!("Cannot open a schema for workflow '{}'", workflow.name))?,
    );
    Ok(Arc::new(TableExecutor::new(scoped.clone(), scoped)))
}

pub async fn run(options: RunOptions) -> Result<()> {
    if options.files.is_empty() {
        bail!("At least one workflow file is required");
    }

    let workflows = options
        .files
        .iter()
        .map(|path| load_workflow(path, None))
        .collect::<Result<Vec<_>>>()?;

    let config = CoordinatorConfig::from_env().context("Invalid TABLEFLOW_* settings")?;
    let engine = open_engine(options.db.clone(), options.init.as_deref()).await?;

    if options.follow {
        return follow(workflows, &engine, config, &options).await;
    }

    let mut failures = 0;
    for workflow in &workflows {
        let executor = executor_for(&engine, workflow).await?;
        let mut coordinator = WindowCoordinator::new(workflow, executor, config.clone())
            .with_context(|| format!("Workflow '{}' is not runnable", workflow.name))?;
        if let Some(start) = options.window_start {
            coordinator = coordinator.starting_at(start);
        }

        let mut window = coordinator.first_window();
        for _ in 0..options.windows.max(1) {
            let report = coordinator.run_window(window).await;
            if !report.is_success() {
                failures += 1;
            }
            print_report(&report, options.json)?;
            window = window.next();
        }
    }

    if failures > 0 {
        bail!("{} window(s) finished with failed tables", failures);
    }
    Ok(())
}

/// Run every workflow continuously until interrupted.
async fn follow(
    workflows: Vec<Workflow>,
    engine: &Arc<DuckdbEngine>,
    config: CoordinatorConfig,
    options: &RunOptions,
) -> Result<()> {
    let mut registry = WorkflowRegistry::new(config);
    let mut reports = registry.subscribe();

    for workflow in &workflows {
        registry
            .start(workflow, executor_for(engine, workflow).await?, options.window_start)
            .await
            .with_context(|| format!("Workflow '{}' is not runnable", workflow.name))?;
    }
    info!(workflows = registry.len(), "Following workflows, press Ctrl-C to stop");

    loop {
        tokio::select! {
            report = reports.recv() => match report {
                Some(report) => print_report(&report, options.json)?,
                None => {
                    warn!("Report channel closed");
                    break;
                }
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("Interrupt received");
                break;
            }
        }
    }

    registry.shutdown().await;
    Ok(())
}

fn describe(outcome: &TableOutcome) -> String {
    match &outcome.status {
        TableStatus::Completed {
            rows,
            inserted,
            replaced,
        } => format!("{rows} rows ({inserted} inserted, {replaced} replaced)"),
        TableStatus::Failed { error } => error.clone(),
        TableStatus::DependencyFailed { upstream } => format!("upstream '{upstream}' did not complete"),
    }
}

pub fn print_report(report: &WindowReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }

    println!("{} {}", report.workflow_name, report.window);
    for outcome in &report.outcomes {
        println!(
            "  {:<24} {:<18} {:>6}ms  {}",
            outcome.table_name,
            outcome.status.label(),
            outcome.duration_ms,
            describe(outcome)
        );
    }
    println!(
        "  completed {}, failed {}, skipped {}",
        report.completed(),
        report.failed(),
        report.skipped()
    );
    Ok(())
}
