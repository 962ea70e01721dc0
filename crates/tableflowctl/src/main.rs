mod runner;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tableflow_core::codec;
use tableflow_core::{Format, MemoryStore, TableExecutor};
use tableflow_duckdb::DuckdbEngine;

use runner::{load_workflow, RunOptions};

#[derive(Parser)]
#[command(name = "tableflow")]
#[command(version, about = "Windowed incremental SQL table workflows", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Log filter (overrides RUST_LOG), e.g. "debug" or "warn,tableflow_core=info"
    #[arg(long, global = true, value_name = "FILTER")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that workflow documents parse and form an acyclic graph
    ///
    /// Examples:
    ///     tableflow validate ./workflows/orders.yaml
    ///     tableflow validate ./workflows/*.yaml
    #[command(verbatim_doc_comment)]
    Validate {
        /// Workflow files (YAML or JSON)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show the execution order, parallel levels and edges of a workflow
    Plan {
        /// Workflow file
        file: PathBuf,

        /// Print the graph snapshot as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Convert a workflow document between YAML and JSON
    ///
    /// Examples:
    ///     tableflow convert orders.yaml --to json -o orders.json
    ///     tableflow convert orders.json --to yaml
    #[command(verbatim_doc_comment)]
    Convert {
        /// Workflow file
        file: PathBuf,

        /// Target format: yaml or json
        #[arg(long, default_value = "yaml")]
        to: Format,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the SQL a table would run for a window
    Render {
        /// Workflow file
        file: PathBuf,

        /// Table name
        table: String,

        /// Any instant inside the window (RFC 3339, default: now)
        #[arg(long, value_name = "TIMESTAMP")]
        window_start: Option<DateTime<Utc>>,
    },

    /// Run workflows on DuckDB
    ///
    /// Without --follow, runs --windows consecutive windows starting with the
    /// window containing --window-start (default: now) and exits. With
    /// --follow, runs every workflow on its window boundaries until Ctrl-C.
    ///
    /// Examples:
    ///     tableflow run orders.yaml --init seed.sql --window-start 2024-03-01T00:00:00Z --windows 24
    ///     tableflow run orders.yaml billing.yaml --db ./flow.duckdb --follow
    #[command(verbatim_doc_comment)]
    Run {
        /// Workflow files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// DuckDB database file (overrides TABLEFLOW_DUCKDB_PATH)
        #[arg(long, value_name = "PATH")]
        db: Option<String>,

        /// SQL script executed once before the first window
        #[arg(long, value_name = "FILE")]
        init: Option<PathBuf>,

        /// Any instant inside the first window (RFC 3339, default: now)
        #[arg(long, value_name = "TIMESTAMP")]
        window_start: Option<DateTime<Utc>>,

        /// Number of consecutive windows to run
        #[arg(short = 'n', long, default_value_t = 1)]
        windows: usize,

        /// Keep running on window boundaries until interrupted
        #[arg(short, long, conflicts_with = "windows")]
        follow: bool,

        /// Print window reports as JSON lines
        #[arg(short, long)]
        json: bool,
    },
}

/// Initialize tracing/logging on stderr so command output stays clean.
fn init_tracing(json: bool, filter: Option<&str>) {
    let filter = match filter {
        Some(directives) => tracing_subscriber::EnvFilter::new(directives),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info,tableflow_core=debug".into()),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_json, cli.log_level.as_deref());

    match cli.command {
        Commands::Validate { files } => {
            let mut invalid = 0;
            for file in &files {
                match load_workflow(file, None) {
                    Ok(workflow) => {
                        let plan = workflow.plan()?;
                        println!(
                            "ok      {} ({} tables, {} edges)",
                            file.display(),
                            plan.len(),
                            plan.edges().len()
                        );
                        for unresolved in plan.unresolved() {
                            println!(
                                "        {}: '{}' is not a table of this workflow",
                                unresolved.table_name, unresolved.reference
                            );
                        }
                    }
                    Err(e) => {
                        invalid += 1;
                        println!("invalid {}: {:#}", file.display(), e);
                    }
                }
            }
            if invalid > 0 {
                bail!("{} of {} workflow(s) are invalid", invalid, files.len());
            }
        }

        Commands::Plan { file, json } => {
            let workflow = load_workflow(&file, None)?;
            let plan = workflow.plan()?;
            let snapshot = plan.snapshot();

            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
                return Ok(());
            }

            println!("{} (window {})", workflow.name, codec::duration::format_duration(&workflow.window.size));
            println!("Order:");
            for (i, name) in snapshot.order.iter().enumerate() {
                println!("  {:>3}. {}", i + 1, name);
            }
            println!("Levels:");
            for (i, level) in snapshot.levels.iter().enumerate() {
                println!("  {:>3}: {}", i, level.join(", "));
            }
            if !snapshot.edges.is_empty() {
                println!("Edges:");
                for edge in &snapshot.edges {
                    println!("  {} -> {}", edge.source, edge.target);
                }
            }
            if !snapshot.unresolved.is_empty() {
                println!("Unresolved references:");
                for unresolved in &snapshot.unresolved {
                    println!("  {}: {}", unresolved.table_name, unresolved.reference);
                }
            }
        }

        Commands::Convert { file, to, output } => {
            let workflow = load_workflow(&file, None)?;
            let text = codec::export(&workflow, to).context("Failed to serialize workflow")?;
            match output {
                Some(path) => {
                    fs::write(&path, &text)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    eprintln!("Wrote {} ({})", path.display(), to);
                }
                None => print!("{}", text),
            }
        }

        Commands::Render {
            file,
            table,
            window_start,
        } => {
            let workflow = load_workflow(&file, None)?;
            let Some(target) = workflow.table_by_name(&table) else {
                bail!("Table '{}' not found in workflow '{}'", table, workflow.name);
            };

            let window = workflow
                .window
                .window_containing(window_start.unwrap_or_else(Utc::now));
            let engine = Arc::new(DuckdbEngine::in_memory().context("Failed to open DuckDB")?);
            let executor = TableExecutor::new(engine, Arc::new(MemoryStore::new()));
            let sql = executor
                .render(target, &window)
                .with_context(|| format!("Failed to render table '{}'", table))?;

            println!("-- {} {}", target.name, window);
            println!("{}", sql);
        }

        Commands::Run {
            files,
            db,
            init,
            window_start,
            windows,
            follow,
            json,
        } => {
            runner::run(RunOptions {
                files,
                db,
                init,
                window_start,
                windows,
                follow,
                json,
            })
            .await?;
        }
    }

    Ok(())
}
