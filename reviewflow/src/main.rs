//! reviewflow: command-line driver for the article review workflow.
//!
//! # Startup sequence
//!
//! 1. Parse arguments and load the TOML config (missing file means defaults).
//! 2. Install the `tracing` subscriber: `RUST_LOG` wins, then the config's
//!    `log_level`. Logs go to stderr so command output stays pipeable.
//! 3. Commands that need storage create the database directory and open the
//!    WAL-mode SQLite database through `reviewflow_core::db::open_db`.

mod render;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio_rusqlite::Connection;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use reviewflow_core::config::Config;
use reviewflow_core::decisions::DecisionStore;
use reviewflow_core::diff::compute_diff;
use reviewflow_core::monitor::CostMonitor;
use reviewflow_core::optimize::model::OptimizationStatus;
use reviewflow_core::optimize::store::{RecordStore, SqliteRecordStore};
use reviewflow_core::types::ArticleId;
use reviewflow_core::worklist::{SqliteWorklist, Worklist};
use reviewflow_core::Error;

use crate::render::RenderOptions;

#[derive(Parser)]
#[command(name = "reviewflow")]
#[command(about = "Review proofreading decisions, diffs and AI optimization costs")]
struct Cli {
    /// Config file (defaults to $XDG_CONFIG_HOME/reviewflow/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database, overriding the config file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Word-level diff between two text files
    Diff {
        original: PathBuf,
        suggested: PathBuf,
        /// Print original and suggestion separately
        #[arg(long)]
        split: bool,
        #[arg(long)]
        line_numbers: bool,
        /// Print the structured diff as JSON
        #[arg(long)]
        json: bool,
    },
    /// Which optimization parts exist for an article
    Status { article_id: ArticleId },
    /// Print the stored optimization record as JSON
    Show { article_id: ArticleId },
    /// Drop the stored optimization record so the next request regenerates
    Delete { article_id: ArticleId },
    /// Cost and cache performance over the last N days
    Report {
        #[arg(long, default_value = "30")]
        days: u32,
        #[arg(long)]
        json: bool,
    },
    /// Saved proofreading decisions for an article
    Decisions { article_id: ArticleId },
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn open_database(path: &Path) -> anyhow::Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create database directory {}", dir.display()))?;
    }
    let path_str = path
        .to_str()
        .with_context(|| format!("database path is not valid UTF-8: {}", path.display()))?;
    let conn = reviewflow_core::db::open_db(path_str)
        .await
        .with_context(|| format!("cannot open database {path_str}"))?;
    debug!(path = path_str, "database opened");
    Ok(conn)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Step 1: config first, so its log level can seed the subscriber.
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let (mut config, config_problem) = match Config::load_optional(&config_path) {
        Ok(config) => (config.unwrap_or_default(), None),
        Err(e) => (Config::default(), Some(e)),
    };

    // Step 2: logging.
    init_tracing(&config.log_level);
    if let Some(e) = config_problem {
        warn!(error = %e, "using default configuration");
    }
    if let Some(db) = cli.db {
        config.database_path = db;
    }

    // Step 3: dispatch.
    match cli.command {
        Command::Diff {
            original,
            suggested,
            split,
            line_numbers,
            json,
        } => {
            let original = std::fs::read_to_string(&original)
                .with_context(|| format!("cannot read {}", original.display()))?;
            let suggested = std::fs::read_to_string(&suggested)
                .with_context(|| format!("cannot read {}", suggested.display()))?;
            let result = compute_diff(&original, &suggested);
            if json {
                print_json(&result)?;
            } else {
                print!("{}", render::render(&result, RenderOptions { split, line_numbers }));
            }
        }
        Command::Status { article_id } => {
            let store = SqliteRecordStore::new(open_database(&config.database_path).await?);
            let record = store.get(article_id).await?;
            print_json(&OptimizationStatus::from_record(record.as_ref()))?;
        }
        Command::Show { article_id } => {
            let store = SqliteRecordStore::new(open_database(&config.database_path).await?);
            match store.get(article_id).await? {
                Some(record) => print_json(&record)?,
                None => bail!(Error::not_found("optimization record", article_id)),
            }
        }
        Command::Delete { article_id } => {
            let store = SqliteRecordStore::new(open_database(&config.database_path).await?);
            if !store.remove(article_id).await? {
                bail!(Error::not_found("optimization record", article_id));
            }
            println!("Deleted optimization record for article {article_id}.");
        }
        Command::Report { days, json } => {
            let store = SqliteRecordStore::new(open_database(&config.database_path).await?);
            let monitor = CostMonitor::new(Arc::new(store));
            let report = monitor.report(days).await?;
            if json {
                print_json(&report)?;
            } else {
                println!("{}", report.summary);
            }
        }
        Command::Decisions { article_id } => {
            let worklist = SqliteWorklist::new(open_database(&config.database_path).await?);
            let store = DecisionStore::from_decisions(worklist.load_decisions(article_id).await?);
            for decision in store.get_all() {
                match &decision.custom_text {
                    Some(text) => println!("{:<24} {:<9} {text}", decision.issue_id, decision.verdict),
                    None => println!("{:<24} {}", decision.issue_id, decision.verdict),
                }
            }
            let summary = store.summary();
            println!(
                "{}/{} decided ({} accepted, {} rejected, {} modified)",
                summary.decided(),
                summary.total(),
                summary.accepted,
                summary.rejected,
                summary.modified
            );
            if let Some(at) = worklist.parsing_confirmed_at(article_id).await? {
                println!("parsing confirmed at {at}");
            }
        }
    }
    Ok(())
}
