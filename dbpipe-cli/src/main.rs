//! dbpipe CLI - resilient query pipelines over SQLite
//!
//! Every command runs through the same pipeline stages: a connection scope,
//! retries, transactions for writes, a result cache for reads and batch
//! streaming for large results.
//!
//! - `fetch` runs read queries and prints rows as NDJSON
//! - `exec` runs statements in one all-or-nothing transaction
//! - `stream` streams a query in batches with an optional row filter
//! - `average` computes a streaming column mean

use std::future::Future;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use dbpipe_core::{CancellationToken, PipelineConfig};
use tokio::signal;
use tracing::{debug, warn};

mod commands;
mod tracing_setup;
mod ui;

use commands::Settings;

#[derive(Parser, Debug)]
#[command(
    name = "dbpipe",
    author,
    version,
    about = "Run queries through a retrying, transactional, batch-streaming pipeline",
    long_about = "Run SQL against a SQLite database with connection scoping, bounded retries, \
                  all-or-nothing transactions, cached reads and memory-bounded batch streaming."
)]
struct Cli {
    /// Config file (defaults to ~/.dbpipe/config.toml when present)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Database URL, e.g. sqlite://users.db
    #[arg(long, short = 'd', global = true, env = "DBPIPE_DATABASE_URL", value_name = "URL")]
    database: Option<String>,

    /// Enable debug logging, including every executed query
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress progress spinners (for script consumption)
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch query results as NDJSON (concurrently when several queries are given)
    Fetch(commands::fetch::FetchArgs),
    /// Execute statements in a single retried transaction
    Exec(commands::exec::ExecArgs),
    /// Stream a query in batches, printing matching rows as NDJSON
    Stream(commands::stream::StreamArgs),
    /// Streaming mean of a numeric column
    Average(commands::average::AverageArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_setup::init(&tracing_setup::TracingConfig { debug: cli.debug }).ok();
    ui::init_quiet_mode(cli.quiet);

    let config = PipelineConfig::load_or_default(cli.config.as_deref())?;
    debug!(?config, "configuration loaded");
    let settings = Settings {
        config,
        database_url: cli.database,
        cancel: CancellationToken::new(),
    };

    let selected = cli.command;
    let command = async {
        match selected {
            Commands::Fetch(args) => commands::run_fetch(&settings, args).await,
            Commands::Exec(args) => commands::run_exec(&settings, args).await,
            Commands::Stream(args) => commands::run_stream(&settings, args).await,
            Commands::Average(args) => commands::run_average(&settings, args).await,
        }
    };

    run_until_interrupted(&settings.cancel, command, interrupt_signal()).await
}

/// Run `command` unless `interrupt` fires first. An interrupted command is
/// dropped, closing its connection; an open transaction is never committed.
async fn run_until_interrupted<T>(
    cancel: &CancellationToken,
    command: impl Future<Output = Result<T>>,
    interrupt: impl Future<Output = ()>,
) -> Result<T> {
    tokio::select! {
        result = command => result,
        () = interrupt => {
            warn!("interrupted, cancelling");
            cancel.cancel();
            bail!("interrupted")
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn interrupt_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
