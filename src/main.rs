use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

mod commands;
mod config;
mod engine;
mod error;
mod lifecycle;
mod locks;
mod orchestrator;
mod reconciler;
mod records;
mod registry;
mod storage;
mod sweeper;
mod sync;
mod worker;

use config::Config;

#[derive(Parser)]
#[command(name = "playground")]
#[command(
    author,
    version,
    about = "Project sandbox orchestrator - per-project containers backed by durable storage"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ./playground.toml)
    #[arg(short, long, global = true, env = "PLAYGROUND_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve JSON-lines requests on stdin until EOF or a signal
    Serve,

    /// Open a project: seed, download and start its container
    Open {
        /// Project to open
        project_id: String,

        /// Owner of the project
        #[arg(short, long)]
        user: String,
    },

    /// Close a project: save its files and remove its container
    Close {
        /// Project to close
        project_id: String,

        /// Owner of the project
        #[arg(short, long)]
        user: String,
    },

    /// Delete a project and all of its stored files
    Delete {
        /// Project to delete
        project_id: String,

        /// Owner of the project
        #[arg(short, long)]
        user: String,
    },

    /// Show a project's record
    Status {
        /// Project to show
        project_id: String,
    },
}

/// Installs the global subscriber. The returned guard flushes buffered
/// log lines when dropped.
fn init_logging(cli: &Cli) -> Result<WorkerGuard> {
    let default_directive = if cli.verbose {
        "playground=debug"
    } else {
        "playground=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let (writer, guard) = match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let layer = match cli.log_format {
        LogFormat::Text => fmt::layer()
            .with_writer(writer)
            .with_ansi(cli.log_file.is_none())
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let _guard = init_logging(&cli)?;

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => commands::serve::run(&config).await,
        Commands::Open { project_id, user } => commands::open::run(&config, &project_id, &user).await,
        Commands::Close { project_id, user } => commands::close::run(&config, &project_id, &user).await,
        Commands::Delete { project_id, user } => {
            commands::delete::run(&config, &project_id, &user).await
        }
        Commands::Status { project_id } => commands::status::run(&config, &project_id).await,
    }
}
