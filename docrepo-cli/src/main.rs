//! docrepo CLI - inspect collections and reconcile indexes
//!
//! Connects through the same read/write router applications use:
//! - `ping` health-checks both sides and reports the routing setup
//! - `indexes list|plan|sync` converges a collection's indexes to a TOML file
//! - `count` and `find` run read-side queries with pagination
//!
//! Connection settings come from `--config FILE` (TOML) or `DOCREPO_*`
//! variables, optionally loaded from `./.env` or `~/.docrepo/.env`.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;

mod commands;
mod config;
mod connector;
mod tracing_setup;

use tracing_setup::TracingConfig;

#[derive(Parser, Debug)]
#[command(
    name = "docrepo",
    author,
    version,
    about = "Inspect document collections and reconcile their indexes",
    long_about = "Connects to a document store through a write/read router (primary for writes, \
                  secondary-preferred for reads) to check connectivity, diff and apply declared \
                  index sets, and page through collections."
)]
struct Cli {
    /// Enable debug logging, including every store command
    #[arg(long, global = true)]
    debug: bool,

    /// Export traces to an OTLP endpoint (requires the telemetry feature)
    #[arg(long, global = true)]
    otel: bool,

    /// Router config file (TOML); DOCREPO_* variables are used when absent
    #[arg(long, global = true, value_name = "PATH", env = "DOCREPO_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to both sides and report the routing setup
    Ping,
    /// List, plan or sync collection indexes
    Indexes(commands::indexes::IndexesArgs),
    /// Count documents matching a filter
    Count(commands::query::CountArgs),
    /// Print one page of matching documents as JSON lines
    Find(commands::query::FindArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_files = config::load_dotenv();
    let cli = Cli::parse();

    tracing_setup::init(&TracingConfig {
        debug: cli.debug,
        otel: cli.otel,
    })
    .ok();
    for path in &env_files {
        debug!("Loaded .env from {}", path.display());
    }

    let result = run(cli).await;
    tracing_setup::shutdown_otel();
    result
}

async fn run(cli: Cli) -> Result<()> {
    let router_config = config::router_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Ping => commands::run_ping(router_config).await,
        Commands::Indexes(args) => commands::run_indexes(args, router_config).await,
        Commands::Count(args) => commands::run_count(args, router_config).await,
        Commands::Find(args) => commands::run_find(args, router_config).await,
    }
}
