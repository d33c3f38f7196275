//! Tidex CLI - Command-line interface
//!
//! Fetches pages through the challenge-aware fetcher and reports swarm
//! health from public trackers.

mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tidex_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "tidex")]
#[command(about = "Challenge-aware page fetching and tracker scraping")]
#[command(version)]
struct Cli {
    /// Console log level (RUST_LOG takes precedence)
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,

    /// Directory for a full trace log of the last run
    #[arg(long)]
    logs_dir: Option<PathBuf>,

    /// Directory of the persistent cache (defaults to TIDEX_CACHE_DIR, then
    /// a `tidex` folder in the system temp directory)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_file = init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())
        .context("failed to initialize logging")?;
    if let Some(path) = log_file {
        tracing::debug!(path = %path.display(), "Writing trace log");
    }

    commands::handle_command(cli.command, cli.cache_dir).await
}
