//! Eddy CLI - Command-line interface
//!
//! Connects to a Direct Connect hub, shares a directory and queues downloads.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use eddy_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "eddy")]
#[command(about = "A Direct Connect file sharing client")]
struct Cli {
    /// Console log level
    #[arg(long, global = true, default_value = "info")]
    log_level: CliLogLevel,

    /// Directory for the per-run trace log
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())?;

    commands::handle_command(cli.command).await
}
