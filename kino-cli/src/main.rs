//! Kino CLI - Command-line interface
//!
//! Runs the streaming server and offers dry-run tools for inspecting the
//! encoder command lines and hardware support.

mod commands;

use clap::Parser;
use kino_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "kino")]
#[command(about = "On-demand video transcoding and streaming server")]
struct Cli {
    /// Console log level
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_tracing_level(), None)?;

    commands::handle_command(cli.command).await
}
