use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tomekeeper::cli::commands::MerxCommand;
use tomekeeper::cli::{Cli, LogLevel};

fn initialize_tracing(log_level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_filter_directive()));

    // Logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_tracing(cli.log_level);

    let command = MerxCommand::from(cli);
    let log = command
        .execute()
        .with_context(|| format!("Failed to run {}", command.merx))?;

    if !log.succeeded() {
        std::process::exit(1);
    }
    Ok(())
}
