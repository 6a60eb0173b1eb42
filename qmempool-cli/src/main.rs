//! ## qmempool-cli
//! **Driver for the per-CPU memory pool**
//!
//! Runs the refill/overflow walkthrough, a multi-threaded stress workload,
//! or prints the effective configuration.

use clap::Parser;
use qmempool_telemetry::init_logging;

mod backing;
mod commands;
mod error;
mod scenario;
mod stress;

use commands::Cli;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    init_logging(&config.telemetry.log_filter);

    commands::run_command(&cli, &config)?;
    Ok(())
}
