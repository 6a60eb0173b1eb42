use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use qmempool_config::{ConfigError, QmempoolConfig};
use qmempool_telemetry::MetricsRecorder;
use validator::Validate;

use crate::error::CliError;
use crate::{scenario, stress};

#[derive(Parser)]
#[command(name = "qmempool", version, about)]
pub struct Cli {
    /// Configuration file; defaults to config/qmempool.yaml when present
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Print Prometheus metrics after the run
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Walk a small pool through refill and overflow, printing backing calls
    Scenario,
    /// Hammer one pool from a worker thread per CPU shard
    Stress(StressArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args, Debug, Clone)]
pub struct StressArgs {
    #[arg(long)]
    pub threads: Option<usize>,
    /// Allocate/free rounds per worker
    #[arg(long)]
    pub iterations: Option<usize>,
    /// Upper bound on elements held per round
    #[arg(long)]
    pub burst: Option<usize>,
    /// Free each burst on the next worker's shard
    #[arg(long)]
    pub cross_cpu_free: bool,
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

impl Cli {
    /// Loads configuration and folds command-line overrides into it.
    pub fn load_config(&self) -> Result<QmempoolConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => QmempoolConfig::load_from_path(path)?,
            None => QmempoolConfig::load()?,
        };

        config.telemetry.metrics |= self.metrics;
        if let Commands::Stress(args) = &self.command {
            let workload = &mut config.workload;
            workload.threads = args.threads.unwrap_or(workload.threads);
            workload.iterations = args.iterations.unwrap_or(workload.iterations);
            workload.burst = args.burst.unwrap_or(workload.burst);
            workload.cross_cpu_free |= args.cross_cpu_free;
        }
        config.validate()?;
        Ok(config)
    }
}

pub fn run_command(cli: &Cli, config: &QmempoolConfig) -> Result<(), CliError> {
    let metrics = if config.telemetry.metrics {
        Some(MetricsRecorder::new()?)
    } else {
        None
    };

    match &cli.command {
        Commands::Scenario => scenario::run_scenario(&config.pool, metrics.as_ref())?,
        Commands::Stress(args) => stress::run_stress(config, args.seed, metrics.as_ref())?,
        Commands::Config => {
            print!("{}", serde_yaml::to_string(config)?);
            return Ok(());
        }
    }

    if let Some(metrics) = metrics {
        print!("{}", metrics.gather_metrics()?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stress_flags_parse() {
        let cli = Cli::try_parse_from([
            "qmempool",
            "stress",
            "--threads",
            "4",
            "--burst",
            "8",
            "--cross-cpu-free",
            "--metrics",
        ])
        .unwrap();
        assert!(cli.metrics);
        let Commands::Stress(args) = cli.command else {
            panic!("expected stress subcommand");
        };
        assert_eq!(args.threads, Some(4));
        assert_eq!(args.burst, Some(8));
        assert_eq!(args.iterations, None);
        assert!(args.cross_cpu_free);
    }

    #[test]
    fn global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["qmempool", "scenario", "--config", "pool.yaml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("pool.yaml")));
    }
}
