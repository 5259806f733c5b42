//! keypool command-line driver
//!
//! Runs a simulated table-client workload against a [`PoolRegistry`] and
//! reports how the per-key pools behaved.

mod config;
mod logging;
mod report;
mod workload;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use keypool_pool::PoolRegistry;

use crate::config::CliConfig;
use crate::logging::LoggingConfig;
use crate::report::{OutputFormat, Report};
use crate::workload::{TableClientFactory, run_workload};

#[derive(Debug, Parser)]
#[command(name = "keypool", version, about = "Keyed resource pool simulator")]
struct Cli {
    /// Configuration file (defaults to <config dir>/keypool/keypool.toml)
    #[arg(long, short, global = true, env = "KEYPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Write JSON logs to this directory
    #[arg(long, global = true, env = "KEYPOOL_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Write JSON logs to the default log directory
    #[arg(long, global = true, conflicts_with = "log_dir")]
    log_file: bool,

    /// Increase log verbosity (-v, -vv)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the simulated workload (default)
    Simulate(SimulateArgs),
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Debug, Default, Args)]
struct SimulateArgs {
    /// Concurrent workers
    #[arg(long)]
    workers: Option<usize>,

    /// Units of work per worker
    #[arg(long)]
    iterations: Option<usize>,

    /// Number of distinct tables
    #[arg(long)]
    tables: Option<usize>,

    /// Milliseconds each unit of work holds its client
    #[arg(long)]
    work_ms: Option<u64>,

    /// Milliseconds to open a client
    #[arg(long)]
    create_latency_ms: Option<u64>,

    /// Probability in [0, 1] that opening a client or a write fails
    #[arg(long)]
    failure_rate: Option<f64>,

    /// Report format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

impl SimulateArgs {
    fn apply(&self, config: &mut CliConfig) {
        let workload = &mut config.workload;
        if let Some(workers) = self.workers {
            workload.workers = workers;
        }
        if let Some(iterations) = self.iterations {
            workload.iterations = iterations;
        }
        if let Some(tables) = self.tables {
            workload.tables = tables;
        }
        if let Some(work_ms) = self.work_ms {
            workload.work_ms = work_ms;
        }
        if let Some(latency) = self.create_latency_ms {
            workload.create_latency_ms = latency;
        }
        if let Some(rate) = self.failure_rate {
            workload.failure_rate = rate;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = if cli.log_file {
        Some(logging::log_directory())
    } else {
        cli.log_dir.clone()
    };
    let _log_guard =
        logging::init(LoggingConfig::for_verbosity(cli.verbose).with_log_dir(log_dir))
            .context("Failed to initialize logging")?;

    let mut config = CliConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Simulate(SimulateArgs::default())) {
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Command::Simulate(args) => {
            args.apply(&mut config);
            config.workload.validate()?;
            simulate(&config, args.format).await
        }
    }
}

async fn simulate(config: &CliConfig, format: OutputFormat) -> Result<()> {
    let factory = Arc::new(TableClientFactory::new(&config.workload));
    let registry = PoolRegistry::from_config(&config.keypool, Arc::clone(&factory))
        .context("Failed to build pool registry")?;

    tracing::info!(
        tables = config.workload.tables,
        workers = config.workload.workers,
        iterations = config.workload.iterations,
        max_total = config.keypool.pool.max_total(),
        "starting simulation"
    );

    let summary = run_workload(&registry, &config.workload).await;
    let entries = registry.snapshot();
    let stats = registry.stats();
    registry.shutdown().await;
    let summary = summary?;

    let report = Report {
        generated_at: Utc::now(),
        workload: config.workload.clone(),
        summary,
        clients_created: factory.created(),
        clients_destroyed: factory.destroyed(),
        registry: stats,
        entries,
    };
    println!("{}", report.render(format)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_simulate_overrides() {
        let cli = Cli::try_parse_from([
            "keypool",
            "simulate",
            "--workers",
            "3",
            "--failure-rate",
            "0.25",
            "--format",
            "json",
        ])
        .expect("parse");

        let Some(Command::Simulate(args)) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.format, OutputFormat::Json);

        let mut config = CliConfig::default();
        args.apply(&mut config);
        assert_eq!(config.workload.workers, 3);
        assert_eq!(config.workload.failure_rate, 0.25);
        assert_eq!(config.workload.tables, 4);
    }

    #[test]
    fn test_log_flags_conflict() {
        let result =
            Cli::try_parse_from(["keypool", "--log-file", "--log-dir", "/tmp/logs", "config"]);
        assert!(result.is_err());
    }
}
