//! The `lighter` command line, embeddable with an application catalog.

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lt_engine::{Context, ContextOptions, FactoryCatalog, DRY_RUN_EXPERIMENT};
use lt_optimizer::{SnapshotWriter, SEARCH_KEY};
use lt_types::Device;

use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::worker::{run_bucket, run_snapshot};

/// Log filter variable; `RUST_LOG` is used when it is unset.
pub const LOG_ENV: &str = "LIGHTER_LOG";

#[derive(Debug, Parser)]
#[command(name = "lighter", version, about = "Configuration-driven experiment assembly and search")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Compile the search groups of a config into snapshot files
    Compile {
        #[arg(long)]
        config: PathBuf,
        /// Root directory; snapshots go to <output>/<run-name>
        #[arg(long, default_value = "runs/search")]
        output: PathBuf,
        /// Config overrides, e.g. -- --optimizer.lr 0.1
        #[arg(last = true)]
        overrides: Vec<String>,
    },
    /// Partition a snapshot directory over worker processes and run them
    Schedule {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value_t = 1)]
        workers: usize,
        #[arg(long, default_value = "cuda")]
        device: String,
        #[arg(long, default_value = DRY_RUN_EXPERIMENT)]
        experiment: String,
        /// Write the manifest and print the worker commands without running them
        #[arg(long)]
        plan_only: bool,
        /// Forwarded to every worker
        #[arg(last = true)]
        overrides: Vec<String>,
    },
    /// Run one bucket of a schedule manifest
    Worker {
        #[arg(long)]
        schedule: PathBuf,
        #[arg(long)]
        bucket: String,
        #[arg(long)]
        experiment: String,
        #[arg(last = true)]
        overrides: Vec<String>,
    },
    /// Run one experiment in this process
    Run {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, default_value = DRY_RUN_EXPERIMENT)]
        experiment: String,
        #[arg(long)]
        device: Option<String>,
        #[arg(last = true)]
        overrides: Vec<String>,
    },
}

/// Install the fmt subscriber, filtered by `LIGHTER_LOG`, then `RUST_LOG`,
/// then `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Parse the process arguments and dispatch with `catalog`.
pub fn run_with(catalog: FactoryCatalog) -> Result<()> {
    init_tracing();
    execute(Cli::parse(), Arc::new(catalog))
}

pub fn execute(cli: Cli, catalog: Arc<FactoryCatalog>) -> Result<()> {
    match cli.command {
        Command::Compile { config, output, overrides } => compile(config, output, overrides, catalog),
        Command::Schedule {
            input,
            workers,
            device,
            experiment,
            plan_only,
            overrides,
        } => schedule(
            SchedulerConfig::new(input, workers)
                .with_device(device)
                .with_experiment(experiment)
                .with_extra_args(overrides),
            plan_only,
        ),
        Command::Worker {
            schedule,
            bucket,
            experiment,
            overrides,
        } => {
            let report = run_bucket(&schedule, &bucket, &experiment, &overrides, catalog)?;
            if !report.is_success() {
                bail!(
                    "bucket {} failed: {}",
                    bucket,
                    report.first_error().unwrap_or("unknown error")
                );
            }
            Ok(())
        }
        Command::Run {
            config,
            experiment,
            device,
            overrides,
        } => {
            let device = match device {
                Some(raw) => raw.parse::<Device>()?,
                None => Device::detect(),
            };
            run_snapshot(&config, &experiment, &device, &overrides, catalog)
                .with_context(|| format!("experiment {} failed on {}", experiment, config.display()))
        }
    }
}

fn compile(config: PathBuf, output: PathBuf, overrides: Vec<String>, catalog: Arc<FactoryCatalog>) -> Result<()> {
    let options = ContextOptions::from_file(&config)
        .with_args(overrides)
        .with_auto_instantiate(false);
    let context = Context::create(options, catalog)
        .with_context(|| format!("failed to load {}", config.display()))?;

    let mut base = context.config().copy();
    base.remove(SEARCH_KEY);
    if context.search().is_empty() {
        warn!("{} declares no search groups; writing a single snapshot", config.display());
    }

    let writer = SnapshotWriter::with_run_name(&output);
    let written = if context.search().is_empty() {
        writer.write(&lt_optimizer::compile(&base, &[])?)?
    } else {
        writer.write_space(context.search(), &base)?
    };
    info!("Compiled {} snapshot(s) into {}", written.len(), writer.output_dir().display());
    println!("{}", writer.output_dir().display());
    Ok(())
}

fn schedule(config: SchedulerConfig, plan_only: bool) -> Result<()> {
    let mut scheduler = Scheduler::new(config);
    scheduler.build_schedule()?;
    let workers = scheduler.create_processes()?;

    if plan_only {
        for worker in &workers {
            println!("{} {}", worker.program.display(), worker.args.join(" "));
        }
        return Ok(());
    }

    let outcomes = scheduler.execute_processes(&workers);
    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| !o.is_success())
        .map(|o| o.bucket.as_str())
        .collect();
    info!("{} worker(s) finished, {} failed", outcomes.len() - failed.len(), failed.len());
    if !failed.is_empty() {
        bail!("workers failed: {}", failed.join(", "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use lt_config::ConfigTree;
    use lt_engine::builtin_catalog;
    use serde_json::json;
    use tempfile::tempdir;

    fn compile_config(config: serde_json::Value) -> Vec<ConfigTree> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("experiment.json");
        std::fs::write(&path, config.to_string()).unwrap();
        let output = dir.path().join("runs");

        let cli = Cli::try_parse_from([
            "lighter",
            "compile",
            "--config",
            path.to_str().unwrap(),
            "--output",
            output.to_str().unwrap(),
        ])
        .unwrap();
        execute(cli, Arc::new(builtin_catalog())).unwrap();

        let runs: Vec<_> = std::fs::read_dir(&output).unwrap().map(|e| e.unwrap().path()).collect();
        assert_eq!(runs.len(), 1, "expected one <output>/<run-name> directory");
        assert!(runs[0].is_dir());
        std::fs::read_dir(&runs[0])
            .unwrap()
            .map(|e| ConfigTree::load(e.unwrap().path()).unwrap())
            .collect()
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_compile_writes_one_snapshot_per_combination() {
        let snapshots = compile_config(json!({
            "optimizer": {"lr": 0.1},
            "search": {
                "sweep": {
                    "units": {"grid": {"ref": "model.units", "min": 1, "max": 4}},
                    "pretrained": {"binary": {"ref": "model.pretrained"}}
                }
            }
        }));
        assert_eq!(snapshots.len(), 8);
        for snapshot in &snapshots {
            assert!(!snapshot.has_value(SEARCH_KEY));
            assert_eq!(snapshot.get::<f64>("optimizer.lr"), Some(0.1));
            assert!(snapshot.has_value("model.units"));
        }
    }

    #[test]
    fn test_compile_without_search_writes_a_single_snapshot() {
        let snapshots = compile_config(json!({"epochs": 2}));
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].get::<i64>("epochs"), Some(2));
        assert!(snapshots[0].has_value(lt_optimizer::EXPERIMENT_ID_KEY));
    }

    #[test]
    fn test_parses_worker_with_forwarded_overrides() {
        let cli = Cli::try_parse_from([
            "lighter", "worker", "--schedule", "m.json", "--bucket", "cuda:1", "--experiment", "x.Y", "--", "--epochs", "2",
        ])
        .unwrap();
        match cli.command {
            Command::Worker { bucket, overrides, .. } => {
                assert_eq!(bucket, "cuda:1");
                assert_eq!(overrides, vec!["--epochs", "2"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_schedule_defaults() {
        let cli = Cli::try_parse_from(["lighter", "schedule", "--input", "runs/search/amused-frog"]).unwrap();
        match cli.command {
            Command::Schedule { workers, device, plan_only, .. } => {
                assert_eq!(workers, 1);
                assert_eq!(device, "cuda");
                assert!(!plan_only);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
