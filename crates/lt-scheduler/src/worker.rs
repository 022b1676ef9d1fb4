//! The worker side: run every snapshot of one bucket in isolated contexts.

use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use lt_engine::{Context, ContextOptions, FactoryCatalog};
use lt_types::{Device, LtResult};

use crate::manifest::{bucket_device, Schedule};
use crate::run::{ExperimentRun, WorkerReport};

/// Build a fresh context for `config_path` and run `experiment` in it.
///
/// Types are registered while the config loads but only built after the
/// device and process are bound, so factories see both.
pub fn run_snapshot(
    config_path: &Path,
    experiment: &str,
    device: &Device,
    args: &[String],
    catalog: Arc<FactoryCatalog>,
) -> LtResult<()> {
    let options = ContextOptions::from_file(config_path)
        .with_args(args.to_vec())
        .with_device(device.clone())
        .with_auto_instantiate(false);
    let mut context = Context::create(options, catalog)?;
    context.set_device(device.clone());
    context.bind_process(std::process::id());
    context.instantiate_types()?;

    let mut runnable = context.construct_experiment(experiment)?;
    runnable.run()
}

/// Run every file of `bucket` in order. The first failing file ends the
/// bucket; the report records it and the files before it.
pub fn run_bucket(
    manifest: &Path,
    bucket: &str,
    experiment: &str,
    args: &[String],
    catalog: Arc<FactoryCatalog>,
) -> LtResult<WorkerReport> {
    let schedule = Schedule::load(manifest)?;
    let files = schedule.bucket(bucket)?;
    let device = bucket_device(bucket)?;
    let mut report = WorkerReport::new(bucket, device.clone());
    info!("Worker {} on {}: {} file(s)", bucket, device, files.len());

    for path in files {
        let mut run = ExperimentRun::new(path.clone(), bucket);
        run.mark_running(std::process::id());
        match run_snapshot(path, experiment, &device, args, catalog.clone()) {
            Ok(()) => {
                run.mark_completed();
                info!("Worker {}: {} completed", bucket, path.display());
                report.runs.push(run);
            }
            Err(e) => {
                error!("Worker {}: {} failed: {}", bucket, path.display(), e);
                run.mark_failed(e.to_string());
                report.runs.push(run);
                break;
            }
        }
    }

    report.finish();
    info!(
        "Worker {} done: {} completed, {} failed",
        bucket,
        report.completed(),
        report.failed()
    );
    Ok(report)
}
