//! Partitions snapshot files across worker processes and runs them.

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use tracing::{error, info, warn};

use lt_engine::DRY_RUN_EXPERIMENT;
use lt_types::{internal_error, Device, LtResult, DEVICE_ENV};

use crate::manifest::{bucket_device, Schedule};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Directory of compiled snapshot files.
    pub input_dir: PathBuf,
    pub num_workers: usize,
    /// Device family the buckets are pinned to (`cuda`, `cpu`).
    pub device_name: String,
    /// Catalog name of the experiment each worker runs.
    pub experiment: String,
    /// Worker executable; the current executable when unset.
    pub program: Option<PathBuf>,
    /// Forwarded to every worker after `--`.
    pub extra_args: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("runs/search"),
            num_workers: 1,
            device_name: "cuda".to_string(),
            experiment: DRY_RUN_EXPERIMENT.to_string(),
            program: None,
            extra_args: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn new(input_dir: impl Into<PathBuf>, num_workers: usize) -> Self {
        Self {
            input_dir: input_dir.into(),
            num_workers,
            ..Self::default()
        }
    }

    pub fn with_device(mut self, device_name: impl Into<String>) -> Self {
        self.device_name = device_name.into();
        self
    }

    pub fn with_experiment(mut self, experiment: impl Into<String>) -> Self {
        self.experiment = experiment.into();
        self
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }
}

/// Progress notifications for an optional listener.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    ScheduleBuilt {
        manifest: PathBuf,
        buckets: usize,
        files: usize,
        at: DateTime<Utc>,
    },
    WorkerSpawned {
        bucket: String,
        pid: u32,
    },
    WorkerFinished {
        bucket: String,
    },
    WorkerFailed {
        bucket: String,
        message: String,
    },
}

/// A worker process ready to be started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerProcess {
    pub bucket: String,
    pub device: Device,
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerProcess {
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).env(DEVICE_ENV, self.device.to_string());
        command
    }
}

/// How one worker process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerOutcome {
    pub bucket: String,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

impl WorkerOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.exit_code == Some(0)
    }
}

#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    schedule: Option<Schedule>,
    manifest_path: PathBuf,
    events: Option<Sender<SchedulerEvent>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let manifest_path = Schedule::manifest_path(&config.input_dir);
        Self {
            config,
            schedule: None,
            manifest_path,
            events: None,
        }
    }

    pub fn with_events(mut self, tx: Sender<SchedulerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    fn emit(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }

    /// Partition the input directory and write the manifest beside it.
    pub fn build_schedule(&mut self) -> LtResult<&Schedule> {
        let schedule = Schedule::build(&self.config.input_dir, &self.config.device_name, self.config.num_workers)?;
        schedule.save(&self.manifest_path)?;
        info!(
            "Scheduled {} file(s) over {} worker(s), manifest {}",
            schedule.total_files(),
            schedule.len(),
            self.manifest_path.display()
        );
        self.emit(SchedulerEvent::ScheduleBuilt {
            manifest: self.manifest_path.clone(),
            buckets: schedule.len(),
            files: schedule.total_files(),
            at: schedule.created_at(),
        });
        Ok(&*self.schedule.insert(schedule))
    }

    /// One worker invocation per bucket, each pinned to its device.
    pub fn create_processes(&self) -> LtResult<Vec<WorkerProcess>> {
        let schedule = self
            .schedule
            .as_ref()
            .ok_or_else(|| internal_error!("build_schedule must run before create_processes"))?;
        let program = match &self.config.program {
            Some(program) => program.clone(),
            None => std::env::current_exe()?,
        };

        schedule
            .keys()
            .map(|bucket| -> LtResult<WorkerProcess> {
                let mut args = vec![
                    "worker".to_string(),
                    "--schedule".to_string(),
                    self.manifest_path.display().to_string(),
                    "--bucket".to_string(),
                    bucket.to_string(),
                    "--experiment".to_string(),
                    self.config.experiment.clone(),
                ];
                if !self.config.extra_args.is_empty() {
                    args.push("--".to_string());
                    args.extend(self.config.extra_args.iter().cloned());
                }
                Ok(WorkerProcess {
                    bucket: bucket.to_string(),
                    device: bucket_device(bucket)?,
                    program: program.clone(),
                    args,
                })
            })
            .collect()
    }

    /// Start every worker, then wait for all of them. A worker that fails to
    /// start or exits non-zero is reported; its siblings keep running.
    pub fn execute_processes(&self, workers: &[WorkerProcess]) -> Vec<WorkerOutcome> {
        let mut running: Vec<(&WorkerProcess, Child)> = Vec::new();
        let mut outcomes = Vec::new();

        for worker in workers {
            match worker.command().spawn() {
                Ok(child) => {
                    info!("Worker {} started (pid {})", worker.bucket, child.id());
                    self.emit(SchedulerEvent::WorkerSpawned {
                        bucket: worker.bucket.clone(),
                        pid: child.id(),
                    });
                    running.push((worker, child));
                }
                Err(e) => {
                    error!("Worker {} failed to start: {}", worker.bucket, e);
                    self.emit(SchedulerEvent::WorkerFailed {
                        bucket: worker.bucket.clone(),
                        message: e.to_string(),
                    });
                    outcomes.push(WorkerOutcome {
                        bucket: worker.bucket.clone(),
                        exit_code: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        for (worker, mut child) in running {
            let outcome = match child.wait() {
                Ok(status) if status.success() => WorkerOutcome {
                    bucket: worker.bucket.clone(),
                    exit_code: status.code(),
                    error: None,
                },
                Ok(status) => WorkerOutcome {
                    bucket: worker.bucket.clone(),
                    exit_code: status.code(),
                    error: Some(format!("worker exited with {status}")),
                },
                Err(e) => WorkerOutcome {
                    bucket: worker.bucket.clone(),
                    exit_code: None,
                    error: Some(e.to_string()),
                },
            };
            match &outcome.error {
                None => {
                    info!("Worker {} finished", worker.bucket);
                    self.emit(SchedulerEvent::WorkerFinished {
                        bucket: worker.bucket.clone(),
                    });
                }
                Some(message) => {
                    warn!("Worker {} failed: {}", worker.bucket, message);
                    self.emit(SchedulerEvent::WorkerFailed {
                        bucket: worker.bucket.clone(),
                        message: message.clone(),
                    });
                }
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Build, spawn and join in one call.
    pub fn run(&mut self) -> LtResult<Vec<WorkerOutcome>> {
        self.build_schedule()?;
        let workers = self.create_processes()?;
        Ok(self.execute_processes(&workers))
    }
}
