//! # lt-scheduler
//!
//! Runs compiled search snapshots. A [`Scheduler`] deals the snapshot files
//! of a directory round-robin into per-device buckets, writes the manifest
//! and starts one `lighter worker` process per bucket. Each worker rebuilds
//! an isolated context for every file and runs the requested experiment.

pub mod cli;
pub mod manifest;
pub mod run;
pub mod scheduler;
pub mod supervise;
pub mod worker;

pub use manifest::{bucket_device, bucket_key, Schedule, MANIFEST_SUFFIX};
pub use run::{ExperimentRun, RunStatus, WorkerReport};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerEvent, WorkerOutcome, WorkerProcess};
pub use supervise::{
    supervise, SupervisedOutcome, SupervisorConfig, TIMEOUT_10_HOURS, TIMEOUT_10_MINUTES, TIMEOUT_10_SECONDS,
    TIMEOUT_12_HOURS, TIMEOUT_15_MINUTES, TIMEOUT_1_HOUR, TIMEOUT_1_MINUTE, TIMEOUT_1_SECOND, TIMEOUT_24_HOURS,
    TIMEOUT_2_HOURS, TIMEOUT_30_MINUTES, TIMEOUT_30_SECONDS, TIMEOUT_5_HOURS, TIMEOUT_5_MINUTES, TIMEOUT_5_SECONDS,
    TIMEOUT_INFINITY,
};
pub use worker::{run_bucket, run_snapshot};
