//! Per-snapshot run records and the summary a worker reports for its bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use lt_types::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One snapshot file executed (or about to be executed) by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRun {
    pub id: Uuid,
    pub config_path: PathBuf,
    pub bucket: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub process_id: Option<u32>,
    pub error: Option<String>,
}

impl ExperimentRun {
    pub fn new(config_path: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            config_path: config_path.into(),
            bucket: bucket.into(),
            status: RunStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            process_id: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self, process_id: u32) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
        self.process_id = Some(process_id);
    }

    pub fn mark_completed(&mut self) {
        self.status = RunStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = RunStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Wall time between start and finish, if both are known.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Everything one worker did with its bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub bucket: String,
    pub device: Device,
    pub runs: Vec<ExperimentRun>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkerReport {
    pub fn new(bucket: impl Into<String>, device: Device) -> Self {
        Self {
            bucket: bucket.into(),
            device,
            runs: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn count(&self, status: RunStatus) -> usize {
        self.runs.iter().filter(|run| run.status == status).count()
    }

    pub fn completed(&self) -> usize {
        self.count(RunStatus::Completed)
    }

    pub fn failed(&self) -> usize {
        self.count(RunStatus::Failed)
    }

    pub fn is_success(&self) -> bool {
        self.runs.iter().all(|run| run.status == RunStatus::Completed)
    }

    pub fn first_error(&self) -> Option<&str> {
        self.runs.iter().find_map(|run| run.error.as_deref())
    }
}
