//! Retry-with-timeout for supervised jobs.

use crossbeam_channel::{bounded, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use lt_types::LtResult;

pub const TIMEOUT_1_SECOND: Duration = Duration::from_secs(1);
pub const TIMEOUT_5_SECONDS: Duration = Duration::from_secs(5);
pub const TIMEOUT_10_SECONDS: Duration = Duration::from_secs(10);
pub const TIMEOUT_30_SECONDS: Duration = Duration::from_secs(30);
pub const TIMEOUT_1_MINUTE: Duration = Duration::from_secs(60);
pub const TIMEOUT_5_MINUTES: Duration = Duration::from_secs(5 * 60);
pub const TIMEOUT_10_MINUTES: Duration = Duration::from_secs(10 * 60);
pub const TIMEOUT_15_MINUTES: Duration = Duration::from_secs(15 * 60);
pub const TIMEOUT_30_MINUTES: Duration = Duration::from_secs(30 * 60);
pub const TIMEOUT_1_HOUR: Duration = Duration::from_secs(3600);
pub const TIMEOUT_2_HOURS: Duration = Duration::from_secs(2 * 3600);
pub const TIMEOUT_5_HOURS: Duration = Duration::from_secs(5 * 3600);
pub const TIMEOUT_10_HOURS: Duration = Duration::from_secs(10 * 3600);
pub const TIMEOUT_12_HOURS: Duration = Duration::from_secs(12 * 3600);
pub const TIMEOUT_24_HOURS: Duration = Duration::from_secs(24 * 3600);
/// Wait for as long as the job takes.
pub const TIMEOUT_INFINITY: Duration = Duration::MAX;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Total attempts before giving up.
    pub retries: usize,
    /// Budget for all attempts together.
    pub timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            retries: 5,
            timeout: TIMEOUT_INFINITY,
        }
    }
}

impl SupervisorConfig {
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisedOutcome {
    Completed { attempts: usize },
    Failed { attempts: usize, error: String },
    /// The job was still running when the timeout expired. Its thread is
    /// left detached.
    TimedOut,
}

impl SupervisedOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Run `job` on a helper thread, retrying failed attempts, and wait for it
/// at most `config.timeout`.
pub fn supervise<F>(name: &str, config: &SupervisorConfig, mut job: F) -> SupervisedOutcome
where
    F: FnMut() -> LtResult<()> + Send + 'static,
{
    let (tx, rx) = bounded(1);
    let retries = config.retries.max(1);
    let job_name = name.to_string();

    let spawned = thread::Builder::new()
        .name(format!("supervise-{name}"))
        .spawn(move || {
            let mut last_error = String::new();
            for attempt in 1..=retries {
                match job() {
                    Ok(()) => {
                        let _ = tx.send(SupervisedOutcome::Completed { attempts: attempt });
                        return;
                    }
                    Err(e) => {
                        warn!("Proc: {} attempt {}/{} failed: {}", job_name, attempt, retries, e);
                        last_error = e.to_string();
                    }
                }
            }
            let _ = tx.send(SupervisedOutcome::Failed {
                attempts: retries,
                error: last_error,
            });
        });
    if let Err(e) = spawned {
        error!("Proc: could not start {}: {}", name, e);
        return SupervisedOutcome::Failed {
            attempts: 0,
            error: e.to_string(),
        };
    }

    let started = Instant::now();
    let received = if config.timeout == TIMEOUT_INFINITY {
        rx.recv().map_err(|_| RecvTimeoutError::Disconnected)
    } else {
        rx.recv_timeout(config.timeout)
    };
    let outcome = match received {
        Ok(outcome) => outcome,
        Err(RecvTimeoutError::Timeout) => SupervisedOutcome::TimedOut,
        Err(RecvTimeoutError::Disconnected) => SupervisedOutcome::Failed {
            attempts: 0,
            error: "job thread exited without reporting".to_string(),
        },
    };

    debug!("Proc: {} wait complete after {:?}", name, started.elapsed());
    match &outcome {
        SupervisedOutcome::Completed { attempts } => info!("Proc: successful {} ({} attempt(s))", name, attempts),
        SupervisedOutcome::Failed { attempts, error } => {
            error!("Proc: failed {} after {} attempt(s): {}", name, attempts, error)
        }
        SupervisedOutcome::TimedOut => error!("Proc: {} timed out after {:?}", name, config.timeout),
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use lt_types::internal_error;

    #[test]
    fn test_succeeds_first_time() {
        let outcome = supervise("ok", &SupervisorConfig::default(), || Ok(()));
        assert_eq!(outcome, SupervisedOutcome::Completed { attempts: 1 });
    }

    #[test]
    fn test_fail_once_then_succeed() {
        let mut calls = 0;
        let outcome = supervise("flaky", &SupervisorConfig::default(), move || {
            calls += 1;
            if calls == 1 {
                Err(internal_error!("first attempt fails"))
            } else {
                Ok(())
            }
        });
        assert_eq!(outcome, SupervisedOutcome::Completed { attempts: 2 });
    }

    #[test]
    fn test_gives_up_after_retries() {
        let config = SupervisorConfig::default().with_retries(3);
        let outcome = supervise("broken", &config, || Err(internal_error!("always")));
        match outcome {
            SupervisedOutcome::Failed { attempts, error } => {
                assert_eq!(attempts, 3);
                assert!(error.contains("always"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_slow_job_times_out() {
        let config = SupervisorConfig::default().with_timeout(Duration::from_millis(50));
        let outcome = supervise("frozen", &config, || {
            thread::sleep(Duration::from_millis(500));
            Ok(())
        });
        assert_eq!(outcome, SupervisedOutcome::TimedOut);
    }

    #[test]
    fn test_timeout_buckets_are_ordered() {
        assert!(TIMEOUT_1_SECOND < TIMEOUT_1_MINUTE);
        assert!(TIMEOUT_1_HOUR < TIMEOUT_24_HOURS);
        assert_eq!(TIMEOUT_24_HOURS.as_secs(), 86_400);
    }
}
