use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

use crate::models::{JobRun, JobStatus, JobType};

/// Rolling health of one job type, rebuilt from finished runs since boot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobHealth {
    pub last_status: Option<JobStatus>,
    pub last_error: Option<String>,
    pub last_error_kind: Option<String>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    /// Failures in a row that retrying could not have fixed (auth, bad payloads).
    pub consecutive_fatal_failures: u32,
    pub total_runs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobHealthEntry {
    pub job_type: JobType,
    #[serde(flatten)]
    pub health: JobHealth,
}

#[derive(Clone, Default)]
pub struct JobHealthTracker {
    entries: Arc<DashMap<JobType, JobHealth>>,
}

impl JobHealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a finished run into its job type's health. Skipped ticks leave
    /// the failure streaks alone.
    pub fn record(&self, run: &JobRun) {
        let mut health = self.entries.entry(run.job_type).or_default();
        health.total_runs += 1;
        health.last_status = Some(run.status);
        health.last_finished_at = run.finished_at;

        match run.status {
            JobStatus::Success => {
                health.consecutive_failures = 0;
                health.consecutive_fatal_failures = 0;
                health.last_success_at = run.finished_at;
                health.last_error = None;
                health.last_error_kind = None;
            }
            JobStatus::Failed => {
                health.consecutive_failures += 1;
                if run.error_kind.as_deref() == Some("fatal_upstream") {
                    health.consecutive_fatal_failures += 1;
                } else {
                    health.consecutive_fatal_failures = 0;
                }
                health.last_error = run.error_message.clone();
                health.last_error_kind = run.error_kind.clone();
            }
            JobStatus::Skipped | JobStatus::Running => {}
        }
    }

    pub fn get(&self, job_type: JobType) -> JobHealth {
        self.entries.get(&job_type).map(|h| h.clone()).unwrap_or_default()
    }

    /// One entry per job type, in `JobType::ALL` order.
    pub fn snapshot(&self) -> Vec<JobHealthEntry> {
        JobType::ALL
            .iter()
            .map(|job_type| JobHealthEntry {
                job_type: *job_type,
                health: self.get(*job_type),
            })
            .collect()
    }
}
