//! Background Jobs Module
//!
//! One module per job family. Every job runs inside a worker through
//! `JobExecutor`, which owns the JobRun bookkeeping, the timeout and the
//! commit of staged cache writes; jobs themselves only fetch, process,
//! render and deliver.
//!
//! # Available Jobs
//!
//! - `poll_job` - Polls fields, activities or crops and stages the raw payload and processed snapshot
//! - `daily_summary_job` - Aggregates the latest snapshots into an HTML report and emails it
//! - `cache_cleanup_job` - Evicts expired cache entries

pub mod cache_cleanup_job;
pub mod daily_summary_job;
pub mod poll_job;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::external::data_source::{DataSourceError, ErrorClass, ResourceType};
use crate::models::{JobDescriptor, JobType};
use crate::services::cache_service::StagedWrites;
use crate::services::job_executor::{JobContext, JobResult};
use crate::services::report_service::RenderError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("transient upstream failure: {0}")]
    TransientUpstream(DataSourceError),

    #[error("fatal upstream failure: {0}")]
    FatalUpstream(DataSourceError),

    #[error("report render failed: {0}")]
    Render(String),

    #[error("report delivery failed: {0}")]
    Delivery(String),

    #[error("a {0} job is already queued or running")]
    ConcurrencyConflict(JobType),

    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("job exceeded its {0:?} timeout")]
    Timeout(Duration),

    #[error("no data to report: {0}")]
    NoData(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Stable name stored as `JobRun::error_kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::TransientUpstream(_) => "transient_upstream",
            JobError::FatalUpstream(_) => "fatal_upstream",
            JobError::Render(_) => "render",
            JobError::Delivery(_) => "delivery",
            JobError::ConcurrencyConflict(_) => "concurrency_conflict",
            JobError::CacheUnavailable(_) => "cache_unavailable",
            JobError::Timeout(_) => "timeout",
            JobError::NoData(_) => "no_data",
            JobError::Internal(_) => "internal",
        }
    }
}

impl From<DataSourceError> for JobError {
    fn from(e: DataSourceError) -> Self {
        match e.class() {
            ErrorClass::Fatal => JobError::FatalUpstream(e),
            ErrorClass::Transient | ErrorClass::RateLimited => JobError::TransientUpstream(e),
        }
    }
}

impl From<StoreError> for JobError {
    fn from(e: StoreError) -> Self {
        JobError::Internal(e.to_string())
    }
}

impl From<RenderError> for JobError {
    fn from(e: RenderError) -> Self {
        JobError::Render(e.to_string())
    }
}

impl From<std::io::Error> for JobError {
    fn from(e: std::io::Error) -> Self {
        JobError::Internal(e.to_string())
    }
}

/// Per-execution state handed to a job.
pub struct RunScope {
    run_id: Uuid,
    descriptor: JobDescriptor,
    staged: StagedWrites,
    attempts: Arc<AtomicU32>,
}

impl RunScope {
    /// `attempts` is shared with the executor so the count survives a timeout.
    pub fn new(run_id: Uuid, descriptor: JobDescriptor, attempts: Arc<AtomicU32>) -> Self {
        Self {
            run_id,
            descriptor,
            staged: StagedWrites::new(),
            attempts,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn descriptor(&self) -> &JobDescriptor {
        &self.descriptor
    }

    pub fn stage(&mut self, key: impl Into<String>, value: Value, ttl: Duration) {
        self.staged.set(key, value, ttl);
    }

    pub fn staged(&self) -> &StagedWrites {
        &self.staged
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn attempt_counter(&self) -> Arc<AtomicU32> {
        self.attempts.clone()
    }

    pub fn into_staged(self) -> StagedWrites {
        self.staged
    }
}

/// Runs the job a descriptor names.
pub async fn dispatch(ctx: &JobContext, scope: &mut RunScope) -> Result<JobResult, JobError> {
    match scope.descriptor().job_type() {
        JobType::FieldPoll => poll_job::run(ctx, scope, ResourceType::Fields).await,
        JobType::ActivityPoll => poll_job::run(ctx, scope, ResourceType::Activities).await,
        JobType::CropPoll => poll_job::run(ctx, scope, ResourceType::Crops).await,
        JobType::DailySummary => daily_summary_job::run(ctx, scope).await,
        JobType::CacheCleanup => cache_cleanup_job::run(ctx, scope).await,
    }
}
