use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tracing::{error, info, warn};

use crate::external::data_source::DataSource;
use crate::jobs::{self, JobError, RunScope};
use crate::models::{DeliveryStatus, JobCompletion, JobRun, JobStatus};
use crate::services::cache_service::{CacheLayer, CacheTtls};
use crate::services::job_health::JobHealthTracker;
use crate::services::notification_service::Notifier;
use crate::services::report_service::ReportRenderer;
use crate::services::retry::RetryPolicy;
use crate::services::worker_pool::QueuedJob;
use crate::store::{JobRunStore, ReportStore};

/// Everything a job can reach. Shared by all workers.
#[derive(Clone)]
pub struct JobContext {
    pub data_source: Arc<dyn DataSource>,
    pub cache: CacheLayer,
    pub runs: Arc<dyn JobRunStore>,
    pub reports: Arc<dyn ReportStore>,
    pub renderer: Arc<dyn ReportRenderer>,
    pub notifier: Arc<dyn Notifier>,
    pub retry: RetryPolicy,
    pub ttls: CacheTtls,
    pub report_dir: PathBuf,
    /// Used when a daily summary has no `recipients` param.
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct JobResult {
    pub items_processed: i32,
    pub items_failed: i32,
    pub delivery: Option<DeliveryStatus>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Runs one queued job end to end and records its JobRun.
pub struct JobExecutor {
    context: JobContext,
    health: JobHealthTracker,
    job_timeout: Duration,
}

impl JobExecutor {
    pub fn new(context: JobContext, health: JobHealthTracker, job_timeout: Duration) -> Self {
        Self {
            context,
            health,
            job_timeout,
        }
    }

    pub fn context(&self) -> &JobContext {
        &self.context
    }

    pub fn health(&self) -> &JobHealthTracker {
        &self.health
    }

    /// Executes a job and returns its finalized JobRun.
    ///
    /// Every execution ends in exactly one of `success` or `failed`: job
    /// errors, panics and timeouts are all recorded, never propagated. Staged
    /// cache writes are committed only on success. The job's lease is
    /// released after the run is finalized.
    pub async fn execute(&self, job: QueuedJob) -> JobRun {
        let QueuedJob { descriptor, lease } = job;
        let job_type = descriptor.job_type();

        let mut run = JobRun::started(&descriptor, Utc::now());
        info!("🏃 Starting job: {} (run {}, {})", job_type, run.id, descriptor.trigger().as_str());

        if let Err(e) = self.context.runs.record_start(&run).await {
            error!("Failed to record job start for {}: {}", job_type, e);
        }

        let attempts = Arc::new(AtomicU32::new(0));
        let mut scope = RunScope::new(run.id, descriptor, attempts.clone());
        let context = self.context.clone();
        let job_future = async move {
            let result = jobs::dispatch(&context, &mut scope).await;
            (result, scope.into_staged())
        };

        let outcome = tokio::time::timeout(self.job_timeout, AssertUnwindSafe(job_future).catch_unwind()).await;

        let result: Result<JobResult, JobError> = match outcome {
            Ok(Ok((Ok(result), staged))) => {
                let staged_count = staged.len();
                let written = staged.commit(&self.context.cache).await;
                if written < staged_count {
                    warn!("⚠️  {}: committed {}/{} staged cache writes", job_type, written, staged_count);
                }
                Ok(result)
            }
            Ok(Ok((Err(e), _discarded))) => Err(e),
            Ok(Err(panic)) => Err(JobError::Internal(format!("job panicked: {}", panic_message(panic.as_ref())))),
            Err(_elapsed) => Err(JobError::Timeout(self.job_timeout)),
        };

        let finished_at = Utc::now();
        let completion = match &result {
            Ok(r) => JobCompletion {
                finished_at,
                status: JobStatus::Success,
                error_message: None,
                error_kind: None,
                attempts: attempts.load(Ordering::SeqCst) as i32,
                items_processed: r.items_processed,
                items_failed: r.items_failed,
                delivery_status: r.delivery,
            },
            Err(e) => JobCompletion {
                finished_at,
                status: JobStatus::Failed,
                error_message: Some(e.to_string()),
                error_kind: Some(e.kind().to_string()),
                attempts: attempts.load(Ordering::SeqCst) as i32,
                items_processed: 0,
                items_failed: 0,
                delivery_status: None,
            },
        };

        match self.context.runs.record_finish(run.id, &completion).await {
            Ok(stored) => run = stored,
            Err(e) => {
                error!("Failed to record job completion for {}: {}", job_type, e);
                run.finalize(&completion);
            }
        }

        match &result {
            Ok(r) => info!(
                "✅ Job completed: {} (processed: {}, failed: {}, duration: {}ms)",
                job_type,
                r.items_processed,
                r.items_failed,
                run.duration_ms.unwrap_or_default()
            ),
            Err(e) => error!("❌ Job failed: {} - {} [{}]", job_type, e, e.kind()),
        }

        self.health.record(&run);
        drop(lease);
        run
    }
}
