use tracing::info;

use crate::jobs::{JobError, RunScope};
use crate::services::job_executor::{JobContext, JobResult};

/// Evicts expired entries from the cache backend.
pub async fn run(ctx: &JobContext, _scope: &mut RunScope) -> Result<JobResult, JobError> {
    info!("🧹 Cleaning up expired cache entries ({} backend)...", ctx.cache.backend_name());

    let evicted = ctx
        .cache
        .purge_expired()
        .await
        .map_err(|e| JobError::CacheUnavailable(e.to_string()))?;

    info!("🗑️ Evicted {} expired cache entries", evicted);

    Ok(JobResult {
        items_processed: evicted as i32,
        items_failed: 0,
        delivery: None,
    })
}
