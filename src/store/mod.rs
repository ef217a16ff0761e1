//! Storage seams: the cache backend, the JobRun audit log and report metadata.
//!
//! Each trait has an in-memory implementation used by tests and by processes
//! started without `REDIS_URL` / `DATABASE_URL`. Redis backs the cache in
//! production; Postgres implementations of the other two live in `crate::db`.

mod memory_cache;
mod memory_store;
mod redis_cache;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{JobCompletion, JobRun, JobStats, JobType, ReportMetadata};

pub use memory_cache::MemoryCache;
pub use memory_store::MemoryStore;
pub use redis_cache::RedisCache;

/// A cached payload. Entries are replaced wholesale, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unreachable: {0}")]
    Unavailable(String),

    #[error("corrupt cache entry for {key}: {message}")]
    Corrupt { key: String, message: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("record not found: {0}")]
    NotFound(Uuid),

    #[error("job run {0} is already finalized")]
    AlreadyFinalized(Uuid),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the entry only while it is unexpired.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Evicts every entry expired at `now`, returning how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

/// Append-only audit log of job executions.
#[async_trait]
pub trait JobRunStore: Send + Sync {
    async fn record_start(&self, run: &JobRun) -> Result<(), StoreError>;

    /// Finalizes a running record. A record that already has `finished_at`
    /// is left untouched and `AlreadyFinalized` is returned.
    async fn record_finish(&self, id: Uuid, completion: &JobCompletion) -> Result<JobRun, StoreError>;

    /// Stores a record that is complete on arrival, such as a skipped tick.
    async fn append(&self, run: &JobRun) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<JobRun>, StoreError>;

    async fn recent(&self, limit: usize) -> Result<Vec<JobRun>, StoreError>;

    async fn history(&self, job_type: JobType, limit: usize) -> Result<Vec<JobRun>, StoreError>;

    async fn stats(&self, job_type: JobType) -> Result<JobStats, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn save_report(&self, report: &ReportMetadata) -> Result<(), StoreError>;

    /// Newest first.
    async fn list_reports(&self, skip: usize, limit: usize) -> Result<Vec<ReportMetadata>, StoreError>;

    async fn get_report(&self, id: Uuid) -> Result<Option<ReportMetadata>, StoreError>;
}

/// Aggregates runs of one job type the same way the SQL stats query does.
pub(crate) fn compute_stats(job_type: JobType, runs: &[&JobRun]) -> JobStats {
    use crate::models::JobStatus;

    let finished: Vec<&&JobRun> = runs
        .iter()
        .filter(|r| r.is_finalized() && r.status != JobStatus::Skipped)
        .collect();
    let avg = |values: Vec<f64>| {
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    };

    let last = runs.iter().max_by_key(|r| r.started_at);

    JobStats {
        job_type,
        total_runs: runs.len() as i64,
        successful_runs: runs.iter().filter(|r| r.status == JobStatus::Success).count() as i64,
        failed_runs: runs.iter().filter(|r| r.status == JobStatus::Failed).count() as i64,
        skipped_runs: runs.iter().filter(|r| r.status == JobStatus::Skipped).count() as i64,
        avg_duration_ms: avg(finished.iter().filter_map(|r| r.duration_ms).map(|d| d as f64).collect()),
        avg_items_processed: avg(finished.iter().map(|r| r.items_processed as f64).collect()),
        last_run: last.map(|r| r.started_at),
        last_status: last.map(|r| r.status),
    }
}
