//! Postgres-backed JobRun log and report index.

pub mod job_run_queries;
pub mod report_queries;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::models::{JobCompletion, JobRun, JobStats, JobType, ReportMetadata};
use crate::store::{JobRunStore, ReportStore, StoreError};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects and applies the embedded migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        info!("🗃️  Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Db(e.into()))?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobRunStore for PgStore {
    async fn record_start(&self, run: &JobRun) -> Result<(), StoreError> {
        job_run_queries::insert(&self.pool, run).await
    }

    async fn record_finish(&self, id: Uuid, completion: &JobCompletion) -> Result<JobRun, StoreError> {
        job_run_queries::finish(&self.pool, id, completion).await
    }

    async fn append(&self, run: &JobRun) -> Result<(), StoreError> {
        job_run_queries::insert(&self.pool, run).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRun>, StoreError> {
        job_run_queries::fetch_one(&self.pool, id).await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<JobRun>, StoreError> {
        job_run_queries::fetch_recent(&self.pool, limit).await
    }

    async fn history(&self, job_type: JobType, limit: usize) -> Result<Vec<JobRun>, StoreError> {
        job_run_queries::fetch_history(&self.pool, job_type, limit).await
    }

    async fn stats(&self, job_type: JobType) -> Result<JobStats, StoreError> {
        job_run_queries::fetch_stats(&self.pool, job_type).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ReportStore for PgStore {
    async fn save_report(&self, report: &ReportMetadata) -> Result<(), StoreError> {
        report_queries::insert(&self.pool, report).await
    }

    async fn list_reports(&self, skip: usize, limit: usize) -> Result<Vec<ReportMetadata>, StoreError> {
        report_queries::fetch_page(&self.pool, skip, limit).await
    }

    async fn get_report(&self, id: Uuid) -> Result<Option<ReportMetadata>, StoreError> {
        report_queries::fetch_one(&self.pool, id).await
    }
}
