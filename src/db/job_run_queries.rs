use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{JobCompletion, JobRun, JobStats, JobType};
use crate::store::StoreError;

const RUN_COLUMNS: &str = "id, job_type, trigger_kind, descriptor_id, scheduled_at, started_at, finished_at, \
     status, error_message, error_kind, attempts, items_processed, items_failed, delivery_status, duration_ms";

#[derive(Debug, sqlx::FromRow)]
pub struct JobRunRow {
    pub id: Uuid,
    pub job_type: String,
    pub trigger_kind: String,
    pub descriptor_id: Option<Uuid>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: String,
    pub error_message: Option<String>,
    pub error_kind: Option<String>,
    pub attempts: i32,
    pub items_processed: i32,
    pub items_failed: i32,
    pub delivery_status: Option<String>,
    pub duration_ms: Option<i64>,
}

impl TryFrom<JobRunRow> for JobRun {
    type Error = StoreError;

    fn try_from(row: JobRunRow) -> Result<Self, Self::Error> {
        Ok(JobRun {
            id: row.id,
            job_type: row.job_type.parse().map_err(StoreError::Corrupt)?,
            trigger: row.trigger_kind.parse().map_err(StoreError::Corrupt)?,
            descriptor_id: row.descriptor_id,
            scheduled_at: row.scheduled_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            error_message: row.error_message,
            error_kind: row.error_kind,
            attempts: row.attempts,
            items_processed: row.items_processed,
            items_failed: row.items_failed,
            delivery_status: row
                .delivery_status
                .map(|s| s.parse())
                .transpose()
                .map_err(StoreError::Corrupt)?,
            duration_ms: row.duration_ms,
        })
    }
}

fn into_runs(rows: Vec<JobRunRow>) -> Result<Vec<JobRun>, StoreError> {
    rows.into_iter().map(JobRun::try_from).collect()
}

/// Inserts a run as-is. Used both for `running` records and for runs that
/// arrive already finalized.
pub async fn insert(pool: &PgPool, run: &JobRun) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO job_runs (id, job_type, trigger_kind, descriptor_id, scheduled_at, started_at, finished_at,
                               status, error_message, error_kind, attempts, items_processed, items_failed,
                               delivery_status, duration_ms)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
    )
    .bind(run.id)
    .bind(run.job_type.as_str())
    .bind(run.trigger.as_str())
    .bind(run.descriptor_id)
    .bind(run.scheduled_at)
    .bind(run.started_at)
    .bind(run.finished_at)
    .bind(run.status.as_str())
    .bind(&run.error_message)
    .bind(&run.error_kind)
    .bind(run.attempts)
    .bind(run.items_processed)
    .bind(run.items_failed)
    .bind(run.delivery_status.map(|d| d.as_str()))
    .bind(run.duration_ms)
    .execute(pool)
    .await?;
    Ok(())
}

/// Finalizes a running record. The `finished_at IS NULL` guard makes a
/// second finalize a no-op at the database level.
pub async fn finish(pool: &PgPool, id: Uuid, completion: &JobCompletion) -> Result<JobRun, StoreError> {
    let row = sqlx::query_as::<_, JobRunRow>(&format!(
        "UPDATE job_runs
         SET finished_at = $2,
             status = $3,
             error_message = $4,
             error_kind = $5,
             attempts = $6,
             items_processed = $7,
             items_failed = $8,
             delivery_status = $9,
             duration_ms = (EXTRACT(EPOCH FROM ($2 - started_at)) * 1000)::BIGINT
         WHERE id = $1 AND finished_at IS NULL
         RETURNING {}",
        RUN_COLUMNS
    ))
    .bind(id)
    .bind(completion.finished_at)
    .bind(completion.status.as_str())
    .bind(&completion.error_message)
    .bind(&completion.error_kind)
    .bind(completion.attempts)
    .bind(completion.items_processed)
    .bind(completion.items_failed)
    .bind(completion.delivery_status.map(|d| d.as_str()))
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => row.try_into(),
        None => match fetch_one(pool, id).await? {
            Some(_) => Err(StoreError::AlreadyFinalized(id)),
            None => Err(StoreError::NotFound(id)),
        },
    }
}

pub async fn fetch_one(pool: &PgPool, id: Uuid) -> Result<Option<JobRun>, StoreError> {
    sqlx::query_as::<_, JobRunRow>(&format!("SELECT {} FROM job_runs WHERE id = $1", RUN_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(JobRun::try_from)
        .transpose()
}

pub async fn fetch_recent(pool: &PgPool, limit: usize) -> Result<Vec<JobRun>, StoreError> {
    let rows = sqlx::query_as::<_, JobRunRow>(&format!(
        "SELECT {} FROM job_runs ORDER BY started_at DESC LIMIT $1",
        RUN_COLUMNS
    ))
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;
    into_runs(rows)
}

pub async fn fetch_history(pool: &PgPool, job_type: JobType, limit: usize) -> Result<Vec<JobRun>, StoreError> {
    let rows = sqlx::query_as::<_, JobRunRow>(&format!(
        "SELECT {} FROM job_runs WHERE job_type = $1 ORDER BY started_at DESC LIMIT $2",
        RUN_COLUMNS
    ))
    .bind(job_type.as_str())
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;
    into_runs(rows)
}

#[derive(Debug, sqlx::FromRow)]
struct JobStatsRow {
    total_runs: i64,
    successful_runs: i64,
    failed_runs: i64,
    skipped_runs: i64,
    avg_duration_ms: Option<f64>,
    avg_items_processed: Option<f64>,
    last_run: Option<DateTime<Utc>>,
    last_status: Option<String>,
}

pub async fn fetch_stats(pool: &PgPool, job_type: JobType) -> Result<JobStats, StoreError> {
    let row = sqlx::query_as::<_, JobStatsRow>(
        "SELECT
            COUNT(*) AS total_runs,
            COUNT(*) FILTER (WHERE status = 'success') AS successful_runs,
            COUNT(*) FILTER (WHERE status = 'failed') AS failed_runs,
            COUNT(*) FILTER (WHERE status = 'skipped') AS skipped_runs,
            (AVG(duration_ms) FILTER (WHERE finished_at IS NOT NULL AND status <> 'skipped'))::FLOAT8 AS avg_duration_ms,
            (AVG(items_processed) FILTER (WHERE finished_at IS NOT NULL AND status <> 'skipped'))::FLOAT8 AS avg_items_processed,
            MAX(started_at) AS last_run,
            (SELECT status FROM job_runs WHERE job_type = $1 ORDER BY started_at DESC LIMIT 1) AS last_status
         FROM job_runs
         WHERE job_type = $1",
    )
    .bind(job_type.as_str())
    .fetch_one(pool)
    .await?;

    Ok(JobStats {
        job_type,
        total_runs: row.total_runs,
        successful_runs: row.successful_runs,
        failed_runs: row.failed_runs,
        skipped_runs: row.skipped_runs,
        avg_duration_ms: row.avg_duration_ms,
        avg_items_processed: row.avg_items_processed,
        last_run: row.last_run,
        last_status: row
            .last_status
            .map(|s| s.parse())
            .transpose()
            .map_err(StoreError::Corrupt)?,
    })
}
