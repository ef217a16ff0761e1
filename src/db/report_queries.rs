use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::ReportMetadata;
use crate::store::StoreError;

#[derive(Debug, sqlx::FromRow)]
struct ReportRow {
    id: Uuid,
    job_run_id: Option<Uuid>,
    title: String,
    report_type: String,
    file_path: String,
    content_type: String,
    size_bytes: i64,
    record_count: i32,
    created_at: DateTime<Utc>,
    delivery_status: String,
    recipients: Vec<String>,
}

impl TryFrom<ReportRow> for ReportMetadata {
    type Error = StoreError;

    fn try_from(row: ReportRow) -> Result<Self, Self::Error> {
        Ok(ReportMetadata {
            id: row.id,
            job_run_id: row.job_run_id,
            title: row.title,
            report_type: row.report_type,
            file_path: row.file_path,
            content_type: row.content_type,
            size_bytes: row.size_bytes,
            record_count: row.record_count,
            created_at: row.created_at,
            delivery_status: row.delivery_status.parse().map_err(StoreError::Corrupt)?,
            recipients: row.recipients,
        })
    }
}

pub async fn insert(pool: &PgPool, report: &ReportMetadata) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO report_metadata (id, job_run_id, title, report_type, file_path, content_type,
                                      size_bytes, record_count, created_at, delivery_status, recipients)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(report.id)
    .bind(report.job_run_id)
    .bind(&report.title)
    .bind(&report.report_type)
    .bind(&report.file_path)
    .bind(&report.content_type)
    .bind(report.size_bytes)
    .bind(report.record_count)
    .bind(report.created_at)
    .bind(report.delivery_status.as_str())
    .bind(&report.recipients)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_page(pool: &PgPool, skip: usize, limit: usize) -> Result<Vec<ReportMetadata>, StoreError> {
    sqlx::query_as::<_, ReportRow>(
        "SELECT id, job_run_id, title, report_type, file_path, content_type, size_bytes, record_count,
                created_at, delivery_status, recipients
         FROM report_metadata
         ORDER BY created_at DESC
         OFFSET $1 LIMIT $2",
    )
    .bind(skip as i64)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(ReportMetadata::try_from)
    .collect()
}

pub async fn fetch_one(pool: &PgPool, id: Uuid) -> Result<Option<ReportMetadata>, StoreError> {
    sqlx::query_as::<_, ReportRow>(
        "SELECT id, job_run_id, title, report_type, file_path, content_type, size_bytes, record_count,
                created_at, delivery_status, recipients
         FROM report_metadata
         WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .map(ReportMetadata::try_from)
    .transpose()
}
