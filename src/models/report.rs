use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::DeliveryStatus;

// Metadata about a generated report document. The document itself lives on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub id: Uuid,
    pub job_run_id: Option<Uuid>,
    pub title: String,
    pub report_type: String,
    pub file_path: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub record_count: i32,
    pub created_at: DateTime<Utc>,
    pub delivery_status: DeliveryStatus,
    pub recipients: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReportListParams {
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}
