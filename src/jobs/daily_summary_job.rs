//! Daily summary report.
//!
//! Builds the report from the `agworld:<resource>:latest` snapshots the
//! pollers keep, fetching any resource whose snapshot has expired. The
//! rendered document is written to the report directory, emailed, and its
//! metadata saved. A delivery failure is recorded on the run but does not
//! fail it; a render failure fails it before anything is sent.
//!
//! # Params
//!
//! - `recipients`: comma-separated addresses overriding `REPORT_RECIPIENTS`.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::external::data_source::{latest_key, ResourceType};
use crate::jobs::poll_job::{fetch_resource, stage_results};
use crate::jobs::{JobError, RunScope};
use crate::models::{DeliveryStatus, JobParams, ReportMetadata};
use crate::services::job_executor::{JobContext, JobResult};
use crate::services::notification_service::{EmailAttachment, ReportEmail};
use crate::services::processor::{aggregate, process_records, ResourceSnapshot};
use crate::services::report_service::{write_report, ReportContent};

pub const REPORT_TYPE: &str = "daily_summary";
pub const LATEST_REPORT_KEY: &str = "report:daily:latest";

async fn latest_snapshot(
    ctx: &JobContext,
    scope: &mut RunScope,
    resource: ResourceType,
) -> Result<ResourceSnapshot, JobError> {
    if let Some(cached) = ctx.cache.get(&latest_key(resource)).await {
        match serde_json::from_value::<ResourceSnapshot>(cached) {
            Ok(snapshot) => return Ok(snapshot),
            Err(e) => warn!("Ignoring unreadable {} snapshot: {}", resource, e),
        }
    }

    info!("📥 No fresh {} snapshot, fetching", resource);
    let params = JobParams::new();
    let lookup = fetch_resource(ctx, scope, resource, &params, false).await?;
    let snapshot = process_records(resource, lookup.value());
    stage_results(ctx, scope, resource, &params, &lookup, &snapshot);
    Ok(snapshot)
}

fn recipients(ctx: &JobContext, scope: &RunScope) -> Vec<String> {
    match scope.descriptor().param("recipients").and_then(|v| v.as_str()) {
        Some(list) => list
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        None => ctx.recipients.clone(),
    }
}

pub async fn run(ctx: &JobContext, scope: &mut RunScope) -> Result<JobResult, JobError> {
    info!("📊 Generating daily summary report...");

    let mut snapshots = Vec::with_capacity(ResourceType::ALL.len());
    for resource in ResourceType::ALL {
        snapshots.push(latest_snapshot(ctx, scope, resource).await?);
    }

    let data = aggregate(&snapshots);
    if data.total_records == 0 {
        return Err(JobError::NoData("no field, activity or crop records available".into()));
    }

    let generated_at = Utc::now();
    let content = ReportContent {
        title: format!("Daily Agworld Summary - {}", generated_at.format("%Y-%m-%d")),
        report_type: REPORT_TYPE.to_string(),
        generated_at,
        data,
    };

    let document = ctx.renderer.render(&content)?;

    let report_id = Uuid::new_v4();
    let path = write_report(&ctx.report_dir, REPORT_TYPE, report_id, &document).await?;

    let recipients = recipients(ctx, scope);
    let delivery = if recipients.is_empty() {
        info!("📭 No report recipients configured, skipping delivery");
        DeliveryStatus::NotAttempted
    } else {
        let email = ReportEmail {
            subject: format!("Agworld Report - {}", content.title),
            text_body: document.text.clone(),
            html_body: String::from_utf8(document.bytes.clone()).ok(),
            attachment: Some(EmailAttachment {
                filename: format!("{}_{}.{}", REPORT_TYPE, generated_at.format("%Y%m%d"), document.extension),
                content_type: document.content_type.to_string(),
                bytes: document.bytes.clone(),
            }),
        };

        match ctx.notifier.send(&email, &recipients).await {
            Ok(()) => DeliveryStatus::Delivered,
            Err(e) => {
                warn!("❌ {}", JobError::Delivery(e.to_string()));
                DeliveryStatus::Failed
            }
        }
    };

    let metadata = ReportMetadata {
        id: report_id,
        job_run_id: Some(scope.run_id()),
        title: content.title.clone(),
        report_type: REPORT_TYPE.to_string(),
        file_path: path.display().to_string(),
        content_type: document.content_type.to_string(),
        size_bytes: document.bytes.len() as i64,
        record_count: content.data.total_records as i32,
        created_at: generated_at,
        delivery_status: delivery,
        recipients,
    };
    ctx.reports.save_report(&metadata).await?;

    if let Ok(value) = serde_json::to_value(&metadata) {
        scope.stage(LATEST_REPORT_KEY, value, ctx.ttls.report);
    }

    info!(
        "✅ Daily summary {} generated with {} records (delivery: {})",
        report_id,
        metadata.record_count,
        delivery.as_str()
    );

    Ok(JobResult {
        items_processed: metadata.record_count,
        items_failed: snapshots.iter().map(|s| s.skipped as i32).sum(),
        delivery: Some(delivery),
    })
}
