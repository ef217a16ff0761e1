use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{JobDescriptor, JobParams, JobRun, JobStats, JobType};
use crate::services::worker_pool::InFlightSlot;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs))
        .route("/recent", get(recent_job_runs))
        .route("/:job_type/trigger", post(trigger_job))
        .route("/:job_type/history", get(job_history))
        .route("/:job_type/stats", get(job_stats))
}

#[derive(Debug, Serialize)]
struct JobInfo {
    job_type: JobType,
    enabled: bool,
    schedule: String,
    description: String,
    next_run: Option<DateTime<Utc>>,
    in_flight: Option<InFlightSlot>,
}

#[derive(Debug, Serialize)]
struct TriggerResponse {
    descriptor_id: Uuid,
    job_type: JobType,
    status: &'static str,
}

#[derive(Debug, Deserialize)]
struct LimitParams {
    limit: Option<usize>,
}

fn parse_job_type(raw: &str) -> Result<JobType, AppError> {
    raw.parse().map_err(AppError::Validation)
}

/// GET /api/v1/jobs - List all configured jobs
async fn list_jobs(State(state): State<AppState>) -> Result<Json<Vec<JobInfo>>, AppError> {
    let status = match &state.scheduler {
        Some(scheduler) => Some(scheduler.status().await),
        None => None,
    };

    let jobs = state
        .cadences
        .iter()
        .map(|cadence| JobInfo {
            job_type: cadence.job_type,
            enabled: cadence.enabled,
            schedule: cadence.schedule.clone(),
            description: cadence.description.clone(),
            next_run: status
                .as_ref()
                .and_then(|s| s.next_fire_times.get(cadence.job_type.as_str()).copied().flatten()),
            in_flight: state
                .dispatcher
                .as_ref()
                .and_then(|d| d.in_flight().get(cadence.job_type)),
        })
        .collect();

    Ok(Json(jobs))
}

/// GET /api/v1/jobs/recent - Get recent job runs
async fn recent_job_runs(
    Query(params): Query<LimitParams>,
    State(state): State<AppState>,
) -> Result<Json<Vec<JobRun>>, AppError> {
    let limit = params.limit.unwrap_or(50).min(500);
    Ok(Json(state.runs.recent(limit).await?))
}

/// POST /api/v1/jobs/:job_type/trigger - Run a job now
///
/// The optional JSON body is an object of primitive params handed to the job.
async fn trigger_job(
    Path(job_type): Path<String>,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<TriggerResponse>), AppError> {
    let job_type = parse_job_type(&job_type)?;

    let params: JobParams = if body.iter().all(u8::is_ascii_whitespace) {
        JobParams::new()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::Validation(format!("params must be a JSON object of primitives: {}", e)))?
    };

    let dispatcher = state
        .dispatcher
        .as_ref()
        .ok_or_else(|| AppError::Unavailable("no worker runs in this process".into()))?;

    info!("🔧 Manual trigger: {} (params: {})", job_type, params.len());
    let descriptor_id = dispatcher.submit(JobDescriptor::manual(job_type, params))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            descriptor_id,
            job_type,
            status: "queued",
        }),
    ))
}

/// GET /api/v1/jobs/:job_type/history - Get history for a specific job
async fn job_history(
    Path(job_type): Path<String>,
    Query(params): Query<LimitParams>,
    State(state): State<AppState>,
) -> Result<Json<Vec<JobRun>>, AppError> {
    let job_type = parse_job_type(&job_type)?;
    let limit = params.limit.unwrap_or(100).min(500);
    Ok(Json(state.runs.history(job_type, limit).await?))
}

/// GET /api/v1/jobs/:job_type/stats - Get statistics for a specific job
async fn job_stats(
    Path(job_type): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<JobStats>, AppError> {
    let job_type = parse_job_type(&job_type)?;
    Ok(Json(state.runs.stats(job_type).await?))
}
