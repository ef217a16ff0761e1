use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::errors::AppError;
use crate::models::JobType;
use crate::services::job_health::JobHealth;
use crate::services::worker_pool::InFlightSlot;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/status", get(polling_status))
}

#[derive(Debug, Serialize)]
struct JobTypeStatus {
    job_type: JobType,
    enabled: bool,
    #[serde(flatten)]
    health: JobHealth,
    in_flight: Option<InFlightSlot>,
}

#[derive(Debug, Serialize)]
struct PollingStatus {
    scheduler_running: bool,
    cache_backend: &'static str,
    /// Cache reads that failed and fell back to an upstream fetch.
    cache_degraded_reads: u64,
    jobs: Vec<JobTypeStatus>,
}

/// GET /api/v1/polling/status - Per job type health since boot
async fn polling_status(State(state): State<AppState>) -> Result<Json<PollingStatus>, AppError> {
    let scheduler_running = match &state.scheduler {
        Some(scheduler) => scheduler.is_running().await,
        None => false,
    };

    let jobs = state
        .health
        .snapshot()
        .into_iter()
        .map(|entry| JobTypeStatus {
            job_type: entry.job_type,
            enabled: state
                .cadences
                .iter()
                .any(|c| c.job_type == entry.job_type && c.enabled),
            health: entry.health,
            in_flight: state
                .dispatcher
                .as_ref()
                .and_then(|d| d.in_flight().get(entry.job_type)),
        })
        .collect();

    Ok(Json(PollingStatus {
        scheduler_running,
        cache_backend: state.cache.backend_name(),
        cache_degraded_reads: state.cache.degraded_reads(),
        jobs,
    }))
}
