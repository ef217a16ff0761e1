use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tracing::info;

use crate::errors::AppError;
use crate::services::job_scheduler_service::{SchedulerState, SchedulerStatus};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/start", post(start))
        .route("/stop", post(stop))
}

fn scheduler(state: &AppState) -> Result<Arc<SchedulerState>, AppError> {
    state
        .scheduler
        .clone()
        .ok_or_else(|| AppError::Unavailable("the scheduler component is not running in this process".into()))
}

/// GET /api/v1/scheduler/status - Running flag and next fire time per job type
async fn status(State(state): State<AppState>) -> Result<Json<SchedulerStatus>, AppError> {
    Ok(Json(scheduler(&state)?.status().await))
}

/// POST /api/v1/scheduler/start - Start firing cadences (no-op when running)
async fn start(State(state): State<AppState>) -> Result<Json<SchedulerStatus>, AppError> {
    info!("POST /api/v1/scheduler/start");
    Ok(Json(scheduler(&state)?.start().await?))
}

/// POST /api/v1/scheduler/stop - Stop issuing ticks; running jobs finish
async fn stop(State(state): State<AppState>) -> Result<Json<SchedulerStatus>, AppError> {
    info!("POST /api/v1/scheduler/stop");
    Ok(Json(scheduler(&state)?.stop().await?))
}
