use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{ReportListParams, ReportMetadata};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_reports))
        .route("/:id", get(get_report))
}

/// GET /api/v1/reports?skip&limit - Newest reports first
///
/// Reads only the store, so it works with the scheduler and workers stopped.
async fn list_reports(
    Query(params): Query<ReportListParams>,
    State(state): State<AppState>,
) -> Result<Json<Vec<ReportMetadata>>, AppError> {
    let skip = params.skip.unwrap_or(0);
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    Ok(Json(state.reports.list_reports(skip, limit).await?))
}

/// GET /api/v1/reports/:id
async fn get_report(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<ReportMetadata>, AppError> {
    state
        .reports
        .get_report(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("report {}", id)))
}
