use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::services::job_scheduler_service::SchedulerError;
use crate::services::worker_pool::DispatchError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("External error: {0}")]
    External(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::External(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Store(e) => {
                error!("Store error while handling request: {}", e);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<DispatchError> for AppError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::AlreadyRunning(_) => AppError::Conflict(value.to_string()),
            DispatchError::QueueFull | DispatchError::Closed => AppError::Unavailable(value.to_string()),
        }
    }
}

impl From<SchedulerError> for AppError {
    fn from(value: SchedulerError) -> Self {
        AppError::Unavailable(value.to_string())
    }
}
