use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use tracing::{info, warn};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health))
}

#[derive(Debug, Serialize)]
struct ComponentHealth {
    reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    cache_backend: &'static str,
    cache: ComponentHealth,
    store: ComponentHealth,
    /// `None` when this process does not run the scheduler.
    scheduler_running: Option<bool>,
    worker: bool,
}

/// GET /health - Cache, store and scheduler health
///
/// Answers 503 with the same body when the cache or the store is unreachable.
async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    info!("GET /health - Health check");

    let cache = match state.cache.ping().await {
        Ok(()) => ComponentHealth {
            reachable: true,
            error: None,
        },
        Err(e) => {
            warn!("Health check: cache unreachable: {}", e);
            ComponentHealth {
                reachable: false,
                error: Some(e.to_string()),
            }
        }
    };

    let store = match state.runs.ping().await {
        Ok(()) => ComponentHealth {
            reachable: true,
            error: None,
        },
        Err(e) => {
            warn!("Health check: store unreachable: {}", e);
            ComponentHealth {
                reachable: false,
                error: Some(e.to_string()),
            }
        }
    };

    let scheduler_running = match &state.scheduler {
        Some(scheduler) => Some(scheduler.is_running().await),
        None => None,
    };

    let healthy = cache.reachable && store.reachable;
    let response = HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        cache_backend: state.cache.backend_name(),
        cache,
        store,
        scheduler_running,
        worker: state.dispatcher.is_some(),
    };

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}
