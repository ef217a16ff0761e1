use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::routes::{health, jobs, polling, reports, scheduler};
use crate::state::AppState;

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::<AppState>::new()
        .nest("/health", health::router())
        .nest("/api/v1/scheduler", scheduler::router())
        .nest("/api/v1/jobs", jobs::router())
        .nest("/api/v1/polling", polling::router())
        .nest("/api/v1/reports", reports::router())
        .layer(cors)
        .with_state(state)
}
