mod common;

use std::sync::Arc;

use agworld_reporter::app::create_app;
use agworld_reporter::models::{DeliveryStatus, ReportMetadata};
use agworld_reporter::services::cache_service::CacheLayer;
use agworld_reporter::services::job_health::JobHealthTracker;
use agworld_reporter::services::job_scheduler_service::{SchedulerConfig, SchedulerState, TickHandler};
use agworld_reporter::services::worker_pool::{InFlightRegistry, JobDispatcher, QueuedJob};
use agworld_reporter::store::{MemoryStore, ReportStore};
use agworld_reporter::AppState;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

struct TestApp {
    state: AppState,
    store: Arc<MemoryStore>,
    _queue: Option<mpsc::Receiver<QueuedJob>>,
}

impl TestApp {
    /// All components, with a queue nobody drains.
    fn full() -> Self {
        let store = Arc::new(MemoryStore::new());
        let health = JobHealthTracker::new();
        let (dispatcher, queue) = JobDispatcher::detached(8, InFlightRegistry::new());
        let ticks = TickHandler::new(dispatcher.clone(), store.clone(), health.clone());
        let config = SchedulerConfig::default();

        let state = AppState {
            cache: CacheLayer::in_memory(),
            runs: store.clone(),
            reports: store.clone(),
            dispatcher: Some(dispatcher),
            scheduler: Some(Arc::new(SchedulerState::new(config.clone(), ticks))),
            health,
            cadences: config.cadences,
        };
        Self {
            state,
            store,
            _queue: Some(queue),
        }
    }

    /// An `api`-only process.
    fn api_only() -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = AppState {
            cache: CacheLayer::in_memory(),
            runs: store.clone(),
            reports: store.clone(),
            dispatcher: None,
            scheduler: None,
            health: JobHealthTracker::new(),
            cadences: SchedulerConfig::default().cadences,
        };
        Self {
            state,
            store,
            _queue: None,
        }
    }

    fn router(&self) -> Router {
        create_app(self.state.clone())
    }
}

async fn send(app: Router, method: &str, uri: &str, body: Body) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn report(created_offset_secs: i64) -> ReportMetadata {
    ReportMetadata {
        id: Uuid::new_v4(),
        job_run_id: None,
        title: format!("Daily Agworld Summary {}", created_offset_secs),
        report_type: "daily_summary".into(),
        file_path: "reports/daily_summary.html".into(),
        content_type: "text/html".into(),
        size_bytes: 2048,
        record_count: 12,
        created_at: Utc::now() + chrono::Duration::seconds(created_offset_secs),
        delivery_status: DeliveryStatus::Delivered,
        recipients: vec!["agronomist@example.com".into()],
    }
}

#[tokio::test]
async fn test_health_reports_components() {
    let app = TestApp::full();
    let (status, body) = send(app.router(), "GET", "/health", Body::empty()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["cache"]["reachable"], true);
    assert_eq!(body["scheduler_running"], false);
    assert_eq!(body["worker"], true);
}

#[tokio::test]
async fn test_health_is_degraded_when_cache_is_down() {
    let mut app = TestApp::api_only();
    app.state.cache = CacheLayer::new(Arc::new(common::DownCache));

    let (status, body) = send(app.router(), "GET", "/health", Body::empty()).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["cache"]["reachable"], false);
    assert!(body["scheduler_running"].is_null());
}

#[tokio::test]
async fn test_trigger_accepts_then_conflicts() {
    let app = TestApp::full();

    let (status, body) = send(app.router(), "POST", "/api/v1/jobs/field_poll/trigger", Body::empty()).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["job_type"], "field_poll");
    assert_eq!(body["status"], "queued");
    assert!(body["descriptor_id"].as_str().unwrap().parse::<Uuid>().is_ok());

    let (status, body) = send(app.router(), "POST", "/api/v1/jobs/fields/trigger", Body::empty()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("field_poll"));

    assert!(app.store.all_runs().is_empty(), "a rejected trigger records nothing");
}

#[tokio::test]
async fn test_trigger_passes_params() {
    let app = TestApp::full();
    let body = Body::from(r#"{"farm_id": "farm-1", "refresh": true}"#);

    let (status, _) = send(app.router(), "POST", "/api/v1/jobs/activity_poll/trigger", body).await;

    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_trigger_rejects_bad_input() {
    let app = TestApp::full();

    let (status, _) = send(app.router(), "POST", "/api/v1/jobs/weather/trigger", Body::empty()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body = Body::from(r#"{"farm_id": {"nested": true}}"#);
    let (status, _) = send(app.router(), "POST", "/api/v1/jobs/field_poll/trigger", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_api_only_process_cannot_trigger() {
    let app = TestApp::api_only();

    let (status, _) = send(app.router(), "POST", "/api/v1/jobs/daily_summary/trigger", Body::empty()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, _) = send(app.router(), "GET", "/api/v1/scheduler/status", Body::empty()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_reports_listing_works_without_scheduler() {
    let app = TestApp::api_only();
    let older = report(-60);
    let newer = report(0);
    app.store.save_report(&older).await.unwrap();
    app.store.save_report(&newer).await.unwrap();

    let (status, body) = send(app.router(), "GET", "/api/v1/reports?limit=10", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let listed = body.as_array().unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0]["id"], newer.id.to_string());

    let (status, body) = send(app.router(), "GET", "/api/v1/reports?skip=1", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let uri = format!("/api/v1/reports/{}", older.id);
    let (status, body) = send(app.router(), "GET", &uri, Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["delivery_status"], "delivered");

    let uri = format!("/api/v1/reports/{}", Uuid::new_v4());
    let (status, _) = send(app.router(), "GET", &uri, Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_jobs_listing_and_polling_status() {
    let app = TestApp::full();
    send(app.router(), "POST", "/api/v1/jobs/crop_poll/trigger", Body::empty()).await;

    let (status, body) = send(app.router(), "GET", "/api/v1/jobs", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let jobs = body.as_array().unwrap();
    assert_eq!(jobs.len(), 5);
    let crop = jobs.iter().find(|j| j["job_type"] == "crop_poll").unwrap();
    assert_eq!(crop["schedule"], "0 0 */2 * * *");
    assert_eq!(crop["in_flight"]["trigger"], "manual");

    let (status, body) = send(app.router(), "GET", "/api/v1/polling/status", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jobs"].as_array().unwrap().len(), 5);
    assert_eq!(body["cache_backend"], "memory");
}

#[tokio::test]
async fn test_job_history_and_stats() {
    let app = TestApp::full();

    let (status, body) = send(app.router(), "GET", "/api/v1/jobs/field_poll/history", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    let (status, body) = send(app.router(), "GET", "/api/v1/jobs/field_poll/stats", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_runs"], 0);

    let (status, _) = send(app.router(), "GET", "/api/v1/jobs/nope/stats", Body::empty()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduler_start_and_stop_over_http() {
    let app = TestApp::full();

    let (status, body) = send(app.router(), "POST", "/api/v1/scheduler/start", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], true);
    assert!(body["next_fire_times"]["daily_summary"].is_string());

    let (_, body) = send(app.router(), "GET", "/api/v1/scheduler/status", Body::empty()).await;
    assert_eq!(body["running"], true);

    let (status, body) = send(app.router(), "POST", "/api/v1/scheduler/stop", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], false);
}
