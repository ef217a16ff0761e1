#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agworld_reporter::external::data_source::{DataSource, DataSourceError, ResourceType};
use agworld_reporter::models::{JobParams, JobRun};
use agworld_reporter::services::cache_service::{CacheLayer, CacheTtls};
use agworld_reporter::services::job_executor::{JobContext, JobExecutor};
use agworld_reporter::services::job_health::JobHealthTracker;
use agworld_reporter::services::notification_service::{Notifier, NotifyError, ReportEmail};
use agworld_reporter::services::report_service::{
    HtmlReportRenderer, RenderError, RenderedDocument, ReportContent, ReportRenderer,
};
use agworld_reporter::services::retry::RetryPolicy;
use agworld_reporter::store::{CacheBackend, CacheEntry, CacheError, MemoryStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

/// Scripted upstream: queued failures are returned first, then the
/// resource's payload.
pub struct FakeSource {
    payloads: HashMap<ResourceType, Value>,
    failures: Mutex<VecDeque<DataSourceError>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        let mut payloads = HashMap::new();
        payloads.insert(
            ResourceType::Fields,
            json!([
                {"id": "f1", "name": "North Paddock", "area": 12.5, "farm_id": "farm-1", "seed_cost": 100.0},
                {"id": "f2", "name": "River Flat", "area": 7.5, "farm_id": "farm-1"}
            ]),
        );
        payloads.insert(
            ResourceType::Activities,
            json!([{"id": "a1", "title": "Spray", "activity_type": "spraying", "completed": true, "total_cost": 40.0}]),
        );
        payloads.insert(
            ResourceType::Crops,
            json!([{"id": "c1", "crop_type": "Wheat", "variety": "Scepter", "field_id": "f1"}]),
        );
        Self {
            payloads,
            failures: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        let mut source = Self::new();
        for payload in source.payloads.values_mut() {
            *payload = json!([]);
        }
        source
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_with(self, failures: Vec<DataSourceError>) -> Self {
        *self.failures.lock() = failures.into();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for FakeSource {
    async fn fetch(&self, resource: ResourceType, _params: &JobParams) -> Result<Value, DataSourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        Ok(self.payloads.get(&resource).cloned().unwrap_or_else(|| json!([])))
    }
}

pub struct FailingRenderer;

impl ReportRenderer for FailingRenderer {
    fn render(&self, _content: &ReportContent) -> Result<RenderedDocument, RenderError> {
        Err(RenderError::Failed("layout engine crashed".into()))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub fail: bool,
    sent: Mutex<Vec<(String, Vec<String>)>>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, Vec<String>)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, email: &ReportEmail, recipients: &[String]) -> Result<(), NotifyError> {
        self.sent.lock().push((email.subject.clone(), recipients.to_vec()));
        if self.fail {
            return Err(NotifyError::Transport("550 mailbox unavailable".into()));
        }
        Ok(())
    }
}

/// A cache backend whose every call fails.
pub struct DownCache;

#[async_trait]
impl CacheBackend for DownCache {
    fn name(&self) -> &'static str {
        "down"
    }
    async fn get(&self, _key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
    async fn set(&self, _entry: CacheEntry) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
    async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
    async fn ping(&self) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
}

pub fn report_dir() -> PathBuf {
    std::env::temp_dir().join(format!("agworld-reporter-test-{}", Uuid::new_v4()))
}

/// Everything a test needs to inspect after running jobs.
pub struct Harness {
    pub source: Arc<FakeSource>,
    pub notifier: Arc<RecordingNotifier>,
    pub store: Arc<MemoryStore>,
    pub cache: CacheLayer,
    pub health: JobHealthTracker,
    pub context: JobContext,
}

pub struct HarnessBuilder {
    source: FakeSource,
    renderer: Arc<dyn ReportRenderer>,
    notifier: RecordingNotifier,
    cache: CacheLayer,
    recipients: Vec<String>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            source: FakeSource::new(),
            renderer: Arc::new(HtmlReportRenderer),
            notifier: RecordingNotifier::default(),
            cache: CacheLayer::in_memory(),
            recipients: vec!["agronomist@example.com".to_string()],
        }
    }

    pub fn source(mut self, source: FakeSource) -> Self {
        self.source = source;
        self
    }

    pub fn renderer(mut self, renderer: impl ReportRenderer + 'static) -> Self {
        self.renderer = Arc::new(renderer);
        self
    }

    pub fn notifier(mut self, notifier: RecordingNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn cache(mut self, cache: CacheLayer) -> Self {
        self.cache = cache;
        self
    }

    pub fn recipients(mut self, recipients: &[&str]) -> Self {
        self.recipients = recipients.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn build(self) -> Harness {
        let source = Arc::new(self.source);
        let notifier = Arc::new(self.notifier);
        let store = Arc::new(MemoryStore::new());

        let context = JobContext {
            data_source: source.clone(),
            cache: self.cache.clone(),
            runs: store.clone(),
            reports: store.clone(),
            renderer: self.renderer,
            notifier: notifier.clone(),
            retry: RetryPolicy::immediate(3),
            ttls: CacheTtls::default(),
            report_dir: report_dir(),
            recipients: self.recipients,
        };

        Harness {
            source,
            notifier,
            store,
            cache: self.cache,
            health: JobHealthTracker::new(),
            context,
        }
    }
}

impl Harness {
    pub fn executor(&self, job_timeout: Duration) -> Arc<JobExecutor> {
        Arc::new(JobExecutor::new(self.context.clone(), self.health.clone(), job_timeout))
    }

    /// Waits until `count` runs are finalized, or panics after five seconds.
    pub async fn wait_for_finished(&self, count: usize) -> Vec<JobRun> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let finished: Vec<JobRun> = self
                .store
                .all_runs()
                .into_iter()
                .filter(|r| r.is_finalized())
                .collect();
            if finished.len() >= count {
                return finished;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {} finished runs, have {}",
                count,
                finished.len()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
