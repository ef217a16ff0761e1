use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{env_optional, env_parse, ConfigError, EnvLookup};
use crate::models::{JobDescriptor, JobRun, JobType};
use crate::services::job_health::JobHealthTracker;
use crate::services::worker_pool::{DispatchError, JobDispatcher};
use crate::store::JobRunStore;

/// When a job type fires. Schedules are six-field cron expressions
/// (`sec min hour day month weekday`) evaluated in UTC.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cadence {
    pub job_type: JobType,
    pub schedule: String,
    pub description: String,
    pub enabled: bool,
}

impl Cadence {
    fn new(job_type: JobType, schedule: &str, description: &str) -> Self {
        Self {
            job_type,
            schedule: schedule.to_string(),
            description: description.to_string(),
            enabled: true,
        }
    }
}

fn default_cadences(test_mode: bool) -> Vec<Cadence> {
    if test_mode {
        vec![
            Cadence::new(JobType::FieldPoll, "0 */1 * * * *", "Every minute (TEST MODE)"),
            Cadence::new(JobType::ActivityPoll, "30 */1 * * * *", "Every minute at :30 (TEST MODE)"),
            Cadence::new(JobType::CropPoll, "0 */2 * * * *", "Every 2 minutes (TEST MODE)"),
            Cadence::new(JobType::DailySummary, "0 */5 * * * *", "Every 5 minutes (TEST MODE)"),
            Cadence::new(JobType::CacheCleanup, "0 */3 * * * *", "Every 3 minutes (TEST MODE)"),
        ]
    } else {
        vec![
            Cadence::new(JobType::FieldPoll, "0 0 * * * *", "Every hour at :00"),
            Cadence::new(JobType::ActivityPoll, "0 */30 * * * *", "Every 30 minutes"),
            Cadence::new(JobType::CropPoll, "0 0 */2 * * *", "Every 2 hours"),
            Cadence::new(JobType::DailySummary, "0 0 8 * * *", "Daily at 8:00 AM UTC"),
            Cadence::new(JobType::CacheCleanup, "0 0 2 * * *", "Daily at 2:00 AM UTC"),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub cadences: Vec<Cadence>,
    pub test_mode: bool,
    /// Start firing cadences at boot.
    pub autostart: bool,
}

impl SchedulerConfig {
    /// Reads `SCHEDULE_<JOB_TYPE>` cron overrides and `SCHEDULE_<JOB_TYPE>_ENABLED`
    /// switches on top of the defaults.
    pub fn from_lookup(lookup: EnvLookup) -> Result<Self, ConfigError> {
        let test_mode = env_parse(lookup, "JOB_SCHEDULER_TEST_MODE", false)?;
        let autostart = env_parse(lookup, "SCHEDULER_AUTOSTART", true)?;

        let mut cadences = default_cadences(test_mode);
        for cadence in &mut cadences {
            let prefix = format!("SCHEDULE_{}", cadence.job_type.as_str().to_uppercase());
            if let Some(schedule) = env_optional(lookup, &prefix) {
                validate_cron(&prefix, &schedule)?;
                cadence.description = format!("Custom schedule [{}]", schedule);
                cadence.schedule = schedule;
            }
            cadence.enabled = env_parse(lookup, &format!("{}_ENABLED", prefix), true)?;
        }

        Ok(Self {
            cadences,
            test_mode,
            autostart,
        })
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cadences: default_cadences(false),
            test_mode: false,
            autostart: true,
        }
    }
}

fn validate_cron(key: &str, schedule: &str) -> Result<(), ConfigError> {
    let fields = schedule.split_whitespace().count();
    if fields != 6 {
        return Err(ConfigError::Invalid {
            key: key.to_string(),
            message: format!("expected 6 cron fields (sec min hour day month weekday), got {}", fields),
        });
    }
    Schedule::from_str(schedule).map_err(|e| ConfigError::Invalid {
        key: key.to_string(),
        message: format!("invalid cron expression '{}': {}", schedule, e),
    })?;
    Ok(())
}

/// How far back a late callback still finds the tick it belongs to.
const TICK_LOOKBACK_SECS: i64 = 300;

/// The cron tick a callback running at `now` was fired for: the latest
/// scheduled time at or before `now`, or `now` itself when the callback is
/// too late to tell.
pub fn scheduled_tick(schedule: &Schedule, now: DateTime<Utc>) -> DateTime<Utc> {
    schedule
        .after(&(now - chrono::Duration::seconds(TICK_LOOKBACK_SECS)))
        .take_while(|tick| *tick <= now)
        .last()
        .unwrap_or(now)
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler error: {0}")]
    Cron(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Enqueued(Uuid),
    Skipped(String),
}

/// What a cadence does when it fires: enqueue a descriptor, or record a
/// `skipped` run when the job type is still in flight.
#[derive(Clone)]
pub struct TickHandler {
    dispatcher: JobDispatcher,
    runs: Arc<dyn JobRunStore>,
    health: JobHealthTracker,
}

impl TickHandler {
    pub fn new(dispatcher: JobDispatcher, runs: Arc<dyn JobRunStore>, health: JobHealthTracker) -> Self {
        Self {
            dispatcher,
            runs,
            health,
        }
    }

    pub async fn fire(&self, job_type: JobType, at: DateTime<Utc>) -> TickOutcome {
        match self.dispatcher.submit(JobDescriptor::scheduled(job_type, at)) {
            Ok(id) => TickOutcome::Enqueued(id),
            Err(e) => {
                let reason = match e {
                    DispatchError::AlreadyRunning(_) => "previous run still in flight",
                    DispatchError::QueueFull => "job queue is full",
                    DispatchError::Closed => "job queue is closed",
                };
                warn!("⏭️  Skipping {} tick: {}", job_type, reason);

                let run = JobRun::skipped(job_type, at, reason);
                if let Err(e) = self.runs.append(&run).await {
                    error!("Failed to record skipped {} run: {}", job_type, e);
                }
                self.health.record(&run);
                TickOutcome::Skipped(reason.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    /// Keyed by job type; `null` for disabled cadences or a stopped scheduler.
    pub next_fire_times: BTreeMap<String, Option<DateTime<Utc>>>,
    pub cadences: Vec<Cadence>,
}

struct RunningScheduler {
    scheduler: JobScheduler,
    started_at: DateTime<Utc>,
    jobs: Vec<(JobType, Uuid)>,
}

/// Owns the cron runtime. Stopping it only stops new ticks; runs already
/// queued or executing carry on in the workers.
pub struct SchedulerState {
    config: SchedulerConfig,
    ticks: TickHandler,
    inner: Mutex<Option<RunningScheduler>>,
}

impl SchedulerState {
    pub fn new(config: SchedulerConfig, ticks: TickHandler) -> Self {
        Self {
            config,
            ticks,
            inner: Mutex::new(None),
        }
    }

    pub fn cadences(&self) -> &[Cadence] {
        &self.config.cadences
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    /// Starts firing the enabled cadences. A no-op when already running.
    pub async fn start(&self) -> Result<SchedulerStatus, SchedulerError> {
        let mut inner = self.inner.lock().await;
        if inner.is_some() {
            info!("Job scheduler already running");
            return Ok(self.status_of(&inner).await);
        }

        info!("🚀 Starting job scheduler...");
        if self.config.test_mode {
            info!("⚠️  JOB SCHEDULER IN TEST MODE - Jobs will run every few minutes!");
        }

        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::Cron(format!("Failed to create scheduler: {}", e)))?;

        let mut jobs = Vec::new();
        for cadence in self.config.cadences.iter().filter(|c| c.enabled) {
            let ticks = self.ticks.clone();
            let job_type = cadence.job_type;
            let schedule = Schedule::from_str(&cadence.schedule)
                .map_err(|e| SchedulerError::Cron(format!("Invalid schedule for {}: {}", job_type, e)))?;

            let job = Job::new_async(cadence.schedule.as_str(), move |_uuid, _l| {
                let ticks = ticks.clone();
                let at = scheduled_tick(&schedule, Utc::now());
                Box::pin(async move {
                    ticks.fire(job_type, at).await;
                })
            })
            .map_err(|e| SchedulerError::Cron(format!("Failed to create job {}: {}", job_type, e)))?;

            let id = scheduler
                .add(job)
                .await
                .map_err(|e| SchedulerError::Cron(format!("Failed to add job {}: {}", job_type, e)))?;

            info!("📅 Scheduled: {} - {} [cron: {}]", job_type, cadence.description, cadence.schedule);
            jobs.push((job_type, id));
        }

        scheduler
            .start()
            .await
            .map_err(|e| SchedulerError::Cron(format!("Failed to start scheduler: {}", e)))?;

        info!("✅ Job scheduler started successfully with {} jobs", jobs.len());
        *inner = Some(RunningScheduler {
            scheduler,
            started_at: Utc::now(),
            jobs,
        });
        Ok(self.status_of(&inner).await)
    }

    /// Stops issuing ticks. A no-op when already stopped.
    pub async fn stop(&self) -> Result<SchedulerStatus, SchedulerError> {
        let mut inner = self.inner.lock().await;
        match inner.take() {
            None => info!("Job scheduler already stopped"),
            Some(mut running) => {
                info!("🛑 Stopping job scheduler...");
                running
                    .scheduler
                    .shutdown()
                    .await
                    .map_err(|e| SchedulerError::Cron(format!("Failed to stop scheduler: {}", e)))?;
                info!("✅ Job scheduler stopped");
            }
        }
        Ok(self.status_of(&inner).await)
    }

    pub async fn status(&self) -> SchedulerStatus {
        let inner = self.inner.lock().await;
        self.status_of(&inner).await
    }

    async fn status_of(&self, inner: &Option<RunningScheduler>) -> SchedulerStatus {
        let mut next_fire_times: BTreeMap<String, Option<DateTime<Utc>>> = self
            .config
            .cadences
            .iter()
            .map(|c| (c.job_type.as_str().to_string(), None))
            .collect();

        if let Some(running) = inner {
            let mut scheduler = running.scheduler.clone();
            for (job_type, id) in &running.jobs {
                let next = match scheduler.next_tick_for_job(*id).await {
                    Ok(next) => next,
                    Err(e) => {
                        warn!("Could not read next tick for {}: {}", job_type, e);
                        None
                    }
                };
                next_fire_times.insert(job_type.as_str().to_string(), next);
            }
        }

        SchedulerStatus {
            running: inner.is_some(),
            started_at: inner.as_ref().map(|r| r.started_at),
            next_fire_times,
            cadences: self.config.cadences.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobParams, JobStatus};
    use crate::services::worker_pool::InFlightRegistry;
    use crate::store::MemoryStore;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<SchedulerConfig, ConfigError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        SchedulerConfig::from_lookup(&|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_cadences() {
        let config = config_from(&[]).unwrap();
        let schedule = |job_type| {
            config
                .cadences
                .iter()
                .find(|c| c.job_type == job_type)
                .map(|c| c.schedule.clone())
                .unwrap()
        };
        assert_eq!(schedule(JobType::FieldPoll), "0 0 * * * *");
        assert_eq!(schedule(JobType::ActivityPoll), "0 */30 * * * *");
        assert_eq!(schedule(JobType::DailySummary), "0 0 8 * * *");
        assert_eq!(schedule(JobType::CacheCleanup), "0 0 2 * * *");
        assert!(config.autostart);
    }

    #[test]
    fn test_overrides_and_switches() {
        let config = config_from(&[
            ("SCHEDULE_DAILY_SUMMARY", "0 30 6 * * *"),
            ("SCHEDULE_CROP_POLL_ENABLED", "false"),
            ("SCHEDULER_AUTOSTART", "false"),
        ])
        .unwrap();

        let daily = config.cadences.iter().find(|c| c.job_type == JobType::DailySummary).unwrap();
        assert_eq!(daily.schedule, "0 30 6 * * *");
        let crops = config.cadences.iter().find(|c| c.job_type == JobType::CropPoll).unwrap();
        assert!(!crops.enabled);
        assert!(!config.autostart);
    }

    #[test]
    fn test_five_field_cron_is_rejected() {
        let err = config_from(&[("SCHEDULE_FIELD_POLL", "0 * * * *")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "SCHEDULE_FIELD_POLL"));
    }

    #[test]
    fn test_out_of_range_cron_is_rejected() {
        let err = config_from(&[("SCHEDULE_CROP_POLL", "0 61 * * * *")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "SCHEDULE_CROP_POLL"));
    }

    #[test]
    fn test_scheduled_tick_is_the_cadence_boundary() {
        let at = |s: &str| DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc);
        let half_hourly = Schedule::from_str("0 */30 * * * *").unwrap();
        let daily = Schedule::from_str("0 0 8 * * *").unwrap();

        assert_eq!(
            scheduled_tick(&half_hourly, at("2025-03-01T10:30:00.250Z")),
            at("2025-03-01T10:30:00Z")
        );
        assert_eq!(scheduled_tick(&half_hourly, at("2025-03-01T10:30:00Z")), at("2025-03-01T10:30:00Z"));
        assert_eq!(scheduled_tick(&daily, at("2025-03-01T08:00:02Z")), at("2025-03-01T08:00:00Z"));

        // Nothing scheduled in the lookback window.
        assert_eq!(scheduled_tick(&daily, at("2025-03-01T09:15:00Z")), at("2025-03-01T09:15:00Z"));
    }

    #[test]
    fn test_test_mode_uses_minute_cadences() {
        let config = config_from(&[("JOB_SCHEDULER_TEST_MODE", "true")]).unwrap();
        assert!(config.test_mode);
        assert!(config.cadences.iter().all(|c| c.schedule.contains("*/")));
    }

    fn tick_handler(capacity: usize) -> (TickHandler, Arc<MemoryStore>, tokio::sync::mpsc::Receiver<crate::services::worker_pool::QueuedJob>) {
        let store = Arc::new(MemoryStore::new());
        let (dispatcher, receiver) = JobDispatcher::detached(capacity, InFlightRegistry::new());
        (TickHandler::new(dispatcher, store.clone(), JobHealthTracker::new()), store, receiver)
    }

    #[tokio::test]
    async fn test_tick_while_in_flight_records_skip() {
        let (ticks, store, mut receiver) = tick_handler(4);

        assert!(matches!(ticks.fire(JobType::FieldPoll, Utc::now()).await, TickOutcome::Enqueued(_)));
        let outcome = ticks.fire(JobType::FieldPoll, Utc::now()).await;
        assert_eq!(outcome, TickOutcome::Skipped("previous run still in flight".into()));

        let runs = store.all_runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, JobStatus::Skipped);
        assert!(runs[0].is_finalized());

        // Finishing the first run frees the job type for the next tick.
        drop(receiver.recv().await);
        assert!(matches!(ticks.fire(JobType::FieldPoll, Utc::now()).await, TickOutcome::Enqueued(_)));
    }

    #[tokio::test]
    async fn test_manual_trigger_blocks_scheduled_tick() {
        let (ticks, store, _receiver) = tick_handler(4);
        ticks
            .dispatcher
            .submit(JobDescriptor::manual(JobType::DailySummary, JobParams::new()))
            .unwrap();

        let outcome = ticks.fire(JobType::DailySummary, Utc::now()).await;
        assert!(matches!(outcome, TickOutcome::Skipped(_)));
        assert_eq!(store.all_runs().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_stop_lifecycle() {
        let (ticks, _store, _receiver) = tick_handler(4);
        let state = SchedulerState::new(SchedulerConfig::default(), ticks);

        let status = state.status().await;
        assert!(!status.running);
        assert!(status.next_fire_times.values().all(Option::is_none));

        let status = state.start().await.unwrap();
        assert!(status.running);
        assert!(status.next_fire_times["field_poll"].is_some());
        assert!(status.next_fire_times["field_poll"].unwrap() > Utc::now());

        // Starting twice is a no-op.
        let again = state.start().await.unwrap();
        assert_eq!(again.started_at, status.started_at);

        assert!(!state.stop().await.unwrap().running);
        assert!(!state.stop().await.unwrap().running);

        assert!(state.start().await.unwrap().running);
        state.stop().await.unwrap();
    }
}
