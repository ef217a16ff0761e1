//! Which components run in this process and how they are started.
//!
//! Startup order is logging, config, persistent store, cache readiness,
//! workers, scheduler, then the HTTP listener. Shutdown runs the other way:
//! the scheduler stops ticking, the listener drains, and the workers finish
//! whatever is already queued.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::app::create_app;
use crate::config::AppConfig;
use crate::db::PgStore;
use crate::external::agworld::AgworldClient;
use crate::external::data_source::DataSource;
use crate::services::cache_service::CacheLayer;
use crate::services::job_executor::{JobContext, JobExecutor};
use crate::services::job_health::JobHealthTracker;
use crate::services::job_scheduler_service::{SchedulerError, SchedulerState, TickHandler};
use crate::services::notification_service::{build_notifier, Notifier};
use crate::services::report_service::{HtmlReportRenderer, ReportRenderer};
use crate::services::worker_pool::WorkerPool;
use crate::state::AppState;
use crate::store::{CacheError, JobRunStore, MemoryStore, ReportStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceComponents {
    pub api: bool,
    pub worker: bool,
    pub scheduler: bool,
}

impl ServiceComponents {
    pub fn all() -> Self {
        Self {
            api: true,
            worker: true,
            scheduler: true,
        }
    }

    /// Worker and scheduler cannot run without the cache.
    pub fn needs_cache(&self) -> bool {
        self.worker || self.scheduler
    }
}

impl FromStr for ServiceComponents {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut components = Self {
            api: false,
            worker: false,
            scheduler: false,
        };
        for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            match name.to_lowercase().as_str() {
                "api" | "web" => components.api = true,
                "worker" => components.worker = true,
                "scheduler" => components.scheduler = true,
                "all" => components = Self::all(),
                other => return Err(format!("unknown component '{}' (expected api, worker, scheduler)", other)),
            }
        }
        if !(components.api || components.worker || components.scheduler) {
            return Err("no components selected".to_string());
        }
        Ok(components)
    }
}

impl fmt::Display for ServiceComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (self.api, "api"),
            (self.worker, "worker"),
            (self.scheduler, "scheduler"),
        ]
        .iter()
        .filter(|(on, _)| *on)
        .map(|(_, name)| *name)
        .collect();
        f.write_str(&names.join(","))
    }
}

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("cache not reachable after {attempts} attempts: {source}")]
    CacheUnreachable { attempts: u32, source: CacheError },

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Pings the cache until it answers or `attempts` pings have failed.
pub async fn wait_for_cache(cache: &CacheLayer, attempts: u32, delay: Duration) -> Result<(), TopologyError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match cache.ping().await {
            Ok(()) => {
                info!("✅ Cache backend '{}' is reachable", cache.backend_name());
                return Ok(());
            }
            Err(e) if attempt >= attempts => {
                return Err(TopologyError::CacheUnreachable { attempts, source: e });
            }
            Err(e) => {
                warn!("⏳ Waiting for cache ({}/{}): {}", attempt, attempts, e);
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// The collaborators a process is built from. Production wiring fills these
/// from config; tests hand in fakes.
#[derive(Clone)]
pub struct Dependencies {
    pub data_source: Arc<dyn DataSource>,
    pub cache: CacheLayer,
    pub runs: Arc<dyn JobRunStore>,
    pub reports: Arc<dyn ReportStore>,
    pub renderer: Arc<dyn ReportRenderer>,
    pub notifier: Arc<dyn Notifier>,
}

/// The running components of this process.
pub struct Services {
    pub state: AppState,
    workers: Option<WorkerPool>,
    scheduler: Option<Arc<SchedulerState>>,
}

impl Services {
    pub fn scheduler(&self) -> Option<Arc<SchedulerState>> {
        self.scheduler.clone()
    }

    /// Stops the scheduler, then lets the workers drain the queue.
    pub async fn shutdown(self) {
        if let Some(scheduler) = &self.scheduler {
            if let Err(e) = scheduler.stop().await {
                warn!("Scheduler did not stop cleanly: {}", e);
            }
        }
        if let Some(workers) = self.workers {
            workers.shutdown().await;
        }
    }
}

/// Starts workers and scheduler for the selected components.
pub async fn assemble(config: &AppConfig, deps: Dependencies) -> Result<Services, TopologyError> {
    let components = config.components;
    if components.scheduler && !components.worker {
        return Err(TopologyError::Invalid(
            "the scheduler component needs the worker component in the same process".into(),
        ));
    }

    if components.needs_cache() {
        wait_for_cache(&deps.cache, config.cache.readiness_attempts, config.cache.readiness_delay).await?;
    } else if let Err(e) = deps.cache.ping().await {
        warn!("⚠️  Cache not reachable ({}), API will report it as degraded", e);
    }

    let health = JobHealthTracker::new();

    let workers = if components.worker {
        let context = JobContext {
            data_source: deps.data_source.clone(),
            cache: deps.cache.clone(),
            runs: deps.runs.clone(),
            reports: deps.reports.clone(),
            renderer: deps.renderer.clone(),
            notifier: deps.notifier.clone(),
            retry: config.retry.clone(),
            ttls: config.cache.ttls.clone(),
            report_dir: config.reports.output_dir.clone(),
            recipients: config.reports.recipients.clone(),
        };
        let executor = Arc::new(JobExecutor::new(context, health.clone(), config.worker.job_timeout));
        Some(WorkerPool::start(&config.worker, executor))
    } else {
        None
    };
    let dispatcher = workers.as_ref().map(WorkerPool::dispatcher);

    let scheduler = match (&dispatcher, components.scheduler) {
        (Some(dispatcher), true) => {
            let ticks = TickHandler::new(dispatcher.clone(), deps.runs.clone(), health.clone());
            let scheduler = Arc::new(SchedulerState::new(config.scheduler.clone(), ticks));
            if config.scheduler.autostart {
                scheduler.start().await?;
            } else {
                info!("⏸️  SCHEDULER_AUTOSTART=false, cadences wait for POST /api/v1/scheduler/start");
            }
            Some(scheduler)
        }
        _ => None,
    };

    let state = AppState {
        cache: deps.cache,
        runs: deps.runs,
        reports: deps.reports,
        dispatcher,
        scheduler: scheduler.clone(),
        health,
        cadences: config.scheduler.cadences.clone(),
    };

    Ok(Services {
        state,
        workers,
        scheduler,
    })
}

/// Production wiring: Postgres or memory store, Redis or memory cache, the
/// Agworld client, the HTML renderer and the configured notifier.
pub async fn build_dependencies(config: &AppConfig) -> anyhow::Result<Dependencies> {
    let (runs, reports): (Arc<dyn JobRunStore>, Arc<dyn ReportStore>) = match &config.database_url {
        Some(url) => {
            let store = Arc::new(PgStore::connect(url).await?);
            info!("🗃️  Using Postgres store");
            (store.clone(), store)
        }
        None => {
            if config.components == ServiceComponents::all() {
                warn!("⚠️  DATABASE_URL not set, job runs and report metadata are kept in memory");
            } else {
                warn!(
                    "⚠️  DATABASE_URL not set for a '{}' process: runs and reports stay in this process's memory \
                     and other processes will not see them",
                    config.components
                );
            }
            let store = Arc::new(MemoryStore::new());
            (store.clone(), store)
        }
    };

    Ok(Dependencies {
        data_source: Arc::new(AgworldClient::new(config.agworld.clone())?),
        cache: CacheLayer::from_config(&config.cache)?,
        runs,
        reports,
        renderer: Arc::new(HtmlReportRenderer),
        notifier: build_notifier(&config.email)?,
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("🛑 Shutdown signal received");
}

/// Runs the configured components until a shutdown signal arrives.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    info!("🚀 Starting agworld-reporter [components: {}]", config.components);

    let deps = build_dependencies(&config).await?;
    let services = assemble(&config, deps).await?;

    let scheduler = services.scheduler();
    let stop_ticks = async move {
        shutdown_signal().await;
        if let Some(scheduler) = scheduler {
            if let Err(e) = scheduler.stop().await {
                warn!("Scheduler did not stop cleanly: {}", e);
            }
        }
    };

    if config.components.api {
        let listener = TcpListener::bind(config.server.bind_addr).await?;
        info!("🌐 Listening on http://{}", config.server.bind_addr);
        axum::serve(listener, create_app(services.state.clone()))
            .with_graceful_shutdown(stop_ticks)
            .await?;
    } else {
        stop_ticks.await;
    }

    services.shutdown().await;
    info!("👋 Shutdown complete");
    Ok(())
}
