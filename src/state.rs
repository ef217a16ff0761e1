use std::sync::Arc;

use crate::services::cache_service::CacheLayer;
use crate::services::job_health::JobHealthTracker;
use crate::services::job_scheduler_service::{Cadence, SchedulerState};
use crate::services::worker_pool::JobDispatcher;
use crate::store::{JobRunStore, ReportStore};

/// Shared handler state. The dispatcher and scheduler are absent when this
/// process does not run the worker or scheduler component.
#[derive(Clone)]
pub struct AppState {
    pub cache: CacheLayer,
    pub runs: Arc<dyn JobRunStore>,
    pub reports: Arc<dyn ReportStore>,
    pub dispatcher: Option<JobDispatcher>,
    pub scheduler: Option<Arc<SchedulerState>>,
    pub health: JobHealthTracker,
    pub cadences: Vec<Cadence>,
}
