//! Job queue, per-type exclusivity and the worker tasks that drain the queue.
//!
//! The scheduler and the management API only ever talk to a `JobDispatcher`.
//! Submitting takes the job type's lease first, so a job type is "in flight"
//! from the moment it is queued until its worker finalizes the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{env_parse, ConfigError, EnvLookup};
use crate::models::{JobDescriptor, JobTrigger, JobType};
use crate::services::job_executor::JobExecutor;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    /// Hard wall-clock limit for a single job.
    pub job_timeout: Duration,
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            job_timeout: Duration::from_secs(1800),
            queue_capacity: 64,
        }
    }
}

impl WorkerConfig {
    pub fn from_lookup(lookup: EnvLookup) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            concurrency: env_parse(lookup, "WORKER_CONCURRENCY", defaults.concurrency)?,
            job_timeout: Duration::from_secs(env_parse(lookup, "JOB_TIMEOUT_SECS", defaults.job_timeout.as_secs())?),
            queue_capacity: env_parse(lookup, "JOB_QUEUE_CAPACITY", defaults.queue_capacity)?.max(1),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InFlightSlot {
    pub descriptor_id: Uuid,
    pub trigger: JobTrigger,
    pub since: DateTime<Utc>,
}

/// Which job types currently hold a lease.
#[derive(Clone, Default)]
pub struct InFlightRegistry {
    slots: Arc<DashMap<JobType, InFlightSlot>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lease for the descriptor's job type, or `None` when another
    /// descriptor of that type holds it.
    pub fn try_acquire(&self, descriptor: &JobDescriptor) -> Option<JobLease> {
        match self.slots.entry(descriptor.job_type()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(InFlightSlot {
                    descriptor_id: descriptor.id(),
                    trigger: descriptor.trigger(),
                    since: Utc::now(),
                });
                Some(JobLease {
                    registry: self.slots.clone(),
                    job_type: descriptor.job_type(),
                    descriptor_id: descriptor.id(),
                })
            }
        }
    }

    pub fn is_in_flight(&self, job_type: JobType) -> bool {
        self.slots.contains_key(&job_type)
    }

    pub fn get(&self, job_type: JobType) -> Option<InFlightSlot> {
        self.slots.get(&job_type).map(|slot| slot.clone())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Exclusive claim on a job type. Released on drop.
#[derive(Debug)]
pub struct JobLease {
    registry: Arc<DashMap<JobType, InFlightSlot>>,
    job_type: JobType,
    descriptor_id: Uuid,
}

impl JobLease {
    pub fn job_type(&self) -> JobType {
        self.job_type
    }
}

impl Drop for JobLease {
    fn drop(&mut self) {
        let id = self.descriptor_id;
        self.registry.remove_if(&self.job_type, |_, slot| slot.descriptor_id == id);
    }
}

/// A descriptor on the queue, together with the lease it was admitted under.
#[derive(Debug)]
pub struct QueuedJob {
    pub descriptor: JobDescriptor,
    pub lease: JobLease,
}

#[derive(Debug, Error, PartialEq)]
pub enum DispatchError {
    #[error("a {0} job is already queued or running")]
    AlreadyRunning(JobType),

    #[error("job queue is full")]
    QueueFull,

    #[error("job queue is closed")]
    Closed,
}

/// Sending half of the job queue.
#[derive(Clone)]
pub struct JobDispatcher {
    sender: mpsc::Sender<QueuedJob>,
    in_flight: InFlightRegistry,
    closed: Arc<AtomicBool>,
}

impl JobDispatcher {
    /// A dispatcher with no workers behind it; the caller drains the queue.
    pub fn detached(capacity: usize, in_flight: InFlightRegistry) -> (Self, mpsc::Receiver<QueuedJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let dispatcher = Self {
            sender,
            in_flight,
            closed: Arc::new(AtomicBool::new(false)),
        };
        (dispatcher, receiver)
    }

    /// Enqueues without waiting. On any error the lease is released and
    /// nothing is queued.
    pub fn submit(&self, descriptor: JobDescriptor) -> Result<Uuid, DispatchError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::Closed);
        }

        let job_type = descriptor.job_type();
        let id = descriptor.id();
        let lease = self
            .in_flight
            .try_acquire(&descriptor)
            .ok_or(DispatchError::AlreadyRunning(job_type))?;

        match self.sender.try_send(QueuedJob { descriptor, lease }) {
            Ok(()) => {
                info!("📥 Enqueued {} job {}", job_type, id);
                Ok(id)
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(DispatchError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DispatchError::Closed),
        }
    }

    pub fn in_flight(&self) -> &InFlightRegistry {
        &self.in_flight
    }

    /// Rejects further submissions. Jobs already queued still run.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// The worker tasks.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    dispatcher: JobDispatcher,
}

impl WorkerPool {
    /// Spawns `config.concurrency` workers sharing one queue.
    pub fn start(config: &WorkerConfig, executor: Arc<JobExecutor>) -> Self {
        let (dispatcher, receiver) = JobDispatcher::detached(config.queue_capacity, InFlightRegistry::new());
        let receiver = Arc::new(Mutex::new(receiver));
        let (shutdown, _) = watch::channel(false);

        let workers = (0..config.concurrency.max(1))
            .map(|worker_id| {
                let receiver = receiver.clone();
                let executor = executor.clone();
                let shutdown = shutdown.subscribe();
                tokio::spawn(worker_loop(worker_id, receiver, executor, shutdown))
            })
            .collect();

        info!(
            "👷 Started {} workers (queue capacity {}, job timeout {:?})",
            config.concurrency.max(1),
            config.queue_capacity.max(1),
            config.job_timeout
        );

        Self {
            workers,
            shutdown,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> JobDispatcher {
        self.dispatcher.clone()
    }

    /// Closes the queue, lets the workers finish what is queued, and waits
    /// for them to exit.
    pub async fn shutdown(self) {
        info!("🛑 Stopping workers...");
        self.dispatcher.close();
        let _ = self.shutdown.send(true);

        for handle in self.workers {
            if let Err(e) = handle.await {
                error!("Worker task ended abnormally: {}", e);
            }
        }
        info!("✅ Workers stopped");
    }
}

async fn next_job(
    receiver: &Mutex<mpsc::Receiver<QueuedJob>>,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<QueuedJob> {
    let mut receiver = receiver.lock().await;
    if !*shutdown.borrow() {
        tokio::select! {
            job = receiver.recv() => return job,
            _ = shutdown.changed() => {}
        }
    }
    // Once closed, a send either landed before this point and is drained
    // here, or fails and drops its lease.
    receiver.close();
    receiver.recv().await
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
    executor: Arc<JobExecutor>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let Some(job) = next_job(&receiver, &mut shutdown).await else {
            break;
        };

        // Each job runs on its own task so a panic that escapes the executor
        // cannot take the worker down with it.
        let executor = executor.clone();
        let job_type = job.descriptor.job_type();
        if let Err(e) = tokio::spawn(async move { executor.execute(job).await }).await {
            warn!("Worker {} lost a {} job: {}", worker_id, job_type, e);
        }
    }
    info!("Worker {} exiting", worker_id);
}
