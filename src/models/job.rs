use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kinds of background work the service knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    FieldPoll,
    ActivityPoll,
    CropPoll,
    DailySummary,
    CacheCleanup,
}

impl JobType {
    pub const ALL: [JobType; 5] = [
        JobType::FieldPoll,
        JobType::ActivityPoll,
        JobType::CropPoll,
        JobType::DailySummary,
        JobType::CacheCleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::FieldPoll => "field_poll",
            JobType::ActivityPoll => "activity_poll",
            JobType::CropPoll => "crop_poll",
            JobType::DailySummary => "daily_summary",
            JobType::CacheCleanup => "cache_cleanup",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    // Resource names such as `fields` are accepted as aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "field_poll" | "fields" => Ok(JobType::FieldPoll),
            "activity_poll" | "activities" => Ok(JobType::ActivityPoll),
            "crop_poll" | "crops" => Ok(JobType::CropPoll),
            "daily_summary" | "daily_report" => Ok(JobType::DailySummary),
            "cache_cleanup" => Ok(JobType::CacheCleanup),
            other => Err(format!("Unknown job type: {}", other)),
        }
    }
}

/// Whether a descriptor came from a cadence tick or from the management API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobTrigger {
    Scheduled,
    Manual,
}

impl JobTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobTrigger::Scheduled => "scheduled",
            JobTrigger::Manual => "manual",
        }
    }
}

impl FromStr for JobTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(JobTrigger::Scheduled),
            "manual" => Ok(JobTrigger::Manual),
            other => Err(format!("Unknown job trigger: {}", other)),
        }
    }
}

/// A primitive job parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            ParamValue::Str(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(x) => write!(f, "{}", x),
            ParamValue::Str(s) => f.write_str(s),
        }
    }
}

/// Ordered so that cache fingerprints built from params are deterministic.
pub type JobParams = BTreeMap<String, ParamValue>;

/// A unit of scheduled or manually triggered work.
///
/// Fields are private: once a descriptor is built it is only read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    id: Uuid,
    job_type: JobType,
    trigger: JobTrigger,
    scheduled_at: DateTime<Utc>,
    params: JobParams,
}

impl JobDescriptor {
    pub fn scheduled(job_type: JobType, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type,
            trigger: JobTrigger::Scheduled,
            scheduled_at,
            params: JobParams::new(),
        }
    }

    pub fn manual(job_type: JobType, params: JobParams) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type,
            trigger: JobTrigger::Manual,
            scheduled_at: Utc::now(),
            params,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn trigger(&self) -> JobTrigger {
        self.trigger
    }

    pub fn scheduled_at(&self) -> DateTime<Utc> {
        self.scheduled_at
    }

    pub fn params(&self) -> &JobParams {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Success,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            "skipped" => Ok(JobStatus::Skipped),
            other => Err(format!("Unknown job status: {}", other)),
        }
    }
}

/// Outcome of the report delivery step, tracked apart from the run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Failed,
    NotAttempted,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::NotAttempted => "not_attempted",
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delivered" => Ok(DeliveryStatus::Delivered),
            "failed" => Ok(DeliveryStatus::Failed),
            "not_attempted" => Ok(DeliveryStatus::NotAttempted),
            other => Err(format!("Unknown delivery status: {}", other)),
        }
    }
}

/// Audit record of one execution of a job type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub id: Uuid,
    pub job_type: JobType,
    pub trigger: JobTrigger,
    pub descriptor_id: Option<Uuid>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub error_kind: Option<String>,
    /// Upstream fetch attempts made by the run, retries included.
    pub attempts: i32,
    pub items_processed: i32,
    pub items_failed: i32,
    pub delivery_status: Option<DeliveryStatus>,
    pub duration_ms: Option<i64>,
}

impl JobRun {
    /// A fresh `running` record for a descriptor a worker just picked up.
    pub fn started(descriptor: &JobDescriptor, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type: descriptor.job_type(),
            trigger: descriptor.trigger(),
            descriptor_id: Some(descriptor.id()),
            scheduled_at: descriptor.scheduled_at(),
            started_at,
            finished_at: None,
            status: JobStatus::Running,
            error_message: None,
            error_kind: None,
            attempts: 0,
            items_processed: 0,
            items_failed: 0,
            delivery_status: None,
            duration_ms: None,
        }
    }

    /// A zero-length record for a tick that did not enqueue anything.
    pub fn skipped(job_type: JobType, scheduled_at: DateTime<Utc>, reason: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_type,
            trigger: JobTrigger::Scheduled,
            descriptor_id: None,
            scheduled_at,
            started_at: now,
            finished_at: Some(now),
            status: JobStatus::Skipped,
            error_message: Some(reason.to_string()),
            error_kind: None,
            attempts: 0,
            items_processed: 0,
            items_failed: 0,
            delivery_status: None,
            duration_ms: Some(0),
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Applies a completion to a record that is still running.
    pub fn finalize(&mut self, completion: &JobCompletion) {
        self.finished_at = Some(completion.finished_at);
        self.status = completion.status;
        self.error_message = completion.error_message.clone();
        self.error_kind = completion.error_kind.clone();
        self.attempts = completion.attempts;
        self.items_processed = completion.items_processed;
        self.items_failed = completion.items_failed;
        self.delivery_status = completion.delivery_status;
        self.duration_ms = Some((completion.finished_at - self.started_at).num_milliseconds());
    }
}

/// Everything needed to finalize a running JobRun.
#[derive(Debug, Clone, PartialEq)]
pub struct JobCompletion {
    pub finished_at: DateTime<Utc>,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub error_kind: Option<String>,
    pub attempts: i32,
    pub items_processed: i32,
    pub items_failed: i32,
    pub delivery_status: Option<DeliveryStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStats {
    pub job_type: JobType,
    pub total_runs: i64,
    pub successful_runs: i64,
    pub failed_runs: i64,
    pub skipped_runs: i64,
    pub avg_duration_ms: Option<f64>,
    pub avg_items_processed: Option<f64>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_status: Option<JobStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_accepts_legacy_names() {
        assert_eq!("fields".parse::<JobType>().unwrap(), JobType::FieldPoll);
        assert_eq!("daily_report".parse::<JobType>().unwrap(), JobType::DailySummary);
        assert_eq!("Activity_Poll".parse::<JobType>().unwrap(), JobType::ActivityPoll);
        assert!("weather".parse::<JobType>().is_err());
    }

    #[test]
    fn test_job_type_names_round_trip() {
        for job_type in JobType::ALL {
            assert_eq!(job_type.as_str().parse::<JobType>().unwrap(), job_type);
        }
    }

    #[test]
    fn test_params_deserialize_primitives() {
        let params: JobParams = serde_json::from_value(serde_json::json!({
            "farm_id": "farm-1",
            "limit": 10,
            "ratio": 0.5,
            "refresh": true
        }))
        .unwrap();

        assert_eq!(params["farm_id"], ParamValue::Str("farm-1".into()));
        assert_eq!(params["limit"], ParamValue::Int(10));
        assert_eq!(params["ratio"], ParamValue::Float(0.5));
        assert_eq!(params["refresh"].as_bool(), Some(true));
    }

    #[test]
    fn test_finalize_sets_duration_and_status() {
        let descriptor = JobDescriptor::scheduled(JobType::FieldPoll, Utc::now());
        let mut run = JobRun::started(&descriptor, Utc::now());
        assert!(!run.is_finalized());

        let completion = JobCompletion {
            finished_at: run.started_at + chrono::Duration::milliseconds(250),
            status: JobStatus::Success,
            error_message: None,
            error_kind: None,
            attempts: 1,
            items_processed: 12,
            items_failed: 0,
            delivery_status: None,
        };
        run.finalize(&completion);

        assert!(run.is_finalized());
        assert_eq!(run.status, JobStatus::Success);
        assert_eq!(run.duration_ms, Some(250));
        assert_eq!(run.items_processed, 12);
    }

    #[test]
    fn test_skipped_run_is_already_finalized() {
        let run = JobRun::skipped(JobType::DailySummary, Utc::now(), "already running");
        assert_eq!(run.status, JobStatus::Skipped);
        assert!(run.is_finalized());
        assert_eq!(run.started_at, run.finished_at.unwrap());
    }
}
