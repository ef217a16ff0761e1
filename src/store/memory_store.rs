use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{compute_stats, JobRunStore, ReportStore, StoreError};
use crate::models::{JobCompletion, JobRun, JobStats, JobType, ReportMetadata};

/// In-memory JobRun log and report index, used when `DATABASE_URL` is unset.
#[derive(Default)]
pub struct MemoryStore {
    runs: RwLock<Vec<JobRun>>,
    reports: RwLock<Vec<ReportMetadata>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every run in insertion order.
    pub fn all_runs(&self) -> Vec<JobRun> {
        self.runs.read().clone()
    }
}

fn newest_first(mut runs: Vec<JobRun>, limit: usize) -> Vec<JobRun> {
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    runs.truncate(limit);
    runs
}

#[async_trait]
impl JobRunStore for MemoryStore {
    async fn record_start(&self, run: &JobRun) -> Result<(), StoreError> {
        self.runs.write().push(run.clone());
        Ok(())
    }

    async fn record_finish(&self, id: Uuid, completion: &JobCompletion) -> Result<JobRun, StoreError> {
        let mut runs = self.runs.write();
        let run = runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;

        if run.is_finalized() {
            return Err(StoreError::AlreadyFinalized(id));
        }
        run.finalize(completion);
        Ok(run.clone())
    }

    async fn append(&self, run: &JobRun) -> Result<(), StoreError> {
        self.runs.write().push(run.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRun>, StoreError> {
        Ok(self.runs.read().iter().find(|r| r.id == id).cloned())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<JobRun>, StoreError> {
        Ok(newest_first(self.all_runs(), limit))
    }

    async fn history(&self, job_type: JobType, limit: usize) -> Result<Vec<JobRun>, StoreError> {
        let runs = self
            .runs
            .read()
            .iter()
            .filter(|r| r.job_type == job_type)
            .cloned()
            .collect();
        Ok(newest_first(runs, limit))
    }

    async fn stats(&self, job_type: JobType) -> Result<JobStats, StoreError> {
        let runs = self.runs.read();
        let of_type: Vec<&JobRun> = runs.iter().filter(|r| r.job_type == job_type).collect();
        Ok(compute_stats(job_type, &of_type))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn save_report(&self, report: &ReportMetadata) -> Result<(), StoreError> {
        self.reports.write().push(report.clone());
        Ok(())
    }

    async fn list_reports(&self, skip: usize, limit: usize) -> Result<Vec<ReportMetadata>, StoreError> {
        let mut reports = self.reports.read().clone();
        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reports.into_iter().skip(skip).take(limit).collect())
    }

    async fn get_report(&self, id: Uuid) -> Result<Option<ReportMetadata>, StoreError> {
        Ok(self.reports.read().iter().find(|r| r.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeliveryStatus, JobDescriptor, JobStatus};
    use chrono::{Duration, Utc};

    fn completion(status: JobStatus, items: i32) -> JobCompletion {
        JobCompletion {
            finished_at: Utc::now(),
            status,
            error_message: None,
            error_kind: None,
            attempts: 1,
            items_processed: items,
            items_failed: 0,
            delivery_status: None,
        }
    }

    #[tokio::test]
    async fn test_finalized_runs_are_immutable() {
        let store = MemoryStore::new();
        let run = JobRun::started(&JobDescriptor::scheduled(JobType::FieldPoll, Utc::now()), Utc::now());
        store.record_start(&run).await.unwrap();

        let finished = store.record_finish(run.id, &completion(JobStatus::Success, 5)).await.unwrap();
        assert_eq!(finished.status, JobStatus::Success);

        let err = store
            .record_finish(run.id, &completion(JobStatus::Failed, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyFinalized(id) if id == run.id));

        let stored = store.get(run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Success);
        assert_eq!(stored.items_processed, 5);
    }

    #[tokio::test]
    async fn test_finish_unknown_run() {
        let store = MemoryStore::new();
        let err = store
            .record_finish(Uuid::new_v4(), &completion(JobStatus::Success, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stats_and_history() {
        let store = MemoryStore::new();
        for (status, items) in [(JobStatus::Success, 10), (JobStatus::Failed, 0), (JobStatus::Success, 20)] {
            let run = JobRun::started(&JobDescriptor::scheduled(JobType::FieldPoll, Utc::now()), Utc::now());
            store.record_start(&run).await.unwrap();
            store.record_finish(run.id, &completion(status, items)).await.unwrap();
        }
        store
            .append(&JobRun::skipped(JobType::FieldPoll, Utc::now(), "already running"))
            .await
            .unwrap();
        store
            .append(&JobRun::skipped(JobType::CacheCleanup, Utc::now(), "already running"))
            .await
            .unwrap();

        let stats = store.stats(JobType::FieldPoll).await.unwrap();
        assert_eq!(stats.total_runs, 4);
        assert_eq!(stats.successful_runs, 2);
        assert_eq!(stats.failed_runs, 1);
        assert_eq!(stats.skipped_runs, 1);
        assert_eq!(stats.avg_items_processed, Some(10.0));
        assert_eq!(stats.last_status, Some(JobStatus::Skipped));

        assert_eq!(store.history(JobType::FieldPoll, 2).await.unwrap().len(), 2);
        assert_eq!(store.recent(10).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_reports_are_paginated_newest_first() {
        let store = MemoryStore::new();
        let base = Utc::now();
        for i in 0..5 {
            store
                .save_report(&ReportMetadata {
                    id: Uuid::new_v4(),
                    job_run_id: None,
                    title: format!("Report {}", i),
                    report_type: "daily_summary".into(),
                    file_path: format!("reports/{}.html", i),
                    content_type: "text/html".into(),
                    size_bytes: 100,
                    record_count: i,
                    created_at: base + Duration::minutes(i as i64),
                    delivery_status: DeliveryStatus::NotAttempted,
                    recipients: vec![],
                })
                .await
                .unwrap();
        }

        let page = store.list_reports(1, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].title, "Report 3");
        assert_eq!(page[1].title, "Report 2");
    }
}
