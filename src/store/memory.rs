//! In-memory reference implementation of the job store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::model::{AnalysisResult, Job, JobError, JobId, JobStatus};

use super::{JobStore, StoreError};

/// DashMap-backed store enforcing the error-interval invariant and CAS
/// semantics; used single-node and as the fixture in tests
#[derive(Default)]
pub struct MemoryStore {
    jobs: DashMap<JobId, Job>,
    errors: DashMap<JobId, Vec<JobError>>,
    analyses: DashMap<JobId, AnalysisResult>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn list_due_candidates(&self, _as_of: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .jobs
            .iter()
            .filter(|entry| entry.value().schedulable())
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.get(&id).map(|entry| entry.value().clone()))
    }

    async fn put_job(&self, mut job: Job) -> Result<Job, StoreError> {
        let id = *job.id.get_or_insert_with(JobId::new);
        self.jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn compare_and_set_status(
        &self,
        id: JobId,
        expected_version: u64,
        status: JobStatus,
        last_run: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut entry = match self.jobs.get_mut(&id) {
            Some(entry) => entry,
            None => return Err(StoreError::NotFound(id)),
        };

        let job = entry.value_mut();
        if job.version != expected_version {
            return Ok(false);
        }

        job.last_status = Some(status);
        job.last_run = Some(last_run);
        job.version += 1;
        Ok(true)
    }

    async fn append_or_extend_error(
        &self,
        job_id: JobId,
        status: JobStatus,
        message: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut history = self.errors.entry(job_id).or_default();

        if let Some(open) = history.iter_mut().find(|e| e.is_open()) {
            if open.status == status {
                // Same sustained failure: extend, never duplicate
                open.last_seen = at;
                if message.is_some() {
                    open.message = message;
                }
                return Ok(());
            }
            // Failure changed shape: close the old interval first
            open.closed = Some(at);
        }

        history.push(JobError::open(job_id, status, message, at));
        Ok(())
    }

    async fn close_open_error(&self, job_id: JobId, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(mut history) = self.errors.get_mut(&job_id) {
            if let Some(open) = history.iter_mut().find(|e| e.is_open()) {
                open.closed = Some(at);
            }
        }
        Ok(())
    }

    async fn open_error(&self, job_id: JobId) -> Result<Option<JobError>, StoreError> {
        Ok(self
            .errors
            .get(&job_id)
            .and_then(|history| history.iter().find(|e| e.is_open()).cloned()))
    }

    async fn error_history(&self, job_id: JobId) -> Result<Vec<JobError>, StoreError> {
        Ok(self
            .errors
            .get(&job_id)
            .map(|history| history.value().clone())
            .unwrap_or_default())
    }

    async fn record_analysis(
        &self,
        job_id: JobId,
        result: AnalysisResult,
    ) -> Result<(), StoreError> {
        self.analyses.insert(job_id, result);
        Ok(())
    }

    async fn analysis(&self, job_id: JobId) -> Result<Option<AnalysisResult>, StoreError> {
        Ok(self.analyses.get(&job_id).map(|entry| entry.value().clone()))
    }
}
