//! Durable job record boundary
//!
//! The core reaches the job store through this narrow interface; the
//! executor is the only writer of status/last-run/error records, a
//! discipline the claim coordinator enforces cluster-wide. The store still
//! compare-and-swaps on update to defend against a coordinator bug
//! producing a double claim.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{AnalysisResult, Job, JobError, JobId, JobStatus};

pub use memory::MemoryStore;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Transactional job-record collaborator
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Jobs eligible for scheduling at `as_of`: persisted, active, and not
    /// soft-deleted. Cron due-ness is the scheduler's concern.
    async fn list_due_candidates(&self, as_of: DateTime<Utc>) -> Result<Vec<Job>, StoreError>;

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Persist a job definition, assigning an id on first write.
    /// This is the upstream API's write path; the core only reads it.
    async fn put_job(&self, job: Job) -> Result<Job, StoreError>;

    /// Record a run outcome iff the job's version still matches.
    /// Returns false when the version moved, which means another writer
    /// got there first and this result must be abandoned.
    async fn compare_and_set_status(
        &self,
        id: JobId,
        expected_version: u64,
        status: JobStatus,
        last_run: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Open an error interval, or extend the open one when the status
    /// matches. A differing failing status closes the open interval and
    /// opens a fresh one.
    async fn append_or_extend_error(
        &self,
        job_id: JobId,
        status: JobStatus,
        message: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Close the open error interval, if any
    async fn close_open_error(&self, job_id: JobId, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn open_error(&self, job_id: JobId) -> Result<Option<JobError>, StoreError>;

    async fn error_history(&self, job_id: JobId) -> Result<Vec<JobError>, StoreError>;

    async fn record_analysis(
        &self,
        job_id: JobId,
        result: AnalysisResult,
    ) -> Result<(), StoreError>;

    async fn analysis(&self, job_id: JobId) -> Result<Option<AnalysisResult>, StoreError>;
}
