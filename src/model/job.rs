//! Job definitions and run-status bookkeeping

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique job identifier, assigned when the job is first persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Outcome of a completed job run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Expression evaluated cleanly and the verdict passed
    Success,
    /// Expression evaluated cleanly and the verdict failed
    Failed,
    /// Expression raised a runtime fault or exceeded its deadline
    Error,
    /// Metrics backend was unreachable
    BackendError,
    /// Backend reachable but a requested metric had no data or is unknown
    BackendMetricError,
    /// Expression attempted a disallowed capability
    SecurityError,
}

impl JobStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Success)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Error => "error",
            JobStatus::BackendError => "backend_error",
            JobStatus::BackendMetricError => "backend_metric_error",
            JobStatus::SecurityError => "security_error",
        };
        f.write_str(s)
    }
}

/// Notification destination for a job's alerts
///
/// Variants differ only in how a notification is delivered, never in
/// scheduling behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertDestination {
    Email { label: String, to: String },
    Pager { label: String, service_key: String },
    Incident { label: String, api_key: String },
}

impl AlertDestination {
    pub fn label(&self) -> &str {
        match self {
            AlertDestination::Email { label, .. }
            | AlertDestination::Pager { label, .. }
            | AlertDestination::Incident { label, .. } => label,
        }
    }

    /// Channel name used in logs
    pub fn channel(&self) -> &'static str {
        match self {
            AlertDestination::Email { .. } => "email",
            AlertDestination::Pager { .. } => "pager",
            AlertDestination::Incident { .. } => "incident",
        }
    }
}

/// A scheduled health check definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// None until the job has been persisted; an unpersisted job is never scheduled
    pub id: Option<JobId>,
    /// Owning user or application
    pub owner: String,
    /// Display name
    pub name: String,
    /// Cron expression (standard 5-field)
    pub cron: String,
    /// Metric selectors, in evaluation order
    pub selectors: Vec<String>,
    /// Optional evaluation expression; absent means a pure data-presence check
    pub expression: Option<String>,
    /// Lookback window for the metric fetch, in minutes
    pub lookback_minutes: u32,
    /// Fixed window end overriding the scheduled time, if set
    pub end_time: Option<DateTime<Utc>>,
    pub active: bool,
    /// Last known run outcome; absent until the first run completes
    pub last_status: Option<JobStatus>,
    pub last_run: Option<DateTime<Utc>>,
    pub destinations: Vec<AlertDestination>,
    /// Alert suppression / evaluation deadline window, in minutes
    pub error_timeout_minutes: u32,
    /// Soft-delete marker; a deleted job is never selected as due
    pub deleted_at: Option<DateTime<Utc>>,
    /// Compare-and-swap token for status updates
    pub version: u64,
}

impl Job {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        cron: impl Into<String>,
        selector: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            owner: owner.into(),
            name: name.into(),
            cron: cron.into(),
            selectors: vec![selector.into()],
            expression: None,
            lookback_minutes: 60,
            end_time: None,
            active: true,
            last_status: None,
            last_run: None,
            destinations: Vec::new(),
            error_timeout_minutes: 60,
            deleted_at: None,
            version: 0,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selectors.push(selector.into());
        self
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    pub fn with_destination(mut self, destination: AlertDestination) -> Self {
        self.destinations.push(destination);
        self
    }

    pub fn with_lookback(mut self, minutes: u32) -> Self {
        self.lookback_minutes = minutes;
        self
    }

    pub fn with_error_timeout(mut self, minutes: u32) -> Self {
        self.error_timeout_minutes = minutes;
        self
    }

    pub fn with_end_time(mut self, end: DateTime<Utc>) -> Self {
        self.end_time = Some(end);
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Whether this job may be considered by the scheduler at all
    pub fn schedulable(&self) -> bool {
        self.id.is_some() && self.active && self.deleted_at.is_none()
    }

    pub fn error_timeout(&self) -> Duration {
        Duration::minutes(i64::from(self.error_timeout_minutes))
    }

    /// Fetch window for a run scheduled at `as_of`
    ///
    /// The window ends at the job's fixed end time when one is set,
    /// otherwise at the scheduled time, and reaches back `lookback_minutes`.
    pub fn window(&self, as_of: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let end = self.end_time.unwrap_or(as_of);
        let start = end - Duration::minutes(i64::from(self.lookback_minutes));
        (start, end)
    }
}

/// Open/close interval recording a sustained failing status
///
/// A job has at most one open record (no `closed` timestamp) at any time.
/// A failing run whose status matches the open record extends `last_seen`
/// instead of opening a duplicate; a successful run closes the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub job_id: JobId,
    /// When the failing interval opened
    pub created: DateTime<Utc>,
    /// The status that opened the interval
    pub status: JobStatus,
    pub message: Option<String>,
    /// Most recent run that observed this same failing status
    pub last_seen: DateTime<Utc>,
    /// Set when a run with a different outcome closes the interval
    pub closed: Option<DateTime<Utc>>,
}

impl JobError {
    pub fn open(job_id: JobId, status: JobStatus, message: Option<String>, at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            created: at,
            status,
            message,
            last_seen: at,
            closed: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.closed.is_none()
    }

    /// Duration the failure has been sustained so far
    pub fn sustained(&self) -> Duration {
        self.closed.unwrap_or(self.last_seen) - self.created
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_builder() {
        let job = Job::new("ops", "API latency", "* * * * *", "service.latency")
            .with_expression("max(latency) < 100")
            .with_lookback(15)
            .with_error_timeout(30)
            .with_destination(AlertDestination::Email {
                label: "oncall".to_string(),
                to: "oncall@example.com".to_string(),
            });

        assert_eq!(job.selectors, vec!["service.latency"]);
        assert_eq!(job.lookback_minutes, 15);
        assert_eq!(job.error_timeout_minutes, 30);
        assert_eq!(job.destinations.len(), 1);
        assert!(job.active);
        assert!(job.last_status.is_none());
    }

    #[test]
    fn test_unpersisted_job_not_schedulable() {
        let job = Job::new("ops", "check", "* * * * *", "m");
        assert!(!job.schedulable());

        let mut job = job;
        job.id = Some(JobId::new());
        assert!(job.schedulable());

        job.deleted_at = Some(Utc::now());
        assert!(!job.schedulable());
    }

    #[test]
    fn test_window_uses_fixed_end_time() {
        let end = Utc::now();
        let job = Job::new("ops", "check", "* * * * *", "m")
            .with_lookback(10)
            .with_end_time(end);

        let (start, actual_end) = job.window(end + Duration::hours(5));
        assert_eq!(actual_end, end);
        assert_eq!(start, end - Duration::minutes(10));
    }

    #[test]
    fn test_status_serde_discriminator() {
        let json = serde_json::to_string(&JobStatus::BackendMetricError).unwrap();
        assert_eq!(json, "\"backend_metric_error\"");

        let status: JobStatus = serde_json::from_str("\"security_error\"").unwrap();
        assert_eq!(status, JobStatus::SecurityError);
    }

    #[test]
    fn test_destination_tagged_serde() {
        let dest = AlertDestination::Pager {
            label: "primary".to_string(),
            service_key: "abc123".to_string(),
        };
        let json = serde_json::to_value(&dest).unwrap();
        assert_eq!(json["type"], "pager");

        let back: AlertDestination = serde_json::from_value(json).unwrap();
        assert_eq!(back, dest);
    }

    #[test]
    fn test_error_extend_and_close() {
        let id = JobId::new();
        let t0 = Utc::now();
        let mut err = JobError::open(id, JobStatus::Failed, Some("too slow".into()), t0);
        assert!(err.is_open());

        err.last_seen = t0 + Duration::minutes(3);
        assert_eq!(err.sustained(), Duration::minutes(3));

        err.closed = Some(t0 + Duration::minutes(5));
        assert!(!err.is_open());
        assert_eq!(err.sustained(), Duration::minutes(5));
    }
}
