//! Alert decision logic: which status transitions notify, and when a
//! sustained failure is suppressed versus re-alerted

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use crate::model::{AnalysisResult, Job, JobId, JobStatus};

use super::notifier::Notifier;

/// Why a notification is being sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    /// Transition into a non-success status from a different status
    Failure,
    /// Still failing with the same status after the suppression window
    Realert,
    /// Sustained failure returned to success
    Recovery,
}

/// Decide whether a transition warrants a notification
///
/// Repeated identical failing statuses inside the suppression window stay
/// quiet; once the window elapses while still failing, one re-alert goes
/// out and the window restarts.
pub fn decide(
    previous: Option<JobStatus>,
    new: JobStatus,
    last_alerted: Option<DateTime<Utc>>,
    suppression: Duration,
    at: DateTime<Utc>,
) -> Option<AlertKind> {
    if new.is_success() {
        return match previous {
            Some(p) if !p.is_success() => Some(AlertKind::Recovery),
            _ => None,
        };
    }

    if previous != Some(new) {
        return Some(AlertKind::Failure);
    }

    match last_alerted {
        // Same sustained status but no alert on record: say something
        None => Some(AlertKind::Failure),
        Some(last) if at.signed_duration_since(last) >= suppression => Some(AlertKind::Realert),
        Some(_) => None,
    }
}

/// Maps status transitions to notifications across a job's destinations
pub struct AlertDispatcher {
    notifier: Notifier,
    /// Last notification time per (job, failing status)
    last_alerted: RwLock<HashMap<(JobId, JobStatus), DateTime<Utc>>>,
}

impl AlertDispatcher {
    pub fn new(notifier: Notifier) -> Self {
        Self {
            notifier,
            last_alerted: RwLock::new(HashMap::new()),
        }
    }

    /// Evaluate the transition and fan out to the job's destinations when
    /// it warrants a notification. Returns the decision for the caller's
    /// bookkeeping; delivery failures are logged, never propagated.
    pub async fn dispatch(
        &self,
        job: &Job,
        previous: Option<JobStatus>,
        new: JobStatus,
        result: &AnalysisResult,
        at: DateTime<Utc>,
    ) -> Option<AlertKind> {
        let job_id = job.id?;

        let last = self.last_alerted.read().get(&(job_id, new)).copied();
        let kind = decide(previous, new, last, job.error_timeout(), at)?;

        match kind {
            AlertKind::Failure | AlertKind::Realert => {
                self.last_alerted.write().insert((job_id, new), at);
            }
            AlertKind::Recovery => {
                // Failure run is over; drop its suppression state
                self.last_alerted.write().retain(|(id, _), _| *id != job_id);
            }
        }

        let delivered = self.notifier.notify_all(job, kind, new, result, at).await;
        tracing::info!(
            job_id = %job_id,
            job_name = %job.name,
            status = %new,
            kind = ?kind,
            delivered,
            destinations = job.destinations.len(),
            "Alert dispatched"
        );

        Some(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: i64 = 60; // suppression window in minutes for these tests

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(minutes * 60, 0).unwrap()
    }

    fn window() -> Duration {
        Duration::minutes(T)
    }

    #[test]
    fn test_first_failure_notifies() {
        assert_eq!(
            decide(None, JobStatus::Failed, None, window(), at(0)),
            Some(AlertKind::Failure)
        );
        assert_eq!(
            decide(Some(JobStatus::Success), JobStatus::Failed, None, window(), at(0)),
            Some(AlertKind::Failure)
        );
    }

    #[test]
    fn test_status_change_notifies_even_while_failing() {
        assert_eq!(
            decide(
                Some(JobStatus::Failed),
                JobStatus::BackendError,
                Some(at(0)),
                window(),
                at(1)
            ),
            Some(AlertKind::Failure)
        );
    }

    #[test]
    fn test_sustained_failure_suppressed_within_window() {
        assert_eq!(
            decide(
                Some(JobStatus::Failed),
                JobStatus::Failed,
                Some(at(0)),
                window(),
                at(T - 1)
            ),
            None
        );
    }

    #[test]
    fn test_realert_after_window_elapses() {
        assert_eq!(
            decide(
                Some(JobStatus::Failed),
                JobStatus::Failed,
                Some(at(0)),
                window(),
                at(T)
            ),
            Some(AlertKind::Realert)
        );
    }

    #[test]
    fn test_recovery_notifies_once() {
        assert_eq!(
            decide(Some(JobStatus::Failed), JobStatus::Success, None, window(), at(5)),
            Some(AlertKind::Recovery)
        );
        // Steady success stays quiet
        assert_eq!(
            decide(Some(JobStatus::Success), JobStatus::Success, None, window(), at(6)),
            None
        );
        // First-ever run succeeding is not a recovery
        assert_eq!(decide(None, JobStatus::Success, None, window(), at(0)), None);
    }

    #[tokio::test]
    async fn test_dispatch_suppression_sequence() {
        let dispatcher = AlertDispatcher::new(Notifier::new(Default::default()));
        let mut job = Job::new("ops", "check", "* * * * *", "m").with_error_timeout(T as u32);
        job.id = Some(JobId::new());

        let result = AnalysisResult::new(
            JobStatus::Failed,
            crate::model::MonitorOutput::new(JobStatus::Failed, "false", serde_json::json!({})),
            Default::default(),
        );

        // First failure alerts
        let kind = dispatcher
            .dispatch(&job, Some(JobStatus::Success), JobStatus::Failed, &result, at(0))
            .await;
        assert_eq!(kind, Some(AlertKind::Failure));

        // Same failing status inside the window is suppressed
        let kind = dispatcher
            .dispatch(&job, Some(JobStatus::Failed), JobStatus::Failed, &result, at(30))
            .await;
        assert_eq!(kind, None);

        // One more once the window elapses
        let kind = dispatcher
            .dispatch(&job, Some(JobStatus::Failed), JobStatus::Failed, &result, at(T))
            .await;
        assert_eq!(kind, Some(AlertKind::Realert));

        // Recovery clears the suppression state
        let kind = dispatcher
            .dispatch(&job, Some(JobStatus::Failed), JobStatus::Success, &result, at(T + 1))
            .await;
        assert_eq!(kind, Some(AlertKind::Recovery));

        // A fresh failure after recovery alerts immediately
        let kind = dispatcher
            .dispatch(&job, Some(JobStatus::Success), JobStatus::Failed, &result, at(T + 2))
            .await;
        assert_eq!(kind, Some(AlertKind::Failure));
    }

    #[tokio::test]
    async fn test_dispatch_ignores_unpersisted_jobs() {
        let dispatcher = AlertDispatcher::new(Notifier::new(Default::default()));
        let job = Job::new("ops", "check", "* * * * *", "m");

        let result = AnalysisResult::new(
            JobStatus::Failed,
            crate::model::MonitorOutput::new(JobStatus::Failed, "false", serde_json::json!({})),
            Default::default(),
        );

        let kind = dispatcher
            .dispatch(&job, None, JobStatus::Failed, &result, at(0))
            .await;
        assert_eq!(kind, None);
    }
}
