//! Cluster-wide claim coordination
//!
//! The claim is the single correctness-critical primitive of the whole
//! pipeline: every other component assumes at-most-one execution per
//! (job, scheduled time) is already guaranteed here. Leases bound how long
//! a crashed claimant can block a retry; a grace window bounds how long a
//! missed scheduled time stays retryable at all.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::model::JobId;

/// Reservation key for one run
///
/// The key is the scheduled fire time, never wall-clock "now", so a node
/// re-deriving a tick after a pause cannot fire the same time twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClaimKey {
    pub job_id: JobId,
    pub scheduled_time: DateTime<Utc>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ClaimError {
    #[error("Claim authority unreachable: {0}")]
    Unreachable(String),
}

/// Cluster-wide mutual exclusion on (job, scheduled time)
#[async_trait]
pub trait ClaimCoordinator: Send + Sync {
    /// Returns true to exactly one caller across the cluster for a given
    /// key within its validity window
    async fn claim(&self, key: ClaimKey, lease: Duration) -> Result<bool, ClaimError>;

    /// Mark the run for `key` finished, allowing the job's next scheduled
    /// time to be claimed
    async fn release(&self, key: ClaimKey) -> Result<(), ClaimError>;
}

struct Lease {
    expires: Instant,
    /// Set on release; a completed key stays consumed until the grace
    /// window passes so it can never be re-granted
    completed: bool,
}

#[derive(Default)]
struct JobClaims {
    /// Key currently held by an executor, if any
    inflight: Option<ClaimKey>,
    leases: HashMap<DateTime<Utc>, Lease>,
}

/// In-process lease table; the claim authority's backing implementation
/// and the whole coordinator in single-node mode
pub struct MemoryClaims {
    /// Per-job claim state; the entry lock serializes claims per job
    jobs: DashMap<JobId, JobClaims>,
    grace: Duration,
}

impl MemoryClaims {
    pub fn new(grace: Duration) -> Self {
        Self {
            jobs: DashMap::new(),
            grace,
        }
    }

    fn too_old(&self, scheduled_time: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(scheduled_time);
        age > chrono::Duration::from_std(self.grace).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

impl Default for MemoryClaims {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl ClaimCoordinator for MemoryClaims {
    async fn claim(&self, key: ClaimKey, lease: Duration) -> Result<bool, ClaimError> {
        if self.too_old(key.scheduled_time, Utc::now()) {
            // Missed cycle: not retried indefinitely
            return Ok(false);
        }

        let now = Instant::now();
        let mut state = self.jobs.entry(key.job_id).or_default();

        state.leases.retain(|_, l| l.expires > now);
        if let Some(held) = state.inflight {
            if !state.leases.contains_key(&held.scheduled_time) {
                // Claimant crashed and its lease expired
                state.inflight = None;
            } else if held != key {
                // Prior run still in flight: runs for one job stay totally
                // ordered by scheduled time
                return Ok(false);
            }
        }

        if let Some(existing) = state.leases.get(&key.scheduled_time) {
            tracing::trace!(
                job_id = %key.job_id,
                scheduled = %key.scheduled_time,
                completed = existing.completed,
                "Claim refused, key already consumed"
            );
            return Ok(false);
        }

        state.leases.insert(
            key.scheduled_time,
            Lease {
                expires: now + lease,
                completed: false,
            },
        );
        state.inflight = Some(key);
        Ok(true)
    }

    async fn release(&self, key: ClaimKey) -> Result<(), ClaimError> {
        if let Some(mut state) = self.jobs.get_mut(&key.job_id) {
            if state.inflight == Some(key) {
                state.inflight = None;
            }
            if let Some(lease) = state.leases.get_mut(&key.scheduled_time) {
                lease.completed = true;
                lease.expires = Instant::now() + self.grace;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn key_at(job_id: JobId, offset_secs: i64) -> ClaimKey {
        ClaimKey {
            job_id,
            scheduled_time: Utc::now() + chrono::Duration::seconds(offset_secs),
        }
    }

    #[tokio::test]
    async fn test_second_claim_loses() {
        let claims = MemoryClaims::default();
        let key = key_at(JobId::new(), 0);
        let lease = Duration::from_secs(60);

        assert!(claims.claim(key, lease).await.unwrap());
        assert!(!claims.claim(key, lease).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let claims = Arc::new(MemoryClaims::default());
        let key = key_at(JobId::new(), 0);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let claims = Arc::clone(&claims);
                tokio::spawn(async move { claims.claim(key, Duration::from_secs(60)).await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_reclaimed() {
        let claims = MemoryClaims::default();
        let key = key_at(JobId::new(), 0);

        assert!(claims.claim(key, Duration::from_millis(5)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(claims.claim(key, Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_released_key_stays_consumed() {
        let claims = MemoryClaims::default();
        let key = key_at(JobId::new(), 0);
        let lease = Duration::from_secs(60);

        assert!(claims.claim(key, lease).await.unwrap());
        claims.release(key).await.unwrap();

        // The run completed; re-deriving the same scheduled time must not
        // fire it again
        assert!(!claims.claim(key, lease).await.unwrap());
    }

    #[tokio::test]
    async fn test_inflight_run_blocks_next_scheduled_time() {
        let claims = MemoryClaims::default();
        let job_id = JobId::new();
        let first = key_at(job_id, -60);
        let second = key_at(job_id, 0);
        let lease = Duration::from_secs(60);

        assert!(claims.claim(first, lease).await.unwrap());
        assert!(!claims.claim(second, lease).await.unwrap());

        claims.release(first).await.unwrap();
        assert!(claims.claim(second, lease).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_scheduled_time_refused() {
        let claims = MemoryClaims::new(Duration::from_secs(300));
        let key = key_at(JobId::new(), -600);

        assert!(!claims.claim(key, Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_independent_jobs_do_not_interfere() {
        let claims = MemoryClaims::default();
        let lease = Duration::from_secs(60);

        assert!(claims.claim(key_at(JobId::new(), 0), lease).await.unwrap());
        assert!(claims.claim(key_at(JobId::new(), 0), lease).await.unwrap());
    }
}
