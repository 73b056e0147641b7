//! Client for the claim authority's cluster endpoints

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::JobId;

use super::claim::{ClaimCoordinator, ClaimError, ClaimKey};

/// Claim request sent to the authority
#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub job_id: JobId,
    pub scheduled_time: DateTime<Utc>,
    pub lease_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub granted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub job_id: JobId,
    pub scheduled_time: DateTime<Utc>,
}

/// Coordinator used by nodes that are not the claim authority: every
/// claim/release is a call to the authority's lease table. A node that
/// cannot reach the authority fails its claims and skips — jobs may be
/// delayed during a partition, never run twice.
#[derive(Debug, Clone)]
pub struct HttpClaims {
    http_client: reqwest::Client,
    authority_addr: String,
}

impl HttpClaims {
    pub fn new(authority_addr: impl Into<String>) -> Self {
        Self::with_timeout(authority_addr, Duration::from_secs(10))
    }

    pub fn with_timeout(authority_addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to create HTTP client"),
            authority_addr: authority_addr.into(),
        }
    }
}

#[async_trait]
impl ClaimCoordinator for HttpClaims {
    async fn claim(&self, key: ClaimKey, lease: Duration) -> Result<bool, ClaimError> {
        let url = format!("http://{}/cluster/claim", self.authority_addr);
        let request = ClaimRequest {
            job_id: key.job_id,
            scheduled_time: key.scheduled_time,
            lease_secs: lease.as_secs(),
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClaimError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ClaimError::Unreachable(format!(
                "authority returned status {}",
                response.status()
            )));
        }

        let body: ClaimResponse = response
            .json()
            .await
            .map_err(|e| ClaimError::Unreachable(e.to_string()))?;

        Ok(body.granted)
    }

    async fn release(&self, key: ClaimKey) -> Result<(), ClaimError> {
        let url = format!("http://{}/cluster/release", self.authority_addr);
        let request = ReleaseRequest {
            job_id: key.job_id,
            scheduled_time: key.scheduled_time,
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClaimError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ClaimError::Unreachable(format!(
                "authority returned status {}",
                response.status()
            )));
        }

        Ok(())
    }
}
