//! Client side of the external time-series backend

pub mod client;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::TimeSeries;

pub use client::HttpMetricsBackend;

/// Fetch failure, split so the executor can distinguish an unreachable
/// backend from a reachable backend that cannot resolve a metric
#[derive(Debug, Clone, thiserror::Error)]
pub enum MetricsError {
    #[error("Backend unreachable: {0}")]
    Backend(String),

    #[error("Invalid backend response: {0}")]
    Decode(String),

    #[error("Unknown metric '{0}'")]
    UnknownMetric(String),

    #[error("No data for metric '{0}' in the requested window")]
    NoData(String),
}

impl MetricsError {
    /// True when the backend answered but the metric itself was the problem
    pub fn is_metric_error(&self) -> bool {
        matches!(self, MetricsError::UnknownMetric(_) | MetricsError::NoData(_))
    }
}

/// Boundary to the external metrics store
///
/// The fetch is complete-or-nothing: if any selector fails, the whole call
/// fails, so the expression always sees a consistent series set.
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    async fn fetch(
        &self,
        selectors: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TimeSeries, MetricsError>;
}
