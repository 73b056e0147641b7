//! HTTP implementation of the metrics backend boundary

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::model::{DataPoint, MetricSeries, TimeSeries};

use super::{MetricsBackend, MetricsError};

/// Fetches series over the backend's range-query endpoint, one request per
/// metric, issued in parallel
#[derive(Debug, Clone)]
pub struct HttpMetricsBackend {
    http_client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct RangeQueryRequest<'a> {
    metric: &'a str,
    /// Epoch seconds, inclusive
    start: i64,
    /// Epoch seconds, inclusive
    end: i64,
}

#[derive(Debug, Deserialize)]
struct RangeQueryResponse {
    points: Vec<WirePoint>,
}

#[derive(Debug, Deserialize)]
struct WirePoint {
    timestamp: i64,
    value: Option<f64>,
}

impl HttpMetricsBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.into(),
        }
    }

    async fn fetch_one(
        &self,
        metric: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<MetricSeries, MetricsError> {
        let url = format!("{}/api/v1/query", self.base_url);
        let request = RangeQueryRequest {
            metric,
            start: start.timestamp(),
            end: end.timestamp(),
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| MetricsError::Backend(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(MetricsError::UnknownMetric(metric.to_string()));
        }
        if !response.status().is_success() {
            return Err(MetricsError::Backend(format!(
                "backend returned status {}",
                response.status()
            )));
        }

        let body: RangeQueryResponse = response
            .json()
            .await
            .map_err(|e| MetricsError::Decode(e.to_string()))?;

        if body.points.is_empty() {
            return Err(MetricsError::NoData(metric.to_string()));
        }

        Ok(into_series(metric, body.points))
    }
}

/// Build a [`MetricSeries`], enforcing timestamp-ascending point order
/// regardless of what the backend returned
fn into_series(metric: &str, mut points: Vec<WirePoint>) -> MetricSeries {
    points.sort_by_key(|p| p.timestamp);
    MetricSeries::new(
        metric,
        points
            .into_iter()
            .map(|p| DataPoint::new(metric, p.timestamp, p.value))
            .collect(),
    )
}

#[async_trait]
impl MetricsBackend for HttpMetricsBackend {
    async fn fetch(
        &self,
        selectors: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TimeSeries, MetricsError> {
        let futures: Vec<_> = selectors
            .iter()
            .map(|metric| self.fetch_one(metric, start, end))
            .collect();

        let results = futures::future::join_all(futures).await;

        // Partial success is a total failure: the expression must see a
        // complete series set or none.
        let mut series = Vec::with_capacity(results.len());
        for result in results {
            series.push(result?);
        }

        Ok(TimeSeries::new(series))
    }
}
