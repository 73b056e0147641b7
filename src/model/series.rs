//! Time-series payloads exchanged with the metrics backend and retained
//! with run results

use serde::{Deserialize, Serialize};

use super::job::JobStatus;

/// A single observation for one metric
///
/// `value` of `None` means the backend reported no data at this timestamp,
/// which is distinct from a zero reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub metric: String,
    /// Epoch seconds
    pub timestamp: i64,
    pub value: Option<f64>,
}

impl DataPoint {
    pub fn new(metric: impl Into<String>, timestamp: i64, value: Option<f64>) -> Self {
        Self {
            metric: metric.into(),
            timestamp,
            value,
        }
    }
}

/// All observations for one metric, timestamp-ascending
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub metric: String,
    pub points: Vec<DataPoint>,
}

impl MetricSeries {
    pub fn new(metric: impl Into<String>, points: Vec<DataPoint>) -> Self {
        Self {
            metric: metric.into(),
            points,
        }
    }

    /// Present values only, in timestamp order
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().filter_map(|p| p.value)
    }
}

/// Fetched series for all of a job's selectors
///
/// Outer order follows the job's selector order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub series: Vec<MetricSeries>,
}

impl TimeSeries {
    pub fn new(series: Vec<MetricSeries>) -> Self {
        Self { series }
    }

    pub fn series_for(&self, metric: &str) -> Option<&MetricSeries> {
        self.series.iter().find(|s| s.metric == metric)
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }
}

/// What the expression produced, tagged with the resulting status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorOutput {
    pub status: JobStatus,
    /// Textual output of the evaluation
    pub output: String,
    /// Opaque rendering payload for the dashboard graph
    pub graph: serde_json::Value,
}

impl MonitorOutput {
    pub fn new(status: JobStatus, output: impl Into<String>, graph: serde_json::Value) -> Self {
        Self {
            status,
            output: output.into(),
            graph,
        }
    }
}

/// Final verdict of one job run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub status: JobStatus,
    pub output: MonitorOutput,
    /// Human-readable failure description, if the run did not succeed
    pub message: Option<String>,
    /// The series that produced the verdict, retained for later rendering
    pub series: TimeSeries,
}

impl AnalysisResult {
    pub fn new(status: JobStatus, output: MonitorOutput, series: TimeSeries) -> Self {
        Self {
            status,
            output,
            message: None,
            series,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
