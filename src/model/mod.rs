//! Core data model shared by the scheduler, executor, and alerting layers

pub mod job;
pub mod series;

pub use job::{AlertDestination, Job, JobError, JobId, JobStatus};
pub use series::{AnalysisResult, DataPoint, MetricSeries, MonitorOutput, TimeSeries};
