//! The per-run pipeline: fetch, evaluate, alert, record
//!
//! Every failure inside fetching or evaluating maps to a classified
//! status; the pipeline itself never aborts a run. Only infrastructure
//! failures writing the final record surface as operational errors, and
//! those are logged and abandoned — the next scheduled cycle is the retry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::alerts::AlertDispatcher;
use crate::cluster::{ClaimCoordinator, ClaimKey};
use crate::expr::{EvalError, Sandbox};
use crate::metrics::MetricsBackend;
use crate::model::{AnalysisResult, Job, JobId, JobStatus, MonitorOutput, TimeSeries};
use crate::store::{JobStore, StoreError};

use super::ExecutionUnit;

/// Runs execution units through the pipeline
pub struct Executor {
    store: Arc<dyn JobStore>,
    metrics: Arc<dyn MetricsBackend>,
    claims: Arc<dyn ClaimCoordinator>,
    dispatcher: Arc<AlertDispatcher>,
    sandbox: Sandbox,
    tick_interval: Duration,
}

impl Executor {
    pub fn new(
        store: Arc<dyn JobStore>,
        metrics: Arc<dyn MetricsBackend>,
        claims: Arc<dyn ClaimCoordinator>,
        dispatcher: Arc<AlertDispatcher>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            store,
            metrics,
            claims,
            dispatcher,
            sandbox: Sandbox::new(),
            tick_interval,
        }
    }

    /// Run one claimed unit to completion
    pub async fn run_unit(&self, unit: ExecutionUnit) {
        let job = &unit.job;
        let job_id = match job.id {
            Some(id) => id,
            None => {
                tracing::warn!(job_name = %job.name, "Unpersisted job reached the executor");
                return;
            }
        };

        tracing::debug!(
            job_id = %job_id,
            scheduled = %unit.scheduled_time,
            "Run starting"
        );

        let result = self.analyze(job, unit.scheduled_time).await;

        self.dispatcher
            .dispatch(job, job.last_status, result.status, &result, unit.scheduled_time)
            .await;

        if let Err(e) = self.record(job_id, &unit, &result).await {
            tracing::error!(
                job_id = %job_id,
                error = %e,
                "Failed to record run result, abandoning unit"
            );
        }

        let key = ClaimKey {
            job_id,
            scheduled_time: unit.scheduled_time,
        };
        if let Err(e) = self.claims.release(key).await {
            tracing::warn!(
                job_id = %job_id,
                error = %e,
                "Failed to release claim, lease will expire on its own"
            );
        }
    }

    /// Fetching and Evaluating, folded into a classified result
    async fn analyze(&self, job: &Job, scheduled_time: DateTime<Utc>) -> AnalysisResult {
        let (start, end) = job.window(scheduled_time);

        let series = match self.metrics.fetch(&job.selectors, start, end).await {
            Ok(series) => series,
            Err(e) => {
                let status = if e.is_metric_error() {
                    JobStatus::BackendMetricError
                } else {
                    JobStatus::BackendError
                };
                tracing::debug!(job_name = %job.name, error = %e, "Metric fetch failed");
                return AnalysisResult::new(
                    status,
                    MonitorOutput::new(status, "", serde_json::Value::Null),
                    TimeSeries::default(),
                )
                .with_message(e.to_string());
            }
        };

        let (status, output, message) = self.evaluate(job, &series);
        let graph = serde_json::to_value(&series).unwrap_or(serde_json::Value::Null);

        let mut result = AnalysisResult::new(status, MonitorOutput::new(status, output, graph), series);
        if let Some(message) = message {
            result = result.with_message(message);
        }
        result
    }

    fn evaluate(&self, job: &Job, series: &TimeSeries) -> (JobStatus, String, Option<String>) {
        let source = match &job.expression {
            Some(source) => source,
            // No expression: the check is that every selector produced data
            None => {
                let missing: Vec<&str> = series
                    .series
                    .iter()
                    .filter(|s| s.values().next().is_none())
                    .map(|s| s.metric.as_str())
                    .collect();

                return if missing.is_empty() {
                    (JobStatus::Success, "data present".to_string(), None)
                } else {
                    (
                        JobStatus::Failed,
                        "data missing".to_string(),
                        Some(format!("no data for: {}", missing.join(", "))),
                    )
                };
            }
        };

        let deadline = Instant::now() + self.eval_deadline(job);
        match self.sandbox.evaluate(source, series, deadline) {
            Ok(verdict) if verdict.passed => (JobStatus::Success, verdict.output, None),
            Ok(verdict) => (
                JobStatus::Failed,
                verdict.output,
                Some(format!("expression '{}' evaluated to false", source)),
            ),
            Err(EvalError::Forbidden(name)) => (
                JobStatus::SecurityError,
                String::new(),
                Some(format!(
                    "expression attempted forbidden capability '{}'",
                    name
                )),
            ),
            Err(e) => (JobStatus::Error, String::new(), Some(e.to_string())),
        }
    }

    /// Deadline for one evaluation: the job's error timeout, capped so a
    /// runaway expression can never outlive the cycle that scheduled it
    fn eval_deadline(&self, job: &Job) -> Duration {
        let timeout = Duration::from_secs(u64::from(job.error_timeout_minutes) * 60);
        timeout.min(self.tick_interval)
    }

    /// Recording: CAS the status, maintain the error interval, persist the
    /// analysis
    async fn record(
        &self,
        job_id: JobId,
        unit: &ExecutionUnit,
        result: &AnalysisResult,
    ) -> Result<(), StoreError> {
        let at = unit.scheduled_time;

        let updated = self
            .store
            .compare_and_set_status(job_id, unit.job.version, result.status, at)
            .await?;
        if !updated {
            tracing::error!(
                job_id = %job_id,
                "Job version moved under us, dropping result (possible double claim)"
            );
            return Ok(());
        }

        if result.status.is_success() {
            self.store.close_open_error(job_id, at).await?;
        } else {
            self.store
                .append_or_extend_error(job_id, result.status, result.message.clone(), at)
                .await?;
        }

        self.store.record_analysis(job_id, result.clone()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::alerts::{Notifier, NotifierConfig};
    use crate::cluster::MemoryClaims;
    use crate::metrics::MetricsError;
    use crate::model::{DataPoint, MetricSeries};
    use crate::store::MemoryStore;

    /// Metrics backend returning queued responses, one per fetch
    struct StubMetrics {
        responses: Mutex<VecDeque<Result<TimeSeries, MetricsError>>>,
    }

    impl StubMetrics {
        fn new(responses: Vec<Result<TimeSeries, MetricsError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait]
    impl MetricsBackend for StubMetrics {
        async fn fetch(
            &self,
            _selectors: &[String],
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<TimeSeries, MetricsError> {
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(TimeSeries::default()))
        }
    }

    fn latency_at(value: f64, minute: i64) -> TimeSeries {
        TimeSeries::new(vec![MetricSeries::new(
            "service.latency",
            vec![DataPoint::new("service.latency", minute * 60, Some(value))],
        )])
    }

    fn executor_with(
        store: Arc<MemoryStore>,
        responses: Vec<Result<TimeSeries, MetricsError>>,
    ) -> Executor {
        Executor::new(
            store,
            Arc::new(StubMetrics::new(responses)),
            Arc::new(MemoryClaims::default()),
            Arc::new(AlertDispatcher::new(Notifier::new(NotifierConfig::default()))),
            Duration::from_secs(60),
        )
    }

    async fn seed_job(store: &MemoryStore, expression: &str) -> Job {
        store
            .put_job(
                Job::new("ops", "API latency", "* * * * *", "service.latency")
                    .with_expression(expression),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_failure_then_recovery_scenario() {
        let store = Arc::new(MemoryStore::new());
        let executor = executor_with(
            Arc::clone(&store),
            vec![Ok(latency_at(150.0, 5)), Ok(latency_at(50.0, 6))],
        );

        let job = seed_job(&store, "max(latency) < 100").await;
        let job_id = job.id.unwrap();
        let minute_5 = Utc::now();

        executor
            .run_unit(ExecutionUnit {
                job,
                scheduled_time: minute_5,
            })
            .await;

        let stored = store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(stored.last_status, Some(JobStatus::Failed));
        assert_eq!(stored.last_run, Some(minute_5));

        let open = store.open_error(job_id).await.unwrap().unwrap();
        assert_eq!(open.status, JobStatus::Failed);
        assert_eq!(open.created, minute_5);

        // Next run sees a healthy value
        let minute_6 = minute_5 + chrono::Duration::minutes(1);
        executor
            .run_unit(ExecutionUnit {
                job: stored,
                scheduled_time: minute_6,
            })
            .await;

        let stored = store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(stored.last_status, Some(JobStatus::Success));
        assert!(store.open_error(job_id).await.unwrap().is_none());

        let history = store.error_history(job_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].closed, Some(minute_6));

        let analysis = store.analysis(job_id).await.unwrap().unwrap();
        assert_eq!(analysis.status, JobStatus::Success);
    }

    #[tokio::test]
    async fn test_unknown_metric_is_backend_metric_error() {
        let store = Arc::new(MemoryStore::new());
        let executor = executor_with(
            Arc::clone(&store),
            vec![Err(MetricsError::UnknownMetric("service.latency".into()))],
        );

        let job = seed_job(&store, "max(latency) < 100").await;
        let job_id = job.id.unwrap();

        executor
            .run_unit(ExecutionUnit {
                job,
                scheduled_time: Utc::now(),
            })
            .await;

        let stored = store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(stored.last_status, Some(JobStatus::BackendMetricError));

        let open = store.open_error(job_id).await.unwrap().unwrap();
        assert_eq!(open.status, JobStatus::BackendMetricError);

        // No evaluation happened: the retained series is empty
        let analysis = store.analysis(job_id).await.unwrap().unwrap();
        assert!(analysis.series.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_backend_error() {
        let store = Arc::new(MemoryStore::new());
        let executor = executor_with(
            Arc::clone(&store),
            vec![Err(MetricsError::Backend("connection refused".into()))],
        );

        let job = seed_job(&store, "max(latency) < 100").await;
        let job_id = job.id.unwrap();

        executor
            .run_unit(ExecutionUnit {
                job,
                scheduled_time: Utc::now(),
            })
            .await;

        let stored = store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(stored.last_status, Some(JobStatus::BackendError));
    }

    #[tokio::test]
    async fn test_forbidden_capability_is_security_error_and_worker_survives() {
        let store = Arc::new(MemoryStore::new());
        let executor = executor_with(
            Arc::clone(&store),
            vec![Ok(latency_at(50.0, 1)), Ok(latency_at(50.0, 2))],
        );

        let job = seed_job(&store, "connect(latency) < 1").await;
        let job_id = job.id.unwrap();
        let t1 = Utc::now();

        executor
            .run_unit(ExecutionUnit {
                job,
                scheduled_time: t1,
            })
            .await;

        let stored = store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(stored.last_status, Some(JobStatus::SecurityError));

        // The executor is fine; a later healthy job proceeds normally
        let healthy = seed_job(&store, "max(latency) < 100").await;
        let healthy_id = healthy.id.unwrap();
        executor
            .run_unit(ExecutionUnit {
                job: healthy,
                scheduled_time: t1 + chrono::Duration::minutes(1),
            })
            .await;
        let stored = store.get_job(healthy_id).await.unwrap().unwrap();
        assert_eq!(stored.last_status, Some(JobStatus::Success));
    }

    #[tokio::test]
    async fn test_runtime_fault_is_error_status() {
        let store = Arc::new(MemoryStore::new());
        let executor = executor_with(Arc::clone(&store), vec![Ok(latency_at(50.0, 1))]);

        // References a metric that is not among the selectors
        let job = seed_job(&store, "max(nonexistent) < 100").await;
        let job_id = job.id.unwrap();

        executor
            .run_unit(ExecutionUnit {
                job,
                scheduled_time: Utc::now(),
            })
            .await;

        let stored = store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(stored.last_status, Some(JobStatus::Error));
    }

    #[tokio::test]
    async fn test_expired_deadline_yields_error_status() {
        let store = Arc::new(MemoryStore::new());
        let executor = executor_with(Arc::clone(&store), vec![Ok(latency_at(50.0, 1))]);

        // A zero-minute timeout means the deadline has passed before the
        // first AST node is visited
        let job = store
            .put_job(
                Job::new("ops", "check", "* * * * *", "service.latency")
                    .with_expression("max(latency) < 100")
                    .with_error_timeout(0),
            )
            .await
            .unwrap();
        let job_id = job.id.unwrap();

        executor
            .run_unit(ExecutionUnit {
                job,
                scheduled_time: Utc::now(),
            })
            .await;

        let stored = store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(stored.last_status, Some(JobStatus::Error));

        let open = store.open_error(job_id).await.unwrap().unwrap();
        assert!(open.message.unwrap().contains("deadline"));
    }

    #[tokio::test]
    async fn test_stale_version_snapshot_is_dropped() {
        let store = Arc::new(MemoryStore::new());
        let executor = executor_with(
            Arc::clone(&store),
            vec![Ok(latency_at(150.0, 1)), Ok(latency_at(50.0, 2))],
        );

        let job = seed_job(&store, "max(latency) < 100").await;
        let job_id = job.id.unwrap();
        let stale_snapshot = job.clone();
        let t = Utc::now();

        executor
            .run_unit(ExecutionUnit {
                job,
                scheduled_time: t,
            })
            .await;
        let after_first = store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(after_first.last_status, Some(JobStatus::Failed));

        // A unit carrying the pre-run snapshot loses the CAS and changes
        // nothing
        executor
            .run_unit(ExecutionUnit {
                job: stale_snapshot,
                scheduled_time: t + chrono::Duration::minutes(1),
            })
            .await;

        let after_second = store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(after_second.last_status, Some(JobStatus::Failed));
        assert_eq!(after_second.version, after_first.version);
    }

    #[tokio::test]
    async fn test_job_without_expression_checks_data_presence() {
        let store = Arc::new(MemoryStore::new());

        let empty = TimeSeries::new(vec![MetricSeries::new(
            "service.latency",
            vec![DataPoint::new("service.latency", 60, None)],
        )]);
        let executor = executor_with(
            Arc::clone(&store),
            vec![Ok(latency_at(50.0, 1)), Ok(empty)],
        );

        let job = store
            .put_job(Job::new("ops", "presence", "* * * * *", "service.latency"))
            .await
            .unwrap();
        let job_id = job.id.unwrap();
        let t = Utc::now();

        executor
            .run_unit(ExecutionUnit {
                job,
                scheduled_time: t,
            })
            .await;
        let stored = store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(stored.last_status, Some(JobStatus::Success));

        executor
            .run_unit(ExecutionUnit {
                job: stored,
                scheduled_time: t + chrono::Duration::minutes(1),
            })
            .await;
        let stored = store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(stored.last_status, Some(JobStatus::Failed));
    }
}
