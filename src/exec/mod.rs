//! Job execution: the worker pool and the per-run pipeline

pub mod pipeline;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::model::Job;

pub use pipeline::Executor;

/// One claimed run: a job snapshot plus the scheduled fire time it was
/// claimed for
#[derive(Debug, Clone)]
pub struct ExecutionUnit {
    pub job: Job,
    pub scheduled_time: DateTime<Utc>,
}

/// Drains the node's work queue into the pipeline, with bounded
/// concurrency capping simultaneous sandboxes and outbound fetches
pub struct WorkerPool;

impl WorkerPool {
    /// Spawn the pool; it runs until every queue sender is dropped
    pub fn start(
        executor: Arc<Executor>,
        mut queue: mpsc::Receiver<ExecutionUnit>,
        concurrency: usize,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

            while let Some(unit) = queue.recv().await {
                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };

                let executor = Arc::clone(&executor);
                // Each unit is isolated: nothing it does can affect the
                // queue loop or other units
                tokio::spawn(async move {
                    executor.run_unit(unit).await;
                    drop(permit);
                });
            }

            tracing::info!("Worker pool shutting down");
        })
    }
}
