//! Per-node scheduler loop
//!
//! Every node ticks on the same fixed interval and derives the same
//! scheduled minute; the claim coordinator is what keeps the cluster from
//! firing a job twice. Losing a claim is the expected case on every node
//! but one.

pub mod cron;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cluster::{ClaimCoordinator, ClaimKey};
use crate::exec::ExecutionUnit;
use crate::store::JobStore;

use self::cron::{fires_at, parse_schedule, truncate_to_minute};

pub use self::cron::next_run;

/// Everything one tick needs
pub struct TickContext {
    store: Arc<dyn JobStore>,
    claims: Arc<dyn ClaimCoordinator>,
    queue: mpsc::Sender<ExecutionUnit>,
    schedules: Cache<String, Arc<::cron::Schedule>>,
    lease: Duration,
    node_id: String,
}

/// The per-node scheduling loop
pub struct Scheduler {
    ctx: Arc<TickContext>,
    tick_interval: Duration,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        claims: Arc<dyn ClaimCoordinator>,
        queue: mpsc::Sender<ExecutionUnit>,
        tick_interval: Duration,
        lease: Duration,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            ctx: Arc::new(TickContext {
                store,
                claims,
                queue,
                schedules: Cache::builder()
                    .max_capacity(1000)
                    .time_to_live(Duration::from_secs(3600))
                    .build(),
                lease,
                node_id: node_id.into(),
            }),
            tick_interval,
            shutdown_tx: None,
        }
    }

    /// Start the tick loop
    pub fn start(&mut self) -> JoinHandle<()> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let ctx = Arc::clone(&self.ctx);
        let tick_interval = self.tick_interval;

        tokio::spawn(async move {
            // Startup jitter desynchronizes node ticks against the claim
            // authority
            let jitter_ms = {
                let mut rng = rand::thread_rng();
                rng.gen_range(0..=2_000u64)
            };
            tokio::time::sleep(Duration::from_millis(jitter_ms)).await;

            let mut ticker = tokio::time::interval(tick_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_tick(&ctx, Utc::now()).await;
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Scheduler shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Stop the tick loop
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }
}

/// One tick: enumerate due jobs, race for claims, enqueue what we win
///
/// The scheduled time is the tick's whole minute, so re-deriving a missed
/// tick can never produce a key another node has not already seen.
pub async fn run_tick(ctx: &TickContext, as_of: DateTime<Utc>) {
    let scheduled_time = truncate_to_minute(as_of);

    let candidates = match ctx.store.list_due_candidates(as_of).await {
        Ok(candidates) => candidates,
        Err(e) => {
            // Never block the tick mechanism; next tick is the retry
            tracing::warn!(
                node_id = %ctx.node_id,
                error = %e,
                "Job store unreachable, skipping tick"
            );
            return;
        }
    };

    for job in candidates {
        let job_id = match job.id {
            Some(id) => id,
            None => continue,
        };

        let schedule = match compiled_schedule(&ctx.schedules, &job.cron) {
            Some(schedule) => schedule,
            None => {
                tracing::warn!(job_id = %job_id, cron = %job.cron, "Invalid cron expression");
                continue;
            }
        };

        if !fires_at(&schedule, scheduled_time) {
            continue;
        }

        let key = ClaimKey {
            job_id,
            scheduled_time,
        };

        match ctx.claims.claim(key, ctx.lease).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(
                    job_id = %job_id,
                    scheduled = %scheduled_time,
                    "Claim lost to another node"
                );
                continue;
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job_id,
                    error = %e,
                    "Claim coordinator unreachable, skipping job"
                );
                continue;
            }
        }

        let unit = ExecutionUnit {
            job,
            scheduled_time,
        };
        if ctx.queue.try_send(unit).is_err() {
            tracing::error!(
                job_id = %job_id,
                scheduled = %scheduled_time,
                "Work queue full, dropping claimed run"
            );
            // Free the job's claim slot so later minutes are not blocked
            // behind a run that never started
            if let Err(e) = ctx.claims.release(key).await {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to release dropped claim");
            }
        }
    }
}

fn compiled_schedule(
    cache: &Cache<String, Arc<::cron::Schedule>>,
    expr: &str,
) -> Option<Arc<::cron::Schedule>> {
    if let Some(schedule) = cache.get(expr) {
        return Some(schedule);
    }

    match parse_schedule(expr) {
        Ok(schedule) => {
            let schedule = Arc::new(schedule);
            cache.insert(expr.to_string(), Arc::clone(&schedule));
            Some(schedule)
        }
        Err(_) => None,
    }
}
