//! Node configuration and wiring

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::alerts::{AlertDispatcher, Notifier, NotifierConfig, SmtpConfig};
use crate::cluster::{
    run_cluster_server, ClaimCoordinator, ClusterConfig, ClusterState, HttpClaims, MemoryClaims,
};
use crate::exec::{Executor, WorkerPool};
use crate::metrics::HttpMetricsBackend;
use crate::sched::Scheduler;
use crate::store::{JobStore, MemoryStore};

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Cluster-wide scheduling heartbeat, in seconds
    pub tick_interval_secs: u64,
    /// Maximum concurrent execution units on this node
    pub worker_concurrency: usize,
    /// Local work queue depth
    pub queue_depth: usize,
    /// Claim lease duration, in seconds
    pub lease_secs: u64,
    /// How long a missed scheduled time stays claimable, in seconds
    pub grace_secs: u64,
    /// Base URL of the external time-series backend
    pub metrics_url: String,
    pub metrics_timeout_secs: u64,
    pub notifier: NotifierConfig,
    pub cluster: ClusterConfig,
}

impl NodeConfig {
    /// Build configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let smtp = std::env::var("VIGIL_SMTP_HOST").ok().map(|host| SmtpConfig {
            host,
            port: std::env::var("VIGIL_SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(587),
            from: std::env::var("VIGIL_SMTP_FROM")
                .unwrap_or_else(|_| "Vigil <alerts@localhost>".to_string()),
        });

        Self {
            tick_interval_secs: env_u64("VIGIL_TICK_INTERVAL_SECS", defaults.tick_interval_secs),
            worker_concurrency: env_u64("VIGIL_WORKERS", defaults.worker_concurrency as u64)
                as usize,
            queue_depth: env_u64("VIGIL_QUEUE_DEPTH", defaults.queue_depth as u64) as usize,
            lease_secs: env_u64("VIGIL_LEASE_SECS", defaults.lease_secs),
            grace_secs: env_u64("VIGIL_GRACE_SECS", defaults.grace_secs),
            metrics_url: std::env::var("VIGIL_METRICS_URL").unwrap_or(defaults.metrics_url),
            metrics_timeout_secs: env_u64(
                "VIGIL_METRICS_TIMEOUT_SECS",
                defaults.metrics_timeout_secs,
            ),
            notifier: NotifierConfig {
                pager_url: std::env::var("VIGIL_PAGER_URL")
                    .unwrap_or(defaults.notifier.pager_url),
                incident_url: std::env::var("VIGIL_INCIDENT_URL")
                    .unwrap_or(defaults.notifier.incident_url),
                smtp,
            },
            cluster: ClusterConfig::from_env(),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            worker_concurrency: num_cpus::get(),
            queue_depth: 256,
            lease_secs: 120,
            grace_secs: 300,
            metrics_url: "http://127.0.0.1:4242".to_string(),
            metrics_timeout_secs: 30,
            notifier: NotifierConfig::default(),
            cluster: ClusterConfig::default(),
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Run one node: scheduler loop, worker pool, and cluster endpoints,
/// until ctrl-c
pub async fn run_node(config: NodeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store: Arc<dyn JobStore> = Arc::new(MemoryStore::new());
    run_node_with_store(config, store).await
}

/// Same as [`run_node`] but against a caller-provided store, so
/// deployments backed by a shared external store can reuse the wiring
pub async fn run_node_with_store(
    config: NodeConfig,
    store: Arc<dyn JobStore>,
) -> Result<(), Box<dyn std::error::Error>> {
    // Every node keeps a lease table, but only the authority's arbitrates
    // cluster claims
    let lease_table = Arc::new(MemoryClaims::new(config.grace()));

    let claims: Arc<dyn ClaimCoordinator> = if config.cluster.is_claim_authority() {
        tracing::info!(node_id = %config.cluster.node_id, "This node is the claim authority");
        Arc::clone(&lease_table) as Arc<dyn ClaimCoordinator>
    } else {
        let authority = config
            .cluster
            .claim_authority
            .clone()
            .unwrap_or_else(|| config.cluster.advertise_addr.clone());
        tracing::info!(authority = %authority, "Claiming via remote authority");
        Arc::new(HttpClaims::new(authority))
    };

    let metrics = Arc::new(HttpMetricsBackend::with_timeout(
        &config.metrics_url,
        Duration::from_secs(config.metrics_timeout_secs),
    ));
    let dispatcher = Arc::new(AlertDispatcher::new(Notifier::new(config.notifier.clone())));

    let (queue_tx, queue_rx) = mpsc::channel(config.queue_depth);

    let executor = Arc::new(Executor::new(
        Arc::clone(&store),
        metrics,
        Arc::clone(&claims),
        dispatcher,
        config.tick_interval(),
    ));
    let pool_handle = WorkerPool::start(executor, queue_rx, config.worker_concurrency);

    let mut scheduler = Scheduler::new(
        Arc::clone(&store),
        claims,
        queue_tx,
        config.tick_interval(),
        config.lease(),
        config.cluster.node_id.clone(),
    );
    let scheduler_handle = scheduler.start();

    let cluster_state = Arc::new(ClusterState {
        node_id: config.cluster.node_id.clone(),
        claims: lease_table,
    });
    let bind_addr = config.cluster.advertise_addr.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = run_cluster_server(&bind_addr, cluster_state).await {
            tracing::error!(error = %e, "Cluster server stopped");
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping node...");

    scheduler.stop().await;
    scheduler_handle.abort();
    pool_handle.abort();
    server_handle.abort();

    tracing::info!("Node stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.tick_interval_secs, 60);
        assert_eq!(config.lease_secs, 120);
        assert!(config.grace_secs >= config.lease_secs);
        assert!(config.worker_concurrency >= 1);
        assert!(config.cluster.is_claim_authority());
    }
}
