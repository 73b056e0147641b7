//! Vigil Node
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - VIGIL_TICK_INTERVAL_SECS: Scheduling heartbeat (default: 60)
//! - VIGIL_WORKERS: Max concurrent execution units (default: CPU count)
//! - VIGIL_QUEUE_DEPTH: Local work queue depth (default: 256)
//! - VIGIL_LEASE_SECS: Claim lease duration (default: 120)
//! - VIGIL_GRACE_SECS: Missed-cycle grace window (default: 300)
//! - VIGIL_METRICS_URL: Time-series backend base URL (default: http://127.0.0.1:4242)
//! - VIGIL_SMTP_HOST / VIGIL_SMTP_PORT / VIGIL_SMTP_FROM: Email relay
//! - RUST_LOG: Log level (default: info)
//!
//! Cluster configuration:
//! - VIGIL_NODE_ID: Unique identifier for this node (default: node-1)
//! - VIGIL_ADVERTISE_ADDR: Address this node advertises to peers
//! - VIGIL_PEERS: Comma-separated peer list (e.g. "node-2:10.0.0.2:8080")
//! - VIGIL_CLAIM_AUTHORITY: Address of the claim authority; unset means
//!   this node arbitrates claims itself

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil::{run_node, NodeConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = NodeConfig::from_env();

    tracing::info!("Vigil configuration:");
    tracing::info!("  Node ID: {}", config.cluster.node_id);
    tracing::info!("  Advertise address: {}", config.cluster.advertise_addr);
    tracing::info!("  Tick interval: {} seconds", config.tick_interval_secs);
    tracing::info!("  Workers: {}", config.worker_concurrency);
    tracing::info!(
        "  Claim lease: {}s (grace {}s)",
        config.lease_secs,
        config.grace_secs
    );
    tracing::info!("  Metrics backend: {}", config.metrics_url);

    if config.cluster.is_distributed() {
        tracing::info!("  Cluster mode: {} peers", config.cluster.peers.len());
        for peer in &config.cluster.peers {
            tracing::info!("    - {} @ {}", peer.id, peer.addr);
        }
        match &config.cluster.claim_authority {
            Some(addr) if !config.cluster.is_claim_authority() => {
                tracing::info!("  Claim authority: {}", addr);
            }
            _ => tracing::info!("  Claim authority: this node"),
        }
    } else {
        tracing::info!("  Cluster mode: DISABLED (single node)");
    }

    run_node(config).await
}
