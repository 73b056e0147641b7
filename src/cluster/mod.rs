//! Cluster membership, claim coordination, and the internal node endpoints

pub mod claim;
pub mod client;
pub mod config;
pub mod server;

pub use claim::{ClaimCoordinator, ClaimError, ClaimKey, MemoryClaims};
pub use client::HttpClaims;
pub use config::{ClusterConfig, PeerNode};
pub use server::{run_cluster_server, ClusterState};
