use serde::{Deserialize, Serialize};

/// Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// This node's ID
    pub node_id: String,
    /// This node's advertised address
    pub advertise_addr: String,
    /// List of peer nodes (excluding self)
    pub peers: Vec<PeerNode>,
    /// Address of the claim authority; `None` means this node is the
    /// authority and arbitrates claims for the whole cluster
    pub claim_authority: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerNode {
    pub id: String,
    pub addr: String,
}

impl ClusterConfig {
    /// Create a single-node (non-distributed) config
    pub fn single_node() -> Self {
        Self {
            node_id: "node-1".to_string(),
            advertise_addr: "127.0.0.1:8080".to_string(),
            peers: vec![],
            claim_authority: None,
        }
    }

    /// Create a cluster config from environment variables
    /// VIGIL_NODE_ID=node-1
    /// VIGIL_ADVERTISE_ADDR=127.0.0.1:8080
    /// VIGIL_PEERS=node-2:127.0.0.1:8081,node-3:127.0.0.1:8082
    /// VIGIL_CLAIM_AUTHORITY=127.0.0.1:8080
    pub fn from_env() -> Self {
        let node_id = std::env::var("VIGIL_NODE_ID").unwrap_or_else(|_| "node-1".to_string());
        let advertise_addr =
            std::env::var("VIGIL_ADVERTISE_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let claim_authority = std::env::var("VIGIL_CLAIM_AUTHORITY")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_string());

        let peers = std::env::var("VIGIL_PEERS")
            .map(|s| {
                s.split(',')
                    .filter_map(|peer| {
                        let parts: Vec<&str> = peer.split(':').collect();
                        if parts.len() >= 2 {
                            Some(PeerNode {
                                id: parts[0].to_string(),
                                addr: parts[1..].join(":"),
                            })
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            node_id,
            advertise_addr,
            peers,
            claim_authority,
        }
    }

    /// Check if this is a distributed cluster
    pub fn is_distributed(&self) -> bool {
        !self.peers.is_empty()
    }

    /// Whether this node arbitrates claims for the cluster
    pub fn is_claim_authority(&self) -> bool {
        match &self.claim_authority {
            None => true,
            Some(addr) => addr == &self.advertise_addr,
        }
    }

    /// Get peer addresses only (excluding self)
    pub fn peer_addrs(&self) -> Vec<String> {
        self.peers.iter().map(|p| p.addr.clone()).collect()
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self::single_node()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_node_is_authority() {
        let config = ClusterConfig::single_node();
        assert!(!config.is_distributed());
        assert!(config.is_claim_authority());
    }

    #[test]
    fn test_authority_matches_advertise_addr() {
        let mut config = ClusterConfig::single_node();
        config.claim_authority = Some("127.0.0.1:8080".to_string());
        assert!(config.is_claim_authority());

        config.claim_authority = Some("10.0.0.2:8080".to_string());
        assert!(!config.is_claim_authority());
    }
}
