/// Node configuration: quorum parameters, timeouts, and filesystem/network
/// placement. Defaults mirror §4.7.5 and §6 of the durability and
/// replication model.
use crate::error::{DeltaError, DeltaResult};
use crate::replicator::{DEFAULT_OPERATION_DEADLINE, DEFAULT_PEER_TIMEOUT};
use std::path::PathBuf;
use std::time::Duration;

/// Default interval between background snapshots.
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(60);
/// Default grace period allotted to in-flight operations during shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(15);
/// Default number of virtual positions each physical node contributes to
/// the consistent-hash ring.
pub const DEFAULT_VIRTUAL_NODES: u32 = 150;

/// A statically-known peer at startup: its id and the address to dial.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub id: String,
    pub address: String,
}

/// Everything a node needs to start: its own identity, where to listen,
/// where to persist, who its peers are, and the quorum/timeout knobs that
/// govern replication.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    pub listen_address: String,
    pub data_dir: PathBuf,
    pub peers: Vec<PeerConfig>,
    /// Replication factor: how many physical nodes should hold each key.
    pub n: usize,
    /// Write quorum: acks required before a write reports success.
    pub w: usize,
    /// Read quorum: responses required before a read reconciles and returns.
    pub r: usize,
    pub virtual_nodes: u32,
    pub snapshot_interval: Duration,
    pub shutdown_grace: Duration,
    pub peer_timeout: Duration,
    pub operation_deadline: Duration,
    /// See `Replicator::with_quorum_delete` — `false` awaits all peers on
    /// delete, `true` waits for only `W`.
    pub wait_for_quorum_on_delete: bool,
}

impl NodeConfig {
    /// A single-node configuration with `N = W = R = 1`, useful for tests
    /// and standalone operation.
    pub fn standalone(node_id: impl Into<String>, listen_address: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            node_id: node_id.into(),
            listen_address: listen_address.into(),
            data_dir: data_dir.into(),
            peers: Vec::new(),
            n: 1,
            w: 1,
            r: 1,
            virtual_nodes: DEFAULT_VIRTUAL_NODES,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            peer_timeout: DEFAULT_PEER_TIMEOUT,
            operation_deadline: DEFAULT_OPERATION_DEADLINE,
            wait_for_quorum_on_delete: false,
        }
    }

    /// Reject configurations that can never be satisfied regardless of
    /// cluster liveness: zero-sized quorum parameters, `N` larger than the
    /// known cluster, or `W + R <= N` (no overlap between a write quorum
    /// and a read quorum is possible, so reads could miss the latest
    /// write even when every node is healthy).
    pub fn validate(&self) -> DeltaResult<()> {
        let known_cluster_size = self.peers.len() + 1;

        if self.n == 0 || self.w == 0 || self.r == 0 {
            return Err(DeltaError::ConfigFatal(
                "N, W, and R must all be at least 1".to_string(),
            ));
        }
        if self.n > known_cluster_size {
            return Err(DeltaError::ConfigFatal(format!(
                "N ({}) exceeds the known cluster size ({known_cluster_size})",
                self.n
            )));
        }
        if self.w > self.n || self.r > self.n {
            return Err(DeltaError::ConfigFatal(format!(
                "W ({}) and R ({}) must not exceed N ({})",
                self.w, self.r, self.n
            )));
        }
        if self.w + self.r <= self.n {
            return Err(DeltaError::ConfigFatal(format!(
                "W + R ({}) must exceed N ({}) or reads are not guaranteed to see the latest write",
                self.w + self.r,
                self.n
            )));
        }
        if self.virtual_nodes == 0 {
            return Err(DeltaError::ConfigFatal(
                "virtual_nodes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standalone_config_validates() {
        let config = NodeConfig::standalone("n1", "127.0.0.1:7000", "/tmp/delta-kv-test");
        config.validate().unwrap();
    }

    #[test]
    fn rejects_w_plus_r_not_exceeding_n() {
        let mut config = NodeConfig::standalone("n1", "127.0.0.1:7000", "/tmp/delta-kv-test");
        config.peers.push(PeerConfig {
            id: "n2".to_string(),
            address: "127.0.0.1:7001".to_string(),
        });
        config.peers.push(PeerConfig {
            id: "n3".to_string(),
            address: "127.0.0.1:7002".to_string(),
        });
        config.n = 3;
        config.w = 1;
        config.r = 1;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, DeltaError::ConfigFatal(_)));
    }

    #[test]
    fn rejects_n_larger_than_known_cluster() {
        let mut config = NodeConfig::standalone("n1", "127.0.0.1:7000", "/tmp/delta-kv-test");
        config.n = 5;
        config.w = 3;
        config.r = 3;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, DeltaError::ConfigFatal(_)));
    }

    #[test]
    fn rejects_zero_quorum_parameters() {
        let mut config = NodeConfig::standalone("n1", "127.0.0.1:7000", "/tmp/delta-kv-test");
        config.r = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, DeltaError::ConfigFatal(_)));
    }
}
