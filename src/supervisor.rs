/// Process-level supervision: the periodic snapshot loop and graceful
/// shutdown. Startup configuration validation lives in `NodeConfig`
/// itself; the supervisor's job starts once a `Store` is already open.
use crate::config::NodeConfig;
use crate::error::DeltaResult;
use crate::store::Store;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Drives a `Store`'s background snapshot cadence and its shutdown
/// sequence. One `Supervisor` per node process.
pub struct Supervisor {
    store: Arc<Store>,
    config: NodeConfig,
}

impl Supervisor {
    /// Validate `config` before constructing — a fatal configuration
    /// error here means the node must not start at all.
    pub fn new(store: Arc<Store>, config: NodeConfig) -> DeltaResult<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    /// Snapshot every `config.snapshot_interval` until `shutdown` fires,
    /// then take one final snapshot bounded by `config.shutdown_grace`
    /// before returning. A snapshot that fails during the loop is logged
    /// and does not stop the node; a final snapshot that exceeds its
    /// grace period is logged as an error and the process still returns
    /// normally — the WAL on disk remains the durable record either way.
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) -> DeltaResult<()> {
        let mut ticker = tokio::time::interval(self.config.snapshot_interval);
        ticker.tick().await; // first tick is immediate; this node just opened its WAL.

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.store.snapshot().await {
                        Ok(()) => tracing::debug!(node = %self.config.node_id, "periodic snapshot complete"),
                        Err(e) => tracing::warn!(node = %self.config.node_id, error = %e, "periodic snapshot failed"),
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!(node = %self.config.node_id, "shutdown requested");
                    break;
                }
            }
        }

        match tokio::time::timeout(self.config.shutdown_grace, self.store.snapshot()).await {
            Ok(Ok(())) => tracing::info!(node = %self.config.node_id, "final snapshot complete"),
            Ok(Err(e)) => tracing::error!(node = %self.config.node_id, error = %e, "final snapshot failed"),
            Err(_) => tracing::error!(
                node = %self.config.node_id,
                grace_secs = self.config.shutdown_grace.as_secs(),
                "final snapshot exceeded shutdown grace period"
            ),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn periodic_snapshots_truncate_the_wal() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path(), "n1").await.unwrap());
        store.put("a", "1".to_string(), None).await.unwrap();

        let mut config = NodeConfig::standalone("n1", "127.0.0.1:7000", dir.path());
        config.snapshot_interval = Duration::from_millis(20);
        let supervisor = Supervisor::new(Arc::clone(&store), config).unwrap();

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(supervisor.run(rx));

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        assert!(dir.path().join("snapshot.json").exists());
    }

    #[tokio::test]
    async fn shutdown_takes_a_final_snapshot() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path(), "n1").await.unwrap());
        store.put("a", "1".to_string(), None).await.unwrap();

        let mut config = NodeConfig::standalone("n1", "127.0.0.1:7000", dir.path());
        config.snapshot_interval = Duration::from_secs(3600);
        let supervisor = Supervisor::new(Arc::clone(&store), config).unwrap();

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(supervisor.run(rx));
        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        assert!(dir.path().join("snapshot.json").exists());
    }

    #[tokio::test]
    async fn new_rejects_an_invalid_config() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path(), "n1").await.unwrap());
        let mut config = NodeConfig::standalone("n1", "127.0.0.1:7000", dir.path());
        config.r = 0;
        assert!(Supervisor::new(store, config).is_err());
    }
}
