/// Snapshot store: a full-state image of a node's key space at an instant.
///
/// A snapshot is written to a sibling `.tmp` path and then renamed over the
/// canonical path, so a reader of the canonical path only ever observes the
/// previous complete snapshot or the new complete snapshot — never a
/// partially written file. `rename` is atomic on the filesystems this crate
/// targets (ext4, APFS, most POSIX filesystems on a single volume).
use crate::error::{DeltaError, DeltaResult};
use crate::types::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Handle to the canonical snapshot file for one node's data directory.
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Point at `path` (typically `<data_dir>/snapshot.json`). Does not
    /// touch the filesystem.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Write `state` to `<path>.tmp`, then rename it over `path`.
    ///
    /// At every instant on disk, either the previous snapshot (untouched
    /// until the rename commits) or the complete new one is present under
    /// the canonical name.
    pub async fn save(&self, state: &HashMap<String, Value>) -> DeltaResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DeltaError::Durability(format!("snapshot dir create failed: {e}")))?;
        }
        let tmp_path = self.tmp_path();
        let bytes = serde_json::to_vec(state)?;
        fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| DeltaError::Durability(format!("snapshot write failed: {e}")))?;
        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| DeltaError::Durability(format!("snapshot rename failed: {e}")))?;
        Ok(())
    }

    /// Load the canonical snapshot, or `None` if it does not exist yet —
    /// that is a normal first-boot state, not an error.
    pub async fn load(&self) -> DeltaResult<Option<HashMap<String, Value>>> {
        match fs::read(&self.path).await {
            Ok(bytes) => {
                let state = serde_json::from_slice(&bytes)?;
                Ok(Some(state))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DeltaError::Durability(format!("snapshot read failed: {e}"))),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone();
        let mut file_name = tmp
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        file_name.push(".tmp");
        tmp.set_file_name(file_name);
        tmp
    }

    /// Canonical path this snapshot store writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VectorClock;
    use chrono::Utc;
    use tempfile::tempdir;

    fn sample_state() -> HashMap<String, Value> {
        let mut state = HashMap::new();
        let mut clock = VectorClock::new();
        clock.increment("n1");
        state.insert("a".to_string(), Value::new("1".to_string(), clock, Utc::now()));
        state
    }

    #[tokio::test]
    async fn load_with_no_snapshot_yields_none() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshot.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshot.json"));
        let state = sample_state();
        store.save(&state).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["a"].data, "1");
    }

    #[tokio::test]
    async fn save_never_leaves_a_tmp_file_behind() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshot.json"));
        store.save(&sample_state()).await.unwrap();
        assert!(!store.tmp_path().exists());
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn second_save_atomically_replaces_the_first() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshot.json"));
        store.save(&sample_state()).await.unwrap();

        let mut second = sample_state();
        second.insert("b".to_string(), second["a"].clone());
        store.save(&second).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
    }
}
