/// Single-node storage engine: in-memory map, WAL, snapshot, crash recovery.
///
/// The map is guarded by a single readers-writer lock. Writers (`put`,
/// `delete`, `apply_remote`) take it exclusively; readers (`get`,
/// `get_raw`, `keys`) and the defensive copy `snapshot` takes to hand off
/// to the filesystem share it. The WAL is appended to while the write
/// lock is held, so WAL order follows the logical order writes were
/// applied in — no operation holds the lock across network I/O, and
/// `snapshot` releases the lock before it touches the filesystem.
use crate::error::DeltaResult;
use crate::snapshot::SnapshotStore;
use crate::types::{ClockOrdering, Value, VectorClock};
use crate::wal::{Op, WalEntry, WriteAheadLog};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// A node's durable key-value map: WAL-first mutation with crash recovery
/// via WAL replay over the last snapshot.
pub struct Store {
    node_id: String,
    data_dir: PathBuf,
    data: RwLock<HashMap<String, Value>>,
    wal: WriteAheadLog,
    snapshots: SnapshotStore,
}

impl Store {
    /// Create `data_dir` if absent, load the snapshot into memory (if any),
    /// open the WAL, and replay it over the loaded snapshot. Replay never
    /// re-appends to the WAL — the entries it replays are already durable.
    pub async fn open(data_dir: impl Into<PathBuf>, node_id: impl Into<String>) -> DeltaResult<Self> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir).await?;

        let snapshots = SnapshotStore::new(data_dir.join("snapshot.json"));
        let mut data = snapshots.load().await?.unwrap_or_default();

        let wal = WriteAheadLog::open(data_dir.join("wal.log")).await?;
        for entry in wal.read_all().await? {
            apply_entry(&mut data, entry);
        }

        Ok(Self {
            node_id: node_id.into(),
            data_dir,
            data: RwLock::new(data),
            wal,
            snapshots,
        })
    }

    /// Store `data` under `key`. If `clock` is `None`, start from an empty
    /// clock; either way, always bump this node's own counter before
    /// writing. The WAL append happens before the map is updated — on
    /// failure the in-memory map is left untouched and the caller sees the
    /// write as not having happened.
    pub async fn put(&self, key: &str, data: String, clock: Option<VectorClock>) -> DeltaResult<Value> {
        let mut clock = clock.unwrap_or_default();
        clock.increment(&self.node_id);
        let value = Value::new(data, clock, Utc::now());

        let entry = WalEntry {
            op: Op::Put,
            key: key.to_string(),
            value: value.clone(),
        };

        let mut map = self.data.write().await;
        self.wal.append(&entry).await?;
        map.insert(key.to_string(), value.clone());
        Ok(value)
    }

    /// The live value for `key`, or `None` if absent or tombstoned.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let map = self.data.read().await;
        map.get(key).filter(|v| !v.tombstone).cloned()
    }

    /// The value for `key` regardless of tombstone state — used for
    /// replication and read-repair, where the tombstone itself must
    /// propagate.
    pub async fn get_raw(&self, key: &str) -> Option<Value> {
        self.data.read().await.get(key).cloned()
    }

    /// Soft-delete `key`: copy its existing clock (or start empty), bump
    /// this node's counter, and WAL-append a tombstone `Value` before
    /// updating the map.
    pub async fn delete(&self, key: &str) -> DeltaResult<Value> {
        let mut map = self.data.write().await;
        let mut clock = map.get(key).map(|v| v.clock.clone()).unwrap_or_default();
        clock.increment(&self.node_id);
        let value = Value::tombstone(clock, Utc::now());

        let entry = WalEntry {
            op: Op::Delete,
            key: key.to_string(),
            value: value.clone(),
        };
        self.wal.append(&entry).await?;
        map.insert(key.to_string(), value.clone());
        Ok(value)
    }

    /// Apply a remotely-originated write, arbitrating against any existing
    /// value by vector clock. Returns whether the incoming value was
    /// accepted. Accepted writes are WAL-appended before the map update,
    /// same as a local write.
    pub async fn apply_remote(&self, key: &str, incoming: Value) -> DeltaResult<bool> {
        let mut map = self.data.write().await;
        let existing = map.get(key);

        let accept = match existing {
            None => true,
            Some(existing) => match VectorClock::compare(&incoming.clock, &existing.clock) {
                ClockOrdering::Before => false,
                ClockOrdering::After | ClockOrdering::Equal => true,
                ClockOrdering::Concurrent => incoming.updated_at > existing.updated_at,
            },
        };

        if !accept {
            return Ok(false);
        }

        let op = if incoming.tombstone { Op::Delete } else { Op::Put };
        let entry = WalEntry {
            op,
            key: key.to_string(),
            value: incoming.clone(),
        };
        self.wal.append(&entry).await?;
        map.insert(key.to_string(), incoming);
        Ok(true)
    }

    /// Non-tombstoned keys currently live.
    pub async fn keys(&self) -> Vec<String> {
        self.data
            .read()
            .await
            .iter()
            .filter(|(_, v)| !v.tombstone)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Number of entries currently tracked, tombstones included.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Whether the map currently holds no entries at all.
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    /// Copy the map under the shared lock, release it, write the snapshot
    /// atomically, then truncate the WAL. Snapshot-then-truncate is the
    /// only safe order: truncating first would lose any entry the
    /// snapshot write fails to capture.
    pub async fn snapshot(&self) -> DeltaResult<()> {
        let copy = self.data.read().await.clone();
        self.snapshots.save(&copy).await?;
        self.wal.truncate().await?;
        Ok(())
    }

    /// This node's id, as used to bump vector clocks on local writes.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// The data directory this store was opened against.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

fn apply_entry(data: &mut HashMap<String, Value>, entry: WalEntry) {
    match entry.op {
        Op::Put | Op::Delete => {
            data.insert(entry.key, entry.value);
        }
    }
}
