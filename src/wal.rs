/// Write-ahead log: the durable record written before any in-memory mutation.
///
/// Entries are newline-delimited JSON, one per line, each carrying a CRC32
/// checksum of its own body so that `read_all` can tell a truncated or
/// torn write (e.g. from a crash mid-`write_all`) from a genuine entry and
/// skip it rather than fail recovery outright — the skip-not-abort policy
/// this crate picked for the spec's open WAL-corruption question.
use crate::error::{DeltaError, DeltaResult};
use crate::types::Value;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

/// The mutating operation a WAL entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Put,
    Delete,
}

/// A single durable record: the operation and the `Value` to apply.
///
/// For `Delete`, `value` is the tombstone `Value` produced by the store,
/// not a bare key — replaying the WAL never needs to reconstruct a
/// tombstone from scratch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub op: Op,
    pub key: String,
    pub value: Value,
}

/// One line on disk: the entry plus a checksum of its JSON body.
#[derive(Serialize, Deserialize)]
struct Record {
    entry: WalEntry,
    checksum: String,
}

fn checksum_of(entry: &WalEntry) -> DeltaResult<String> {
    let body = serde_json::to_string(entry)?;
    Ok(format!("{:08x}", crc32fast::hash(body.as_bytes())))
}

/// Append-only, fsync-on-append log file with sequential replay.
///
/// Every append/readAll/truncate is serialized through `lock`: the store
/// additionally holds its own write lock while appending, but `lock` keeps
/// the WAL internally consistent even if it is ever driven from more than
/// one call site (e.g. a snapshot's truncate racing a direct `read_all`
/// during recovery tooling).
pub struct WriteAheadLog {
    path: PathBuf,
    lock: Mutex<File>,
}

impl WriteAheadLog {
    /// Open (creating if absent) the WAL file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> DeltaResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| DeltaError::Durability(format!("failed to open WAL {:?}: {e}", path)))?;
        Ok(Self {
            path,
            lock: Mutex::new(file),
        })
    }

    /// Serialize `entry`, append it, then force a durable flush before
    /// returning. Concurrent callers serialize on `lock`; the order
    /// appends land in equals the order in which the lock is acquired.
    pub async fn append(&self, entry: &WalEntry) -> DeltaResult<()> {
        let checksum = checksum_of(entry)?;
        let record = Record {
            entry: entry.clone(),
            checksum,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = self.lock.lock().await;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| DeltaError::Durability(format!("WAL write failed: {e}")))?;
        file.sync_data()
            .await
            .map_err(|e| DeltaError::Durability(format!("WAL fsync failed: {e}")))?;
        Ok(())
    }

    /// Seek to the start, scan line by line, and decode each non-empty
    /// line. A line whose checksum does not match its body — or that does
    /// not parse at all — is logged and skipped; replay continues with the
    /// next line rather than aborting.
    pub async fn read_all(&self) -> DeltaResult<Vec<WalEntry>> {
        let mut file = self.lock.lock().await;
        file.seek(std::io::SeekFrom::Start(0))
            .await
            .map_err(|e| DeltaError::Durability(format!("WAL seek failed: {e}")))?;

        let mut reader = BufReader::new(&mut *file);
        let mut entries = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = reader
                .read_line(&mut line)
                .await
                .map_err(|e| DeltaError::Durability(format!("WAL read failed: {e}")))?;
            if bytes_read == 0 {
                break;
            }
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Record>(trimmed) {
                Ok(record) => match checksum_of(&record.entry) {
                    Ok(expected) if expected == record.checksum => entries.push(record.entry),
                    _ => {
                        tracing::warn!(path = ?self.path, "skipping WAL line with bad checksum");
                    }
                },
                Err(_) => {
                    tracing::warn!(path = ?self.path, "skipping unparseable WAL line");
                }
            }
        }
        Ok(entries)
    }

    /// Reset the file to zero length and seek to the start. Callers must
    /// only do this after a snapshot has captured everything the WAL held
    /// — truncating earlier is a data-loss bug, not a WAL-layer concern.
    pub async fn truncate(&self) -> DeltaResult<()> {
        let mut file = self.lock.lock().await;
        file.set_len(0)
            .await
            .map_err(|e| DeltaError::Durability(format!("WAL truncate failed: {e}")))?;
        file.seek(std::io::SeekFrom::Start(0))
            .await
            .map_err(|e| DeltaError::Durability(format!("WAL seek failed: {e}")))?;
        Ok(())
    }

    /// Release the file handle. Subsequent operations on this handle are
    /// not valid after `close`; the store drops its `WriteAheadLog` here.
    pub async fn close(self) -> DeltaResult<()> {
        let mut file = self.lock.into_inner();
        file.flush()
            .await
            .map_err(|e| DeltaError::Durability(format!("WAL close flush failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VectorClock;
    use chrono::Utc;
    use tempfile::tempdir;

    fn entry(key: &str, data: &str) -> WalEntry {
        let mut clock = VectorClock::new();
        clock.increment("n1");
        WalEntry {
            op: Op::Put,
            key: key.to_string(),
            value: Value::new(data.to_string(), clock, Utc::now()),
        }
    }

    #[tokio::test]
    async fn append_then_read_all_round_trips_in_order() {
        let dir = tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path().join("wal.log")).await.unwrap();

        wal.append(&entry("a", "1")).await.unwrap();
        wal.append(&entry("a", "2")).await.unwrap();
        wal.append(&entry("b", "3")).await.unwrap();

        let entries = wal.read_all().await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].value.data, "1");
        assert_eq!(entries[1].value.data, "2");
        assert_eq!(entries[2].key, "b");
    }

    #[tokio::test]
    async fn truncate_empties_the_log() {
        let dir = tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path().join("wal.log")).await.unwrap();
        wal.append(&entry("a", "1")).await.unwrap();
        wal.truncate().await.unwrap();

        let entries = wal.read_all().await.unwrap();
        assert!(entries.is_empty());

        wal.append(&entry("b", "2")).await.unwrap();
        let entries = wal.read_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "b");
    }

    #[tokio::test]
    async fn corrupted_trailing_line_is_skipped_not_fatal() {
        use tokio::io::AsyncWriteExt as _;

        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let wal = WriteAheadLog::open(&path).await.unwrap();
        wal.append(&entry("a", "1")).await.unwrap();
        drop(wal);

        {
            let mut file = tokio::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .await
                .unwrap();
            file.write_all(b"{not json\n").await.unwrap();
        }

        let wal = WriteAheadLog::open(&path).await.unwrap();
        let entries = wal.read_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value.data, "1");
    }
}
