//! # delta-kv
//!
//! A replicated key-value store: consistent-hash routing, vector-clock
//! reconciliation, WAL + snapshot durability, and quorum reads/writes
//! over an explicit peer transport.
//!
//! ## Quick start (single node, standalone quorum)
//!
//! ```ignore
//! use delta_kv::{Membership, NodeConfig, Node, Replicator, Store, Transport};
//! use delta_kv::transport::InMemoryTransport;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> delta_kv::DeltaResult<()> {
//!     let config = NodeConfig::standalone("n1", "127.0.0.1:7000", "./data/n1");
//!     let store = Arc::new(Store::open(&config.data_dir, &config.node_id).await?);
//!     let membership = Arc::new(Membership::new(vec![Node::new(&config.node_id, &config.listen_address)], config.virtual_nodes).await);
//!     let transport = Arc::new(InMemoryTransport::new());
//!     transport.register(&config.node_id, Arc::clone(&store)).await;
//!
//!     let replicator = Replicator::new(&config.node_id, config.n, config.w, config.r, store, membership, transport).await?;
//!     replicator.replicate_write("users/alice", "{\"name\":\"Alice\"}".to_string(), None).await?;
//!     let value = replicator.coordinate_read("users/alice").await?;
//!     println!("{:?}", value);
//!     Ok(())
//! }
//! ```
//!
//! ## Module map
//!
//! - [`types`] — `Value`, `VectorClock`, `Node`
//! - [`wal`] — write-ahead log with checksummed entries
//! - [`snapshot`] — atomic snapshot persistence
//! - [`store`] — the single-node storage engine tying WAL + snapshot + map together
//! - [`ring`] — consistent-hash ring with virtual nodes
//! - [`membership`] — cluster roster and ring lifecycle
//! - [`transport`] — the peer wire protocol (in-memory and TCP)
//! - [`replicator`] — quorum coordination, reconciliation, read-repair
//! - [`supervisor`] — snapshot cadence and graceful shutdown
//! - [`config`] — node configuration and validation
//! - [`error`] — the crate's error type
//!
//! Call [`init_logging`] once at process startup to get formatted
//! `tracing` output; the crate itself never installs a subscriber.

pub mod config;
pub mod error;
pub mod membership;
pub mod replicator;
pub mod ring;
pub mod snapshot;
pub mod store;
pub mod supervisor;
pub mod transport;
pub mod types;
pub mod wal;

pub use config::{NodeConfig, PeerConfig};
pub use error::{DeltaError, DeltaResult};
pub use membership::Membership;
pub use replicator::Replicator;
pub use ring::Ring;
pub use snapshot::SnapshotStore;
pub use store::Store;
pub use supervisor::Supervisor;
pub use transport::{InMemoryTransport, TcpTransport, Transport};
pub use types::{ClockOrdering, Node, Value, VectorClock};
pub use wal::{Op, WalEntry, WriteAheadLog};

/// Install a `tracing` subscriber reading its level from `DELTA_KV_LOG`
/// (defaulting to `info`), writing formatted events to stdout without the
/// target module path. Supervisors and embedding processes call this once
/// at startup; the crate itself never initializes a subscriber on its own,
/// since a library should not install global state a host process hasn't
/// asked for.
#[cfg(not(target_arch = "wasm32"))]
pub fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("DELTA_KV_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
