/// The transport contract the replicator depends on, plus two
/// implementations: an in-process loopback transport for tests, and a
/// minimal length-prefixed JSON-over-TCP transport for real clusters.
///
/// `spec.md` is explicit that HTTP handler/middleware wiring, flag/config
/// loading, and the CLI front-end are external collaborators this crate
/// does not design. What it does own is the RPC *contract* — `replicate`
/// and `fetch` — and a reference wire encoding for it, grounded in the
/// teacher's length-prefixed JSON `Connection` type.
use crate::error::{DeltaError, DeltaResult};
use crate::types::Value;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Maximum wire message size (16 MB) — guards against a corrupt or
/// malicious length header triggering an unbounded allocation.
const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// The two peer RPCs the replicator requires of a transport.
///
/// `replicate` has the effect of `Store::apply_remote`: the peer durably
/// writes the accepted update, or deterministically discards an older
/// one, and reports nothing further on success. `fetch` returns the raw
/// value (tombstones included) or a not-found outcome, never both a
/// value and an error.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Ask `peer` to apply `value` at `key`, as `Store::apply_remote` would.
    async fn replicate(&self, peer: &str, key: &str, value: Value) -> DeltaResult<()>;

    /// Ask `peer` for the raw value at `key`. `Ok(None)` means not-found,
    /// which is distinct from `Err`.
    async fn fetch(&self, peer: &str, key: &str) -> DeltaResult<Option<Value>>;
}

/// An in-process transport that routes `replicate`/`fetch` directly to
/// other nodes' `Store` handles. Used for tests and single-process
/// multi-node simulations — no sockets, no serialization.
#[derive(Default)]
pub struct InMemoryTransport {
    stores: RwLock<HashMap<String, std::sync::Arc<crate::store::Store>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `store` as reachable under `node_id`.
    pub async fn register(&self, node_id: impl Into<String>, store: std::sync::Arc<crate::store::Store>) {
        self.stores.write().await.insert(node_id.into(), store);
    }

    /// Remove a previously registered node, simulating it becoming
    /// unreachable.
    pub async fn unregister(&self, node_id: &str) {
        self.stores.write().await.remove(node_id);
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn replicate(&self, peer: &str, key: &str, value: Value) -> DeltaResult<()> {
        let stores = self.stores.read().await;
        let store = stores.get(peer).ok_or_else(|| DeltaError::PeerTransport {
            peer: peer.to_string(),
            attempts: 1,
            reason: "peer unreachable".to_string(),
        })?;
        store.apply_remote(key, value).await?;
        Ok(())
    }

    async fn fetch(&self, peer: &str, key: &str) -> DeltaResult<Option<Value>> {
        let stores = self.stores.read().await;
        let store = stores.get(peer).ok_or_else(|| DeltaError::PeerTransport {
            peer: peer.to_string(),
            attempts: 1,
            reason: "peer unreachable".to_string(),
        })?;
        Ok(store.get_raw(key).await)
    }
}

/// Wire messages for the TCP transport: a request/response pair per RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum WireMessage {
    ReplicateRequest { key: String, value: Value },
    ReplicateAck,
    FetchRequest { key: String },
    FetchResponse { value: Option<Value> },
    Error { message: String },
}

impl WireMessage {
    fn to_bytes(&self) -> DeltaResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn from_bytes(bytes: &[u8]) -> DeltaResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// One length-prefixed JSON connection: a 4-byte big-endian length header
/// followed by the JSON payload.
struct Connection {
    stream: TcpStream,
}

impl Connection {
    async fn connect(addr: &str) -> DeltaResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| DeltaError::PeerTransport {
                peer: addr.to_string(),
                attempts: 1,
                reason: format!("connect failed: {e}"),
            })?;
        Ok(Self { stream })
    }

    async fn send(&mut self, message: &WireMessage) -> DeltaResult<()> {
        let bytes = message.to_bytes()?;
        if bytes.len() as u32 > MAX_MESSAGE_SIZE {
            return Err(DeltaError::Durability("message exceeds max size".to_string()));
        }
        self.stream.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> DeltaResult<WireMessage> {
        let mut len_bytes = [0u8; 4];
        self.stream.read_exact(&mut len_bytes).await?;
        let len = u32::from_be_bytes(len_bytes);
        if len > MAX_MESSAGE_SIZE {
            return Err(DeltaError::Durability("incoming message exceeds max size".to_string()));
        }
        let mut bytes = vec![0u8; len as usize];
        self.stream.read_exact(&mut bytes).await?;
        WireMessage::from_bytes(&bytes)
    }
}

/// Per-peer timeout applied to every request this transport sends.
/// Retries and overall operation deadlines live in the replicator, not
/// here — this transport only ever makes a single attempt.
const DEFAULT_PEER_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(3);

/// Minimal TCP transport: peer id -> socket address, one connection per
/// request. Reconnecting per request keeps this transport stateless and
/// simple to reason about; a production deployment would pool
/// connections, which is the kind of wiring concern `spec.md` leaves to
/// the external transport layer.
pub struct TcpTransport {
    addresses: HashMap<String, SocketAddr>,
    peer_timeout: std::time::Duration,
}

impl TcpTransport {
    pub fn new(addresses: HashMap<String, SocketAddr>) -> Self {
        Self {
            addresses,
            peer_timeout: DEFAULT_PEER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.peer_timeout = timeout;
        self
    }

    async fn request(&self, peer: &str, message: WireMessage) -> DeltaResult<WireMessage> {
        let addr = self
            .addresses
            .get(peer)
            .ok_or_else(|| DeltaError::PeerTransport {
                peer: peer.to_string(),
                attempts: 1,
                reason: "unknown peer address".to_string(),
            })?;

        let fut = async {
            let mut conn = Connection::connect(&addr.to_string()).await?;
            conn.send(&message).await?;
            conn.receive().await
        };

        match tokio::time::timeout(self.peer_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(DeltaError::PeerTransport {
                peer: peer.to_string(),
                attempts: 1,
                reason: "timed out".to_string(),
            }),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn replicate(&self, peer: &str, key: &str, value: Value) -> DeltaResult<()> {
        let response = self
            .request(
                peer,
                WireMessage::ReplicateRequest {
                    key: key.to_string(),
                    value,
                },
            )
            .await?;
        match response {
            WireMessage::ReplicateAck => Ok(()),
            WireMessage::Error { message } => Err(DeltaError::PeerTransport {
                peer: peer.to_string(),
                attempts: 1,
                reason: message,
            }),
            _ => Err(DeltaError::PeerTransport {
                peer: peer.to_string(),
                attempts: 1,
                reason: "unexpected response to replicate".to_string(),
            }),
        }
    }

    async fn fetch(&self, peer: &str, key: &str) -> DeltaResult<Option<Value>> {
        let response = self
            .request(peer, WireMessage::FetchRequest { key: key.to_string() })
            .await?;
        match response {
            WireMessage::FetchResponse { value } => Ok(value),
            WireMessage::Error { message } => Err(DeltaError::PeerTransport {
                peer: peer.to_string(),
                attempts: 1,
                reason: message,
            }),
            _ => Err(DeltaError::PeerTransport {
                peer: peer.to_string(),
                attempts: 1,
                reason: "unexpected response to fetch".to_string(),
            }),
        }
    }
}

/// Serve incoming `TcpTransport` requests against `store`, handling one
/// connection per accepted socket until it closes. This is the server
/// half of the contract; wiring it into a long-running process (signal
/// handling, concurrent accept loops, config-driven bind address) is the
/// supervisor's and the external process harness's job, not this
/// function's.
pub async fn serve(listener: TcpListener, store: std::sync::Arc<crate::store::Store>) -> DeltaResult<()> {
    loop {
        let (stream, _peer_addr) = listener.accept().await?;
        let store = std::sync::Arc::clone(&store);
        tokio::spawn(async move {
            let mut conn = Connection { stream };
            loop {
                let message = match conn.receive().await {
                    Ok(m) => m,
                    Err(_) => break,
                };
                let response = match message {
                    WireMessage::ReplicateRequest { key, value } => {
                        match store.apply_remote(&key, value).await {
                            Ok(_) => WireMessage::ReplicateAck,
                            Err(e) => WireMessage::Error { message: e.to_string() },
                        }
                    }
                    WireMessage::FetchRequest { key } => {
                        WireMessage::FetchResponse { value: store.get_raw(&key).await }
                    }
                    other => WireMessage::Error {
                        message: format!("unexpected request: {other:?}"),
                    },
                };
                if conn.send(&response).await.is_err() {
                    break;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn in_memory_transport_replicates_and_fetches() {
        let dir_a = tempdir().unwrap();
        let dir_b = tempdir().unwrap();
        let store_a = Arc::new(Store::open(dir_a.path(), "a").await.unwrap());
        let store_b = Arc::new(Store::open(dir_b.path(), "b").await.unwrap());

        let transport = InMemoryTransport::new();
        transport.register("a", Arc::clone(&store_a)).await;
        transport.register("b", Arc::clone(&store_b)).await;

        let value = store_a.put("k", "v".to_string(), None).await.unwrap();
        transport.replicate("b", "k", value.clone()).await.unwrap();

        let fetched = transport.fetch("b", "k").await.unwrap().unwrap();
        assert_eq!(fetched.data, "v");
    }

    #[tokio::test]
    async fn in_memory_transport_errors_on_unregistered_peer() {
        let transport = InMemoryTransport::new();
        let err = transport.fetch("ghost", "k").await.unwrap_err();
        assert!(matches!(err, DeltaError::PeerTransport { .. }));
    }

    #[tokio::test]
    async fn tcp_transport_round_trips_replicate_and_fetch() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path(), "server").await.unwrap());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, Arc::clone(&store)));

        let mut addresses = HashMap::new();
        addresses.insert("server".to_string(), addr);
        let transport = TcpTransport::new(addresses);

        let mut clock = crate::types::VectorClock::new();
        clock.increment("client");
        let value = crate::types::Value::new("hi".to_string(), clock, chrono::Utc::now());
        transport.replicate("server", "k", value.clone()).await.unwrap();

        let fetched = transport.fetch("server", "k").await.unwrap().unwrap();
        assert_eq!(fetched.data, "hi");
    }

    #[tokio::test]
    async fn tcp_transport_errors_on_unknown_peer() {
        let transport = TcpTransport::new(HashMap::new());
        let err = transport.fetch("nowhere", "k").await.unwrap_err();
        assert!(matches!(err, DeltaError::PeerTransport { .. }));
    }
}
