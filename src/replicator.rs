/// The coordinator/replicator: quorum reads and writes, reconciliation,
/// async read-repair, tombstoned deletes, and retry with backoff.
///
/// This is the central algorithm in the spec. A `Replicator` holds no
/// state of its own beyond its quorum parameters, the transport, and
/// references to the local `Store` and `Membership` — every other piece
/// of state (peer acks, reconciliation candidates) lives in the local,
/// task-scoped containers of whichever call is in flight.
use crate::error::{DeltaError, DeltaResult};
use crate::membership::Membership;
use crate::store::Store;
use crate::transport::Transport;
use crate::types::{ClockOrdering, Value, VectorClock};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

/// Per-peer transport timeout (§4.7.5 default).
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(3);
/// Overall read/write operation deadline (§4.7.1/§4.7.2 default).
pub const DEFAULT_OPERATION_DEADLINE: Duration = Duration::from_secs(5);
/// Maximum attempts per peer send before giving up (§4.7.5).
const MAX_ATTEMPTS: u32 = 3;

/// Cap `n`/`w`/`r` to the live cluster size and check `w + r > n` still
/// holds. Returns the (possibly capped) triple, or a fatal configuration
/// error if the invariant cannot be preserved.
pub fn cap_quorum(n: usize, w: usize, r: usize, live_count: usize) -> DeltaResult<(usize, usize, usize)> {
    let capped_n = n.min(live_count.max(1));
    let capped_w = w.min(capped_n);
    let capped_r = r.min(capped_n);
    if capped_w + capped_r <= capped_n {
        return Err(DeltaError::ConfigFatal(format!(
            "W + R must exceed N after capping to live cluster size {live_count}: got N={capped_n}, W={capped_w}, R={capped_r}"
        )));
    }
    Ok((capped_n, capped_w, capped_r))
}

/// Run `attempt` up to `MAX_ATTEMPTS` times, each bounded by `peer_timeout`,
/// sleeping `100ms * 2^(attempt-1)` plus a small jitter between tries. The
/// final failure reports the attempt count, per §4.7.5.
async fn call_with_retry<F, Fut, T>(peer: &str, peer_timeout: Duration, mut attempt: F) -> DeltaResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DeltaResult<T>>,
{
    let mut last_reason = String::from("no attempts made");
    for n in 1..=MAX_ATTEMPTS {
        match timeout(peer_timeout, attempt()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => last_reason = e.to_string(),
            Err(_) => last_reason = "per-peer timeout".to_string(),
        }
        if n < MAX_ATTEMPTS {
            let base_ms = 100u64 * 2u64.pow(n - 1);
            let jitter_ms = rand::thread_rng().gen_range(0..=20);
            sleep(Duration::from_millis(base_ms + jitter_ms)).await;
        }
    }
    Err(DeltaError::PeerTransport {
        peer: peer.to_string(),
        attempts: MAX_ATTEMPTS,
        reason: last_reason,
    })
}

/// The coordinator for Put/Get/Delete, implementing quorum fan-out,
/// reconciliation, read-repair, and retry/backoff against peers.
pub struct Replicator {
    self_id: String,
    store: Arc<Store>,
    membership: Arc<Membership>,
    transport: Arc<dyn Transport>,
    n: usize,
    w: usize,
    r: usize,
    peer_timeout: Duration,
    operation_deadline: Duration,
    /// §4.7.3's open question: await all peers (the spec's primary choice,
    /// `false`) or just `W` (the documented alternative, `true`).
    wait_for_quorum_on_delete: bool,
}

impl Replicator {
    /// Validate and cap `n`/`w`/`r` against the live cluster size, then
    /// build a `Replicator`. Fails fatally if the quorum invariant cannot
    /// be preserved even after capping.
    pub async fn new(
        self_id: impl Into<String>,
        n: usize,
        w: usize,
        r: usize,
        store: Arc<Store>,
        membership: Arc<Membership>,
        transport: Arc<dyn Transport>,
    ) -> DeltaResult<Self> {
        let live = membership.live_count().await;
        let (n, w, r) = cap_quorum(n, w, r, live)?;
        Ok(Self {
            self_id: self_id.into(),
            store,
            membership,
            transport,
            n,
            w,
            r,
            peer_timeout: DEFAULT_PEER_TIMEOUT,
            operation_deadline: DEFAULT_OPERATION_DEADLINE,
            wait_for_quorum_on_delete: false,
        })
    }

    /// Override the per-peer and overall-operation timeouts (defaults:
    /// 3s/5s).
    pub fn with_timeouts(mut self, peer_timeout: Duration, operation_deadline: Duration) -> Self {
        self.peer_timeout = peer_timeout;
        self.operation_deadline = operation_deadline;
        self
    }

    /// Choose the delete path's peer-wait policy: `true` to require only
    /// `W` acks (an alternative this crate documents but does not default
    /// to), `false` (default) to await all peers as §4.7.3 prescribes.
    pub fn with_quorum_delete(mut self, enabled: bool) -> Self {
        self.wait_for_quorum_on_delete = enabled;
        self
    }

    async fn peers_for(&self, key: &str) -> Vec<String> {
        self.membership
            .replica_nodes(key, self.n)
            .await
            .into_iter()
            .map(|node| node.id)
            .filter(|id| id != &self.self_id)
            .collect()
    }

    /// §4.7.1: apply locally, fan out to peers in parallel, and succeed as
    /// soon as `W` acknowledgments (self included) are collected or the
    /// overall deadline elapses with quorum already met. Extra acks beyond
    /// `W` keep going in the background; their failures are never
    /// reported to the caller.
    pub async fn replicate_write(&self, key: &str, data: String, clock: Option<VectorClock>) -> DeltaResult<Value> {
        let value = self.store.put(key, data, clock).await?;
        let peers = self.peers_for(key).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        for peer in peers {
            let transport = Arc::clone(&self.transport);
            let key = key.to_string();
            let value = value.clone();
            let tx = tx.clone();
            let peer_timeout = self.peer_timeout;
            tokio::spawn(async move {
                let peer_for_log = peer.clone();
                let result = call_with_retry(&peer, peer_timeout, || {
                    let transport = Arc::clone(&transport);
                    let peer = peer.clone();
                    let key = key.clone();
                    let value = value.clone();
                    async move { transport.replicate(&peer, &key, value).await }
                })
                .await;
                let _ = tx.send((peer_for_log, result));
            });
        }
        drop(tx);

        let mut acked = 1usize; // local write counts as one ack.
        let mut peer_errors = Vec::new();
        let deadline = sleep(self.operation_deadline);
        tokio::pin!(deadline);

        loop {
            if acked >= self.w {
                return Ok(value);
            }
            tokio::select! {
                received = rx.recv() => {
                    match received {
                        Some((_peer, Ok(()))) => acked += 1,
                        Some((peer, Err(e))) => peer_errors.push(format!("{peer}: {e}")),
                        None => break,
                    }
                }
                _ = &mut deadline => break,
            }
        }

        if acked >= self.w {
            Ok(value)
        } else {
            Err(DeltaError::QuorumTimeout {
                acked,
                required: self.w,
                peer_errors,
            })
        }
    }

    /// §4.7.2: fan out raw fetches (local via `Store::get_raw`, remote via
    /// the transport), collect until `R` responses arrive or the deadline
    /// elapses, reconcile, and return the winner — launching best-effort
    /// read-repair against any replicas found stale.
    pub async fn coordinate_read(&self, key: &str) -> DeltaResult<Option<Value>> {
        let replicas = self.membership.replica_nodes(key, self.n).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        for node in &replicas {
            let tx = tx.clone();
            if node.id == self.self_id {
                let store = Arc::clone(&self.store);
                let key = key.to_string();
                let node_id = node.id.clone();
                tokio::spawn(async move {
                    let value = store.get_raw(&key).await;
                    let _ = tx.send((node_id, Ok(value)));
                });
            } else {
                let transport = Arc::clone(&self.transport);
                let key = key.to_string();
                let node_id = node.id.clone();
                let peer_timeout = self.peer_timeout;
                tokio::spawn(async move {
                    let result = call_with_retry(&node_id, peer_timeout, || {
                        let transport = Arc::clone(&transport);
                        let node_id = node_id.clone();
                        let key = key.clone();
                        async move { transport.fetch(&node_id, &key).await }
                    })
                    .await;
                    let _ = tx.send((node_id, result));
                });
            }
        }
        drop(tx);

        let mut responses: Vec<(String, Value)> = Vec::new();
        let mut null_nodes: Vec<String> = Vec::new();
        let mut arrived = 0usize;
        let mut peer_errors = Vec::new();
        let deadline = sleep(self.operation_deadline);
        tokio::pin!(deadline);

        // Only a value or an explicit not-found counts toward R: a node
        // that is actually down must not let a fast transport error stand
        // in for a quorum member, or reconciliation could run over a
        // subset that is missing the latest durable write.
        loop {
            if arrived >= self.r {
                break;
            }
            tokio::select! {
                received = rx.recv() => {
                    match received {
                        Some((node_id, Ok(Some(value)))) => {
                            responses.push((node_id, value));
                            arrived += 1;
                        }
                        Some((node_id, Ok(None))) => {
                            null_nodes.push(node_id);
                            arrived += 1;
                        }
                        Some((node_id, Err(e))) => {
                            peer_errors.push(format!("{node_id}: {e}"));
                        }
                        None => break,
                    }
                }
                _ = &mut deadline => break,
            }
        }

        if arrived < self.r {
            return Err(DeltaError::QuorumTimeout {
                acked: arrived,
                required: self.r,
                peer_errors,
            });
        }

        let (winner, mut stale_nodes) = reconcile(responses);

        let (winner_node, winner_value) = match winner {
            None => return Ok(None),
            Some(pair) => pair,
        };

        if winner_value.tombstone {
            return Ok(None);
        }

        // A replica that reported not-found is just as stale as one
        // holding an older value once a live winner exists — it holds
        // nothing at all, so it needs the winner written to it too.
        stale_nodes.extend(null_nodes);

        self.spawn_read_repair(key, winner_value.clone(), stale_nodes, winner_node);
        Ok(Some(winner_value))
    }

    fn spawn_read_repair(&self, key: &str, winner: Value, stale_nodes: Vec<String>, winner_node: String) {
        let key = key.to_string();
        let transport = Arc::clone(&self.transport);
        let self_id = self.self_id.clone();
        tokio::spawn(async move {
            for node_id in stale_nodes {
                if node_id == winner_node || node_id == self_id {
                    continue;
                }
                // Best-effort: failures are swallowed per §4.7.2 step 6.
                let _ = transport.replicate(&node_id, &key, winner.clone()).await;
            }
        });
    }

    /// §4.7.3: tombstone locally, then fan the tombstone out to all peers.
    /// By default this awaits every peer (not just `W`) before returning,
    /// so callers see a strong attempt at propagation; individual peer
    /// failures never fail the operation — read-repair and retries are
    /// expected to heal them. `with_quorum_delete(true)` switches to
    /// waiting for only `W` acks instead.
    pub async fn delete_replicated(&self, key: &str) -> DeltaResult<()> {
        let tombstone = self.store.delete(key).await?;
        let peers = self.peers_for(key).await;

        if self.wait_for_quorum_on_delete {
            return self.await_write_quorum(key, tombstone, peers).await;
        }

        let mut handles = Vec::with_capacity(peers.len());
        for peer in peers {
            let transport = Arc::clone(&self.transport);
            let key = key.to_string();
            let value = tombstone.clone();
            let peer_timeout = self.peer_timeout;
            handles.push(tokio::spawn(async move {
                let _ = call_with_retry(&peer, peer_timeout, || {
                    let transport = Arc::clone(&transport);
                    let peer = peer.clone();
                    let key = key.clone();
                    let value = value.clone();
                    async move { transport.replicate(&peer, &key, value).await }
                })
                .await;
            }));
        }

        // Best-effort overall bound; individual peer failures never fail
        // the delete regardless of whether this deadline is hit.
        let _ = timeout(self.operation_deadline, futures::future::join_all(handles)).await;
        Ok(())
    }

    async fn await_write_quorum(&self, key: &str, value: Value, peers: Vec<String>) -> DeltaResult<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        for peer in peers {
            let transport = Arc::clone(&self.transport);
            let key = key.to_string();
            let value = value.clone();
            let tx = tx.clone();
            let peer_timeout = self.peer_timeout;
            tokio::spawn(async move {
                let result = call_with_retry(&peer, peer_timeout, || {
                    let transport = Arc::clone(&transport);
                    let peer = peer.clone();
                    let key = key.clone();
                    let value = value.clone();
                    async move { transport.replicate(&peer, &key, value).await }
                })
                .await;
                let _ = tx.send((peer, result));
            });
        }
        drop(tx);

        let mut acked = 1usize;
        let mut peer_errors = Vec::new();
        let deadline = sleep(self.operation_deadline);
        tokio::pin!(deadline);

        loop {
            if acked >= self.w {
                return Ok(());
            }
            tokio::select! {
                received = rx.recv() => {
                    match received {
                        Some((_peer, Ok(()))) => acked += 1,
                        Some((peer, Err(e))) => peer_errors.push(format!("{peer}: {e}")),
                        None => break,
                    }
                }
                _ = &mut deadline => break,
            }
        }

        if acked >= self.w {
            Ok(())
        } else {
            Err(DeltaError::QuorumTimeout {
                acked,
                required: self.w,
                peer_errors,
            })
        }
    }

    pub fn n(&self) -> usize {
        self.n
    }
    pub fn w(&self) -> usize {
        self.w
    }
    pub fn r(&self) -> usize {
        self.r
    }
}

/// §4.7.4: fold candidate `(node_id, value)` pairs into a winner plus the
/// list of node ids found stale along the way. The winner carries the
/// node id it came from so a later repair pass can skip re-sending to it;
/// a demoted former winner's node id is retained too (this crate's
/// resolution of the spec's open question on tracking it).
fn reconcile(candidates: Vec<(String, Value)>) -> (Option<(String, Value)>, Vec<String>) {
    let mut winner: Option<(String, Value)> = None;
    let mut stale = Vec::new();

    for (node_id, value) in candidates {
        match &winner {
            None => winner = Some((node_id, value)),
            Some((winner_node, winner_value)) => {
                match VectorClock::compare(&value.clock, &winner_value.clock) {
                    ClockOrdering::After => {
                        stale.push(winner_node.clone());
                        winner = Some((node_id, value));
                    }
                    ClockOrdering::Before => {
                        stale.push(node_id);
                    }
                    ClockOrdering::Equal => {}
                    ClockOrdering::Concurrent => {
                        use std::cmp::Ordering;
                        match value.updated_at.cmp(&winner_value.updated_at) {
                            Ordering::Greater => {
                                stale.push(winner_node.clone());
                                winner = Some((node_id, value));
                            }
                            Ordering::Less => stale.push(node_id),
                            // Identical wall-clock timestamps: break the tie by
                            // node id so reconciliation is deterministic and
                            // never flaps between two candidates (§9).
                            Ordering::Equal => {
                                if node_id < *winner_node {
                                    stale.push(winner_node.clone());
                                    winner = Some((node_id, value));
                                } else {
                                    stale.push(node_id);
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    (winner, stale)
}
