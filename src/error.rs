/// Error types for the store, ring, membership, and replicator.
///
/// All fallible operations return `Result<T, DeltaError>`. Not-found is
/// deliberately not a variant here: it is modeled as `Ok(None)` wherever a
/// key may legitimately be absent, per the spec's "distinct from error"
/// requirement for Get.
use thiserror::Error;

/// The main error type for cluster operations.
#[derive(Error, Debug)]
pub enum DeltaError {
    /// WAL append/flush or snapshot write failed. In-memory state is left
    /// unchanged when this is returned from a mutating `Store` operation.
    #[error("durability error: {0}")]
    Durability(String),

    /// Fewer than the required acknowledgments arrived within the
    /// operation deadline.
    #[error("quorum not met: {acked}/{required} acks within deadline ({} peer errors)", peer_errors.len())]
    QuorumTimeout {
        /// Acknowledgments actually collected (including self, where applicable).
        acked: usize,
        /// Acknowledgments required (W or R).
        required: usize,
        /// Errors observed from individual peers, for diagnostics.
        peer_errors: Vec<String>,
    },

    /// A single peer RPC failed (connection refused, timeout, decode
    /// failure, non-success response). Retried per the backoff policy;
    /// this variant is what a final failed attempt reports.
    #[error("peer '{peer}' transport error after {attempts} attempt(s): {reason}")]
    PeerTransport {
        /// The peer node id that failed to respond.
        peer: String,
        /// Number of attempts made before giving up.
        attempts: u32,
        /// Description of the underlying failure.
        reason: String,
    },

    /// `join` on an id already present, or `leave` on an unknown id.
    #[error("membership error: {0}")]
    Membership(String),

    /// Startup configuration cannot satisfy `W + R > N` even after capping
    /// to the live cluster size, or the data directory could not be
    /// opened. Fatal: the supervisor must not start.
    #[error("configuration error: {0}")]
    ConfigFatal(String),

    /// JSON encoding/decoding failure (WAL entries, snapshot file, wire
    /// messages).
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any I/O failure not otherwise classified above.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias used throughout the crate.
pub type DeltaResult<T> = Result<T, DeltaError>;
