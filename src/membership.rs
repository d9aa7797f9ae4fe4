/// Cluster membership: the node roster plus the consistent-hash ring that
/// routes keys to it.
///
/// Membership is static in the sense `spec.md` intends: nothing here
/// detects failures or gossips liveness. `join`/`leave` are explicit,
/// operator- or transport-driven calls; `is_alive` on a `Node` is never
/// flipped automatically — callers that layer liveness checks on top may
/// set it directly, and `replica_nodes` honors it by excluding any node
/// currently marked dead.
use crate::error::{DeltaError, DeltaResult};
use crate::ring::Ring;
use crate::types::Node;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Cluster roster and the ring derived from it.
pub struct Membership {
    nodes: RwLock<HashMap<String, Node>>,
    ring: RwLock<Ring>,
}

impl Membership {
    /// Seed membership from `nodes`, marking every one of them alive and
    /// inserting it into a fresh ring with `virtual_nodes` positions each.
    pub async fn new(nodes: Vec<Node>, virtual_nodes: u32) -> Self {
        let mut ring = Ring::new(virtual_nodes);
        let mut roster = HashMap::new();
        for mut node in nodes {
            node.is_alive = true;
            ring.add_node(&node.id);
            roster.insert(node.id.clone(), node);
        }
        Self {
            nodes: RwLock::new(roster),
            ring: RwLock::new(ring),
        }
    }

    /// Add `node` to the roster and the ring. Fails if `node.id` is
    /// already a member.
    pub async fn join(&self, node: Node) -> DeltaResult<()> {
        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(&node.id) {
            return Err(DeltaError::Membership(format!(
                "node '{}' is already a member",
                node.id
            )));
        }
        self.ring.write().await.add_node(&node.id);
        nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Remove `id` from the roster and the ring. Fails if `id` is unknown.
    pub async fn leave(&self, id: &str) -> DeltaResult<()> {
        let mut nodes = self.nodes.write().await;
        if nodes.remove(id).is_none() {
            return Err(DeltaError::Membership(format!("node '{id}' is not a member")));
        }
        self.ring.write().await.remove_node(id);
        Ok(())
    }

    /// A value-copy of the roster; callers cannot mutate internal state
    /// through it.
    pub async fn all(&self) -> Vec<Node> {
        self.nodes.read().await.values().cloned().collect()
    }

    /// Whether `id` is currently a member.
    pub async fn contains(&self, id: &str) -> bool {
        self.nodes.read().await.contains_key(id)
    }

    /// Number of distinct physical nodes on the ring (may lag the roster
    /// transiently only within the scope of a single `join`/`leave` call,
    /// which updates both under the same lock ordering).
    pub async fn live_count(&self) -> usize {
        self.ring.read().await.node_count()
    }

    /// Ask the ring for up to `n` replica ids for `key`, then resolve each
    /// to its `Node`, preserving ring order, keeping only nodes currently
    /// marked alive (§4.6: "the corresponding live Node objects").
    pub async fn replica_nodes(&self, key: &str, n: usize) -> Vec<Node> {
        let ids = self.ring.read().await.get_nodes(key, n);
        let nodes = self.nodes.read().await;
        ids.into_iter()
            .filter_map(|id| nodes.get(&id).cloned())
            .filter(|node| node.is_alive)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> Node {
        Node::new(id, format!("{id}.local:7000"))
    }

    #[tokio::test]
    async fn seeded_nodes_are_alive_and_on_the_ring() {
        let membership = Membership::new(vec![node("a"), node("b")], 50).await;
        let all = membership.all().await;
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|n| n.is_alive));
        assert_eq!(membership.live_count().await, 2);
    }

    #[tokio::test]
    async fn join_rejects_duplicate_id() {
        let membership = Membership::new(vec![node("a")], 50).await;
        let err = membership.join(node("a")).await.unwrap_err();
        assert!(matches!(err, DeltaError::Membership(_)));
    }

    #[tokio::test]
    async fn leave_rejects_unknown_id() {
        let membership = Membership::new(vec![node("a")], 50).await;
        let err = membership.leave("ghost").await.unwrap_err();
        assert!(matches!(err, DeltaError::Membership(_)));
    }

    #[tokio::test]
    async fn join_then_leave_round_trips_membership_and_ring() {
        let membership = Membership::new(vec![node("a")], 50).await;
        membership.join(node("b")).await.unwrap();
        assert_eq!(membership.live_count().await, 2);

        membership.leave("b").await.unwrap();
        assert_eq!(membership.live_count().await, 1);
        assert!(!membership.contains("b").await);
    }

    #[tokio::test]
    async fn replica_nodes_resolves_ring_ids_to_node_objects() {
        let membership = Membership::new(vec![node("a"), node("b"), node("c")], 100).await;
        let replicas = membership.replica_nodes("some-key", 2).await;
        assert_eq!(replicas.len(), 2);
        for replica in replicas {
            assert!(replica.address.ends_with(":7000"));
        }
    }
}
