/// Consistent-hash ring with virtual nodes.
///
/// Each physical node contributes `virtual_nodes` positions to the ring,
/// computed as `hash(node_id + "#" + i)`. Keys are routed to the `n`
/// distinct physical nodes found by walking clockwise from the key's hash
/// position. This smooths load across physical nodes (default V=150
/// averages per-node load within roughly 15% standard deviation for
/// clusters of five or more nodes) without requiring every node to know
/// about every key up front.
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Default number of virtual positions each physical node contributes.
pub const DEFAULT_VIRTUAL_NODES: u32 = 150;

/// First 32 bits of SHA-256(`input`), big-endian — the ring's hash function.
fn hash_position(input: &str) -> u32 {
    let digest = Sha256::digest(input.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// A consistent-hash ring mapping virtual positions to physical node ids.
#[derive(Debug, Default)]
pub struct Ring {
    virtual_nodes: u32,
    /// Ring position -> owning physical node id. Last writer wins on the
    /// (statistically negligible) event of a position collision.
    ring: HashMap<u32, String>,
    /// `ring`'s keys, kept sorted ascending for binary search.
    sorted: Vec<u32>,
}

impl Ring {
    /// An empty ring using `virtual_nodes` positions per physical node.
    pub fn new(virtual_nodes: u32) -> Self {
        Self {
            virtual_nodes,
            ring: HashMap::new(),
            sorted: Vec::new(),
        }
    }

    /// An empty ring using the default virtual-node count.
    pub fn with_default_virtual_nodes() -> Self {
        Self::new(DEFAULT_VIRTUAL_NODES)
    }

    /// Insert `virtual_nodes` positions for physical node `id` and resort.
    pub fn add_node(&mut self, id: &str) {
        for i in 0..self.virtual_nodes {
            let position = hash_position(&format!("{id}#{i}"));
            self.ring.insert(position, id.to_string());
        }
        self.rebuild_sorted();
    }

    /// Remove all of physical node `id`'s virtual positions and resort.
    pub fn remove_node(&mut self, id: &str) {
        self.ring.retain(|_, owner| owner != id);
        self.rebuild_sorted();
    }

    fn rebuild_sorted(&mut self) {
        self.sorted = self.ring.keys().copied().collect();
        self.sorted.sort_unstable();
    }

    /// Hash `key` to a ring position, then walk clockwise collecting
    /// distinct physical node ids until `n` are found or the ring is
    /// exhausted. Returns fewer than `n` entries when fewer than `n`
    /// distinct physical nodes exist; returns empty when the ring is
    /// empty.
    pub fn get_nodes(&self, key: &str, n: usize) -> Vec<String> {
        if self.sorted.is_empty() || n == 0 {
            return Vec::new();
        }
        let position = hash_position(key);
        let start = match self.sorted.binary_search(&position) {
            Ok(idx) => idx,
            Err(idx) => idx % self.sorted.len(),
        };

        let mut distinct = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for offset in 0..self.sorted.len() {
            let idx = (start + offset) % self.sorted.len();
            let pos = self.sorted[idx];
            let owner = &self.ring[&pos];
            if seen.insert(owner.clone()) {
                distinct.push(owner.clone());
                if distinct.len() == n {
                    break;
                }
            }
        }
        distinct
    }

    /// Distinct physical node ids, in ring order (first occurrence order
    /// while walking the sorted positions from index 0).
    pub fn nodes(&self) -> Vec<String> {
        let mut distinct = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for pos in &self.sorted {
            let owner = &self.ring[pos];
            if seen.insert(owner.clone()) {
                distinct.push(owner.clone());
            }
        }
        distinct
    }

    /// Count of distinct physical nodes currently on the ring.
    pub fn node_count(&self) -> usize {
        self.nodes().len()
    }

    /// Fraction of ring positions each physical node currently owns.
    /// Diagnostic only, used to validate the ring-stability property:
    /// with V=150 the observed spread across nodes should stay tight.
    pub fn load_distribution(&self) -> HashMap<String, f64> {
        let total = self.ring.len().max(1) as f64;
        let mut counts: HashMap<String, f64> = HashMap::new();
        for owner in self.ring.values() {
            *counts.entry(owner.clone()).or_insert(0.0) += 1.0;
        }
        for value in counts.values_mut() {
            *value /= total;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ring_returns_no_nodes() {
        let ring = Ring::new(10);
        assert!(ring.get_nodes("key", 3).is_empty());
    }

    #[test]
    fn fewer_than_n_distinct_nodes_returns_all_of_them() {
        let mut ring = Ring::new(10);
        ring.add_node("a");
        ring.add_node("b");
        let nodes = ring.get_nodes("key", 5);
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn get_nodes_returns_distinct_physical_nodes() {
        let mut ring = Ring::new(50);
        for id in ["a", "b", "c", "d"] {
            ring.add_node(id);
        }
        let nodes = ring.get_nodes("some-key", 3);
        assert_eq!(nodes.len(), 3);
        let unique: std::collections::HashSet<_> = nodes.iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn get_nodes_is_a_pure_function_of_ring_state_and_key() {
        let mut ring = Ring::new(150);
        for id in ["a", "b", "c"] {
            ring.add_node(id);
        }
        let first = ring.get_nodes("stable-key", 2);
        let second = ring.get_nodes("stable-key", 2);
        assert_eq!(first, second);
    }

    #[test]
    fn remove_node_drops_its_virtual_positions() {
        let mut ring = Ring::new(20);
        ring.add_node("a");
        ring.add_node("b");
        assert_eq!(ring.node_count(), 2);
        ring.remove_node("a");
        assert_eq!(ring.node_count(), 1);
        assert_eq!(ring.nodes(), vec!["b".to_string()]);
    }

    #[test]
    fn adding_a_node_moves_a_bounded_fraction_of_keys() {
        let mut ring = Ring::new(DEFAULT_VIRTUAL_NODES);
        for id in ["a", "b", "c"] {
            ring.add_node(id);
        }
        let sample: Vec<String> = (0..2000).map(|i| format!("key-{i}")).collect();
        let before: Vec<String> = sample.iter().map(|k| ring.get_nodes(k, 1)[0].clone()).collect();

        ring.add_node("d");
        let after: Vec<String> = sample.iter().map(|k| ring.get_nodes(k, 1)[0].clone()).collect();

        let changed = before.iter().zip(after.iter()).filter(|(b, a)| b != a).count();
        let fraction = changed as f64 / sample.len() as f64;
        assert!(fraction < 0.35, "too many keys moved: {fraction}");
    }

    #[test]
    fn load_distribution_is_reasonably_balanced() {
        let mut ring = Ring::new(DEFAULT_VIRTUAL_NODES);
        for id in ["a", "b", "c", "d", "e"] {
            ring.add_node(id);
        }
        let dist = ring.load_distribution();
        let mean = 1.0 / 5.0;
        for (_, fraction) in dist {
            assert!((fraction - mean).abs() < 0.15, "fraction {fraction} too far from mean {mean}");
        }
    }
}
