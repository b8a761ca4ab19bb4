//! Static shard→owner routing.
//!
//! Ownership is `nodes[shard_id % node_count]`: deterministic, pure, and
//! independent of the index name, so all indices share the same assignment
//! across peers. With the node list fixed at startup, placement is stable
//! for the cluster's lifetime.

use super::types::Node;

/// The local node's view of the cluster: its own identity plus the ordered,
/// immutable peer list.
pub struct Cluster {
    pub self_id: String,
    pub nodes: Vec<Node>,
}

impl Cluster {
    /// Builds the cluster from peer entries in `id=host:port` form.
    ///
    /// Entries that do not parse are skipped. The local node is always part
    /// of the list: if the configuration omits it, it is appended with
    /// `self_addr`, so a degenerate configuration can never produce an empty
    /// search fan-out.
    pub fn new(self_id: impl Into<String>, self_addr: impl Into<String>, peers: &[String]) -> Cluster {
        let self_id = self_id.into();
        let mut nodes = Vec::new();
        for peer in peers {
            match peer.split_once('=') {
                Some((id, addr)) if !id.is_empty() && !addr.is_empty() => {
                    nodes.push(Node::new(id, addr));
                }
                _ => {
                    tracing::warn!("Ignoring malformed peer entry {:?}", peer);
                }
            }
        }
        if !nodes.iter().any(|n| n.id == self_id) {
            nodes.push(Node::new(self_id.clone(), self_addr));
        }
        Cluster { self_id, nodes }
    }

    /// The node that owns `shard_id`.
    ///
    /// The assignment ignores which index the shard belongs to; every index
    /// distributes its shards over the peers the same way.
    pub fn shard_owner(&self, shard_id: u32) -> &Node {
        let idx = shard_id as usize % self.nodes.len();
        &self.nodes[idx]
    }

    pub fn is_local(&self, node: &Node) -> bool {
        node.id == self.self_id
    }

    pub fn node_by_id(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn local_node(&self) -> &Node {
        self.nodes
            .iter()
            .find(|n| n.id == self.self_id)
            .expect("local node is always present in the cluster list")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_assignment_is_deterministic() {
        let peers = vec![
            "n1=127.0.0.1:9001".to_string(),
            "n2=127.0.0.1:9002".to_string(),
            "n3=127.0.0.1:9003".to_string(),
        ];
        let cluster = Cluster::new("n1", "127.0.0.1:9001", &peers);

        for shard in 0..12u32 {
            let first = cluster.shard_owner(shard).id.clone();
            let second = cluster.shard_owner(shard).id.clone();
            assert_eq!(first, second);
        }
        assert_eq!(cluster.shard_owner(0).id, "n1");
        assert_eq!(cluster.shard_owner(1).id, "n2");
        assert_eq!(cluster.shard_owner(2).id, "n3");
        assert_eq!(cluster.shard_owner(3).id, "n1");
    }

    #[test]
    fn self_is_appended_when_missing_from_peers() {
        let cluster = Cluster::new("solo", "127.0.0.1:9000", &[]);
        assert_eq!(cluster.nodes.len(), 1);
        assert_eq!(cluster.local_node().addr, "127.0.0.1:9000");
        assert_eq!(cluster.shard_owner(7).id, "solo");
    }

    #[test]
    fn malformed_peer_entries_are_skipped() {
        let peers = vec![
            "n1=127.0.0.1:9001".to_string(),
            "garbage".to_string(),
            "=127.0.0.1:9002".to_string(),
        ];
        let cluster = Cluster::new("n1", "127.0.0.1:9001", &peers);
        assert_eq!(cluster.nodes.len(), 1);
        assert_eq!(cluster.nodes[0].id, "n1");
    }

    #[test]
    fn is_local_compares_ids_only() {
        let peers = vec![
            "n1=127.0.0.1:9001".to_string(),
            "n2=127.0.0.1:9002".to_string(),
        ];
        let cluster = Cluster::new("n2", "127.0.0.1:9002", &peers);

        assert!(cluster.is_local(&Node::new("n2", "somewhere-else:1")));
        assert!(!cluster.is_local(&Node::new("n1", "127.0.0.1:9001")));
    }

    #[test]
    fn node_lookup_by_id() {
        let peers = vec![
            "n1=127.0.0.1:9001".to_string(),
            "n2=127.0.0.1:9002".to_string(),
        ];
        let cluster = Cluster::new("n1", "127.0.0.1:9001", &peers);
        assert_eq!(cluster.node_by_id("n2").unwrap().addr, "127.0.0.1:9002");
        assert!(cluster.node_by_id("n9").is_none());
    }
}
