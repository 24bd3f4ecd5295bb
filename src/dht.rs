//! The routing interface the announce layer consumes.
//! Non-goal: this crate does not implement Kademlia itself.
//!
//! Finding and ranking close nodes is delegated to whatever DHT
//! implementation is driving this crate. `InMemoryDht` is a minimal XOR-sorted
//! test double, not a routing table with buckets, refresh, or NAT punching.

use crate::crypto::Epk;
use crate::node::Node;

/// Routing lookups the announce/groupchat layers need from a DHT.
pub trait Dht: Send + Sync {
    /// Up to `count` nodes closest to `target`, closest first.
    fn get_close_nodes(&self, target: &Epk, count: usize) -> Vec<Node>;

    /// Whether `candidate` is closer to `target` than every node already in
    /// `current`, used to decide if a sent-nodes reply is worth keeping.
    fn id_closest(&self, target: &Epk, candidate: &Epk, current: &[Epk]) -> bool {
        current.iter().all(|other| candidate.closer_than(target, other) || candidate == other)
    }
}

/// A flat, unsorted node list ranked by XOR distance on each query. Good
/// enough for tests and for a single-process demo; a real deployment wires in
/// an actual Kademlia implementation behind this trait.
#[derive(Debug, Default)]
pub struct InMemoryDht {
    nodes: Vec<Node>,
}

impl InMemoryDht {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: Node) {
        if let Some(existing) = self.nodes.iter_mut().find(|n| n.epk == node.epk) {
            *existing = node;
        } else {
            self.nodes.push(node);
        }
    }

    pub fn remove(&mut self, epk: &Epk) {
        self.nodes.retain(|n| &n.epk != epk);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Dht for InMemoryDht {
    fn get_close_nodes(&self, target: &Epk, count: usize) -> Vec<Node> {
        let mut sorted = self.nodes.clone();
        sorted.sort_by_key(|n| n.epk.xor_distance(target));
        sorted.truncate(count);
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EPK_SIZE;
    use crate::node::IpPort;

    fn node(seed: u8) -> Node {
        let mut bytes = [0u8; EPK_SIZE];
        bytes[0] = seed;
        Node {
            epk: Epk::from_bytes(bytes),
            ip_port: IpPort::udp("127.0.0.1:33445".parse().unwrap()),
        }
    }

    #[test]
    fn close_nodes_sorted_by_xor_distance() {
        let mut dht = InMemoryDht::new();
        dht.insert(node(0x10));
        dht.insert(node(0xF0));
        dht.insert(node(0x01));

        let target = Epk::from_bytes([0u8; EPK_SIZE]);
        let close = dht.get_close_nodes(&target, 2);

        assert_eq!(close.len(), 2);
        assert_eq!(close[0].epk, node(0x01).epk);
        assert_eq!(close[1].epk, node(0x10).epk);
    }

    #[test]
    fn insert_replaces_existing_entry_by_epk() {
        let mut dht = InMemoryDht::new();
        dht.insert(node(0x01));
        let mut updated = node(0x01);
        updated.ip_port = IpPort::udp("10.0.0.1:1".parse().unwrap());
        dht.insert(updated);
        assert_eq!(dht.len(), 1);
    }

    #[test]
    fn remove_drops_node() {
        let mut dht = InMemoryDht::new();
        dht.insert(node(0x01));
        dht.remove(&node(0x01).epk);
        assert!(dht.is_empty());
    }
}
