//! Self-issued `GET_NODES` lookups in flight (`MAX_GCA_SELF_REQUESTS`):
//! we want to join `chat_id` and asked the DHT who hosts it.

use crate::config::{MAX_GCA_SELF_REQUESTS, MAX_GCA_SENT_NODES};
use crate::crypto::{Epk, ExtendedKeypair};
use crate::node::Node;

pub struct SelfRequest {
    pub chat_id: Epk,
    pub req_id: u64,
    pub time_added: u64,
    pub ready: bool,
    pub nodes: Vec<Node>,
    /// Ephemeral keypair this request was sent under (a lookup
    /// doesn't need to reveal the asker's permanent identity).
    pub ephemeral_keypair: ExtendedKeypair,
}

#[derive(Default)]
pub struct SelfRequestTable {
    slots: Vec<Option<SelfRequest>>,
}

impl SelfRequestTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_GCA_SELF_REQUESTS);
        slots.resize_with(MAX_GCA_SELF_REQUESTS, || None);
        Self { slots }
    }

    /// Register a new lookup. Returns `None` if the table is full.
    pub fn add(&mut self, chat_id: Epk, req_id: u64, ephemeral_keypair: ExtendedKeypair, now: u64) -> Option<usize> {
        let idx = self.slots.iter().position(|s| s.is_none())?;
        self.slots[idx] = Some(SelfRequest {
            chat_id,
            req_id,
            time_added: now,
            ready: false,
            nodes: Vec::new(),
            ephemeral_keypair,
        });
        Some(idx)
    }

    /// The request in slot `idx`, if any (used to recover the `req_id` and
    /// ephemeral keypair a `get_nodes` call registered, by the index it
    /// returned).
    pub fn get(&self, idx: usize) -> Option<&SelfRequest> {
        self.slots.get(idx).and_then(|s| s.as_ref())
    }

    pub fn find_by_req_id(&mut self, req_id: u64) -> Option<&mut SelfRequest> {
        self.slots
            .iter_mut()
            .filter_map(|s| s.as_mut())
            .find(|r| r.req_id == req_id)
    }

    /// Apply a `SEND_NODES` reply: append any nodes we didn't already know
    /// about and mark the request ready.
    pub fn add_response_nodes(&mut self, req_id: u64, nodes: Vec<Node>) -> bool {
        let Some(request) = self.find_by_req_id(req_id) else {
            return false;
        };
        for node in nodes {
            if request.ip_port_is_set(&node) && !request.knows(&node.epk) {
                request.nodes.truncate(MAX_GCA_SENT_NODES);
                request.nodes.push(node);
                request.ready = true;
            }
        }
        true
    }

    /// Currently known hosts for `chat_id`, up to `max`: whatever
    /// `SEND_NODES` replies have filled in so far across every outstanding
    /// lookup for that chat.
    pub fn nodes_for_chat(&self, chat_id: &Epk, max: usize) -> Vec<Node> {
        self.slots
            .iter()
            .flatten()
            .filter(|r| r.chat_id == *chat_id && r.ready)
            .flat_map(|r| r.nodes.iter().copied())
            .take(max)
            .collect()
    }

    /// Drop every outstanding request for `chat_id`, ready or not, once
    /// we've joined it (or it's been deleted).
    pub fn cleanup_chat(&mut self, chat_id: &Epk) {
        for slot in self.slots.iter_mut() {
            let drop_it = matches!(slot, Some(r) if r.chat_id == *chat_id);
            if drop_it {
                *slot = None;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SelfRequest {
    fn ip_port_is_set(&self, node: &Node) -> bool {
        !node.ip_port.is_zero()
    }

    fn knows(&self, epk: &Epk) -> bool {
        self.nodes.iter().any(|n| &n.epk == epk)
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
    fn add_and_respond_marks_ready() {
        let mut table = SelfRequestTable::new();
        let chat_id = Epk::from_bytes([1u8; EPK_SIZE]);
        let idx = table.add(chat_id, 42, ExtendedKeypair::generate(), 0).unwrap();
        assert_eq!(table.len(), 1);

        let applied = table.add_response_nodes(42, vec![node(5)]);
        assert!(applied);
        assert!(table.slots[idx].as_ref().unwrap().ready);
    }

    #[test]
    fn table_full_returns_none() {
        let mut table = SelfRequestTable::new();
        let chat_id = Epk::from_bytes([1u8; EPK_SIZE]);
        for i in 0..MAX_GCA_SELF_REQUESTS {
            assert!(table
                .add(chat_id, i as u64, ExtendedKeypair::generate(), 0)
                .is_some());
        }
        assert!(table
            .add(chat_id, 9999, ExtendedKeypair::generate(), 0)
            .is_none());
    }

    #[test]
    fn cleanup_chat_drops_ready_requests_for_that_chat() {
        let mut table = SelfRequestTable::new();
        let chat_id = Epk::from_bytes([1u8; EPK_SIZE]);
        table.add(chat_id, 1, ExtendedKeypair::generate(), 0).unwrap();
        table.add_response_nodes(1, vec![node(1)]);
        table.cleanup_chat(&chat_id);
        assert!(table.is_empty());
    }

    #[test]
    fn cleanup_chat_also_drops_unanswered_requests() {
        let mut table = SelfRequestTable::new();
        let chat_id = Epk::from_bytes([1u8; EPK_SIZE]);
        table.add(chat_id, 1, ExtendedKeypair::generate(), 0).unwrap();
        table.cleanup_chat(&chat_id);
        assert!(table.is_empty());
    }
}
