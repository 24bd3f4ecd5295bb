//! The fixed-capacity announcement table (`MAX_GCA_ANNOUNCED_NODES` = 30):
//! which nodes are hosting which chats, as told to us by `ANNOUNCE` packets.
//!
//! Eviction policy when the table is full picks the slot with the **largest**
//! `time_added` — i.e. the most recently inserted entry, not the oldest. This
//! reads as an inversion of the obvious LRU-style policy, but is reproduced
//! deliberately rather than "fixed", since other implementations may depend
//! on the exact wire behavior.

use crate::config::MAX_GCA_ANNOUNCED_NODES;
use crate::crypto::Epk;
use crate::node::Node;

#[derive(Debug, Clone, Copy)]
pub struct AnnouncedNode {
    pub chat_id: Epk,
    pub node: Node,
    pub last_rcvd_ping: u64,
    pub last_sent_ping: u64,
    pub time_added: u64,
    pub ping_id: u64,
}

#[derive(Debug, Default)]
pub struct AnnounceTable {
    slots: Vec<Option<AnnouncedNode>>,
}

impl AnnounceTable {
    pub fn new() -> Self {
        Self {
            slots: vec![None; MAX_GCA_ANNOUNCED_NODES],
        }
    }

    /// Insert or refresh an announcement for `chat_id` at `node`. If an
    /// entry for the same `(chat_id, node.epk)` already exists it is
    /// refreshed in place; otherwise the first empty slot is used, and if
    /// the table is full the slot with the greatest `time_added` is
    /// overwritten (see module docs).
    pub fn insert(&mut self, chat_id: Epk, node: Node, now: u64) -> usize {
        let mut greatest_idx = 0;
        let mut greatest_time = 0u64;

        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(existing) = slot {
                if greatest_time < existing.time_added {
                    greatest_time = existing.time_added;
                    greatest_idx = i;
                }
                if existing.chat_id == chat_id && existing.node.epk == node.epk {
                    self.refresh(i, node, now);
                    return i;
                }
            } else {
                self.slots[i] = Some(AnnouncedNode {
                    chat_id,
                    node,
                    last_rcvd_ping: now,
                    last_sent_ping: now,
                    time_added: now,
                    ping_id: 0,
                });
                return i;
            }
        }

        self.slots[greatest_idx] = Some(AnnouncedNode {
            chat_id,
            node,
            last_rcvd_ping: now,
            last_sent_ping: now,
            time_added: now,
            ping_id: 0,
        });
        greatest_idx
    }

    fn refresh(&mut self, idx: usize, node: Node, now: u64) {
        if let Some(entry) = &mut self.slots[idx] {
            entry.node.ip_port = node.ip_port;
            entry.last_rcvd_ping = now;
            entry.last_sent_ping = now;
            entry.time_added = now;
        }
    }

    /// Up to `MAX_GCA_SENT_NODES` nodes hosting `chat_id`.

    pub fn nodes_for_chat(&self, chat_id: &Epk, max: usize) -> Vec<Node> {
        self.slots
            .iter().flatten().filter(|entry| &entry.chat_id == chat_id)
            .take(max)
            .map(|entry| entry.node)
            .collect()
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut AnnouncedNode> {
        self.slots.get_mut(idx).and_then(|s| s.as_mut())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut AnnouncedNode)> {
        self.slots
            .iter_mut().enumerate().filter_map(|(i, s)| s.as_mut().map(|a| (i, a)))
    }

    pub fn expire(&mut self, idx: usize) {
        self.slots[idx] = None;
    }

    /// Record a `PING_RESPONSE` as liveness proof: the entry whose ENC key
    /// matches `sender_enc_pk` and whose outstanding `ping_id` matches is
    /// refreshed, anything else (late/spoofed replies) is ignored.
    pub fn confirm_ping(&mut self, sender_enc_pk: &[u8; crate::crypto::ENC_KEY_SIZE], ping_id: u64, now: u64) -> bool {
        for slot in self.slots.iter_mut().flatten() {
            if slot.node.epk.enc() == *sender_enc_pk && slot.ping_id == ping_id {
                slot.last_rcvd_ping = now;
                return true;
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_GCA_ANNOUNCED_NODES;
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
    fn insert_fills_empty_slots_first() {
        let mut table = AnnounceTable::new();
        let chat_id = Epk::from_bytes([9u8; EPK_SIZE]);
        table.insert(chat_id, node(1), 10);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn refresh_existing_entry_does_not_grow_table() {
        let mut table = AnnounceTable::new();
        let chat_id = Epk::from_bytes([9u8; EPK_SIZE]);
        table.insert(chat_id, node(1), 10);
        table.insert(chat_id, node(1), 20);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn full_table_evicts_most_recently_added_entry() {
        let mut table = AnnounceTable::new();
        let chat_id = Epk::from_bytes([9u8; EPK_SIZE]);
        for i in 0..MAX_GCA_ANNOUNCED_NODES {
            table.insert(chat_id, node(i as u8), i as u64);
        }
        // The last-inserted entry (seed = 29, time_added = 29) has the
        // greatest time_added, so it is the one replaced.
        let evicted_seed = (MAX_GCA_ANNOUNCED_NODES - 1) as u8;
        table.insert(chat_id, node(200), 1000);

        let still_present = table.nodes_for_chat(&chat_id, MAX_GCA_ANNOUNCED_NODES);
        assert!(!still_present.iter().any(|n| n.epk == node(evicted_seed).epk));
        assert!(still_present.iter().any(|n| n.epk == node(200).epk));
        assert_eq!(table.len(), MAX_GCA_ANNOUNCED_NODES);
    }

    #[test]
    fn nodes_for_chat_filters_by_chat_id() {
        let mut table = AnnounceTable::new();
        let chat_a = Epk::from_bytes([1u8; EPK_SIZE]);
        let chat_b = Epk::from_bytes([2u8; EPK_SIZE]);
        table.insert(chat_a, node(1), 0);
        table.insert(chat_b, node(2), 0);
        assert_eq!(table.nodes_for_chat(&chat_a, 4).len(), 1);
    }
}
