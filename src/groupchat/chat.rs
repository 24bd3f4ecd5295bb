//! `GC_Chat`: the state one member keeps for one group.
use std::collections::HashMap;

use crate::config::{Config, MAX_TOPIC_BYTES};
use crate::crypto::{Epk, ExtendedKeypair};
use crate::error::{Error, Result};
use crate::groupchat::peer::{Peer, Role};
use crate::node::Node;

/// `GC_ChatCredentials`: founder-issued role grants for ops.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub ops: Vec<(Epk, Role)>,
}

impl Credentials {
    pub fn role_of(&self, epk: &Epk) -> Option<Role> {
        self.ops.iter().find(|(pk, _)| pk == epk).map(|(_, r)| *r)
    }

    pub fn grant(&mut self, epk: Epk, role: Role) {
        if let Some(entry) = self.ops.iter_mut().find(|(pk, _)| *pk == epk) {
            entry.1 = role;
        } else {
            self.ops.push((epk, role));
        }
    }
}

/// One group chat as seen by the local member.
pub struct Chat {
    pub chat_id: Epk,
    pub founder: Epk,
    pub self_keypair: ExtendedKeypair,
    pub self_nick: String,
    pub self_role: Role,
    pub self_status: crate::groupchat::peer::Status,
    /// Whether this node's own invite chain has been accepted as verified
    /// (verified peer). Always true for the founder; for a joiner
    /// it flips once `groupchat::invite`'s state machine reaches `Verified`.
    pub self_verified: bool,

    pub topic: String,
    pub topic_setter: Option<Epk>,
    pub topic_time: u64,

    pub peers: HashMap<[u8; 64], Peer>,
    pub close: Vec<Epk>,

    pub credentials: Credentials,
    pub message_number: u32,
    pub last_synced_time: u64,
    pub last_sent_ping_time: u64,
    pub last_announce_time: u64,
}

impl Chat {
    /// Found a brand new chat: self is the founder. The peer list never
    /// holds the self EPK — the founder's own identity lives in
    /// `self_keypair`/`self_nick`/`self_role`, not in `peers`.
    pub fn found(self_keypair: ExtendedKeypair, nick: &str, now: u64) -> Self {
        let founder = self_keypair.epk();

        Self {
            chat_id: founder,
            founder,
            self_keypair,
            self_nick: nick.to_string(),
            self_role: Role::FOUNDER,
            self_status: crate::groupchat::peer::Status::Online,
            self_verified: true,
            topic: String::new(),
            topic_setter: None,
            topic_time: 0,
            peers: HashMap::new(),
            close: Vec::new(),
            credentials: Credentials::default(),
            message_number: 0,
            last_synced_time: now,
            last_sent_ping_time: now,
            last_announce_time: now,
        }
    }

    /// Build the `Chat` a joiner holds immediately after sending the
    /// `INVITE_REQUEST` but before any response has arrived: no
    /// founder-equivalent self-identity, not yet verified, no peers known.
    pub fn joining(self_keypair: ExtendedKeypair, chat_id: Epk, founder: Epk, nick: &str, now: u64) -> Self {
        Self {
            chat_id,
            founder,
            self_keypair,
            self_nick: nick.to_string(),
            self_role: Role::USER,
            self_status: crate::groupchat::peer::Status::Online,
            self_verified: false,
            topic: String::new(),
            topic_setter: None,
            topic_time: 0,
            peers: HashMap::new(),
            close: Vec::new(),
            credentials: Credentials::default(),
            message_number: 0,
            last_synced_time: now,
            last_sent_ping_time: now,
            last_announce_time: now,
        }
    }

    pub fn self_epk(&self) -> Epk {
        self.self_keypair.epk()
    }

    pub fn peer(&self, epk: &Epk) -> Option<&Peer> {
        self.peers.get(epk.as_bytes())
    }

    pub fn peer_mut(&mut self, epk: &Epk) -> Option<&mut Peer> {
        self.peers.get_mut(epk.as_bytes())
    }

    pub fn upsert_peer(&mut self, epk: Epk, now: u64) -> &mut Peer {
        self.peers
            .entry(*epk.as_bytes())
            .or_insert_with(|| Peer::new(epk, now))
    }

    pub fn remove_peer(&mut self, epk: &Epk) {
        self.peers.remove(epk.as_bytes());
        self.close.retain(|e| e != epk);
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn set_topic(&mut self, topic: &str, setter: Epk, ts: u64) -> Result<()> {
        if topic.len() > MAX_TOPIC_BYTES {
            return Err(Error::LengthOverflow);
        }
        self.topic = topic.to_string();
        self.topic_setter = Some(setter);
        self.topic_time = ts;
        Ok(())
    }

    pub fn next_message_number(&mut self) -> u32 {
        self.message_number = self.message_number.wrapping_add(1);
        self.message_number
    }

    /// Recompute the `GROUP_CLOSE_CONNECTIONS` XOR-closest live peers, the
    /// set pings and gossip route through.
    pub fn recompute_close_set(&mut self, cfg: &Config) {
        let self_epk = self.self_epk();
        let mut candidates: Vec<Epk> = self
            .peers
            .values()
            .filter(|p| !p.banned && p.epk != self_epk)
            .map(|p| p.epk)
            .collect();
        candidates.sort_by_key(|epk| epk.xor_distance(&self_epk));
        candidates.truncate(cfg.group_close_connections);
        self.close = candidates;
    }

    /// Peers, sorted by distance from `chat_id`, suitable for a `SYNC`
    /// response peer-list payload.
    pub fn peer_list_nodes(&self) -> Vec<Node> {
        self.peers
            .values()
            .filter_map(|p| {
                p.ip_port.map(|ip_port| Node {
                    epk: p.epk,
                    ip_port,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn founding_a_chat_marks_self_verified_and_excludes_self_from_peer_list() {
        let kp = ExtendedKeypair::generate();
        let chat = Chat::found(kp, "alice", 100);
        assert!(chat.self_verified);
        assert_eq!(chat.self_role, Role::FOUNDER);
        // The peer list never contains the self EPK.
        assert!(chat.peer(&chat.founder).is_none());
        assert_eq!(chat.peer_count(), 0);
    }

    #[test]
    fn close_set_excludes_self_and_banned_and_caps_at_config() {
        let kp = ExtendedKeypair::generate();
        let mut chat = Chat::found(kp, "alice", 0);
        let cfg = Config {
            group_close_connections: 2,
            ..Config::default()
        };
        for i in 0..5u8 {
            let epk = Epk::from_bytes([i; 64]);
            chat.upsert_peer(epk, 0);
        }
        chat.peer_mut(&Epk::from_bytes([0u8; 64])).unwrap().banned = true;
        chat.recompute_close_set(&cfg);

        assert_eq!(chat.close.len(), 2);
        assert!(!chat.close.contains(&chat.self_epk()));
        assert!(!chat.close.contains(&Epk::from_bytes([0u8; 64])));
    }

    #[test]
    fn topic_over_max_length_rejected() {
        let kp = ExtendedKeypair::generate();
        let mut chat = Chat::found(kp, "alice", 0);
        let setter = chat.self_epk();
        let huge = "x".repeat(crate::config::MAX_TOPIC_BYTES + 1);
        assert!(chat.set_topic(&huge, setter, 0).is_err());
    }
}
