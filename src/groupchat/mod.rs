//! Group chat state machine: a `GroupSession` holds every chat the
//! local node belongs to and drives their liveness/gossip housekeeping.

pub mod chat;
pub mod gossip;
pub mod invite;
pub mod moderation;
pub mod packet;
pub mod peer;
pub mod sync;

use std::collections::HashMap;

use crate::config::Config;
use crate::crypto::{Epk, ExtendedKeypair};
use crate::time::Clock;

pub use chat::Chat;

/// Every group chat this node is a member of, keyed by chat id (the
/// founder's `Epk`, the `chat_public_key`).
pub struct GroupSession {
    chats: HashMap<[u8; 64], Chat>,
}

impl GroupSession {
    pub fn new() -> Self {
        Self {
            chats: HashMap::new(),
        }
    }

    pub fn found_chat(&mut self, self_keypair: ExtendedKeypair, nick: &str, now: u64) -> Epk {
        let chat = Chat::found(self_keypair, nick, now);
        let chat_id = chat.chat_id;
        self.chats.insert(*chat_id.as_bytes(), chat);
        chat_id
    }

    pub fn insert_chat(&mut self, chat: Chat) {
        self.chats.insert(*chat.chat_id.as_bytes(), chat);
    }

    pub fn chat(&self, chat_id: &Epk) -> Option<&Chat> {
        self.chats.get(chat_id.as_bytes())
    }

    pub fn chat_mut(&mut self, chat_id: &Epk) -> Option<&mut Chat> {
        self.chats.get_mut(chat_id.as_bytes())
    }

    pub fn leave_chat(&mut self, chat_id: &Epk) -> Option<Chat> {
        self.chats.remove(chat_id.as_bytes())
    }

    pub fn chat_ids(&self) -> Vec<Epk> {
        self.chats.values().map(|c| c.chat_id).collect()
    }

    /// Liveness sweep: evict close-neighbors that have gone quiet for
    /// longer than `BAD_GROUPNODE_TIMEOUT`, then recompute the close set
    /// from whoever is left. Called once per tick per chat.
    pub fn expire_stale_peers(&mut self, clock: &dyn Clock, cfg: &Config) {
        let now = clock.unix_time();
        for chat in self.chats.values_mut() {
            let stale: Vec<Epk> = chat
                .peers
                .values()
                .filter(|p| p.epk != chat.self_epk() && !p.is_alive(now, cfg.bad_groupnode_timeout))
                .map(|p| p.epk)
                .collect();
            for epk in stale {
                chat.remove_peer(&epk);
            }
            chat.recompute_close_set(cfg);
        }
    }

    /// Whether `chat_id`'s close set is due for a ping round
    /// (`GROUP_PING_INTERVAL`).
    pub fn due_for_ping(&self, chat_id: &Epk, clock: &dyn Clock, cfg: &Config) -> bool {
        self.chat(chat_id)
            .map(|c| clock.is_timeout(c.last_sent_ping_time, cfg.group_ping_interval))
            .unwrap_or(false)
    }

    pub fn mark_pinged(&mut self, chat_id: &Epk, now: u64) {
        if let Some(chat) = self.chat_mut(chat_id) {
            chat.last_sent_ping_time = now;
        }
    }

    /// Whether this node founded `chat_id` and is due to republish its
    /// `ANNOUNCE` so the DHT keeps routing lookups to it.
    pub fn due_for_announce(&self, chat_id: &Epk, clock: &dyn Clock, cfg: &Config) -> bool {
        self.chat(chat_id)
            .map(|c| c.founder == c.self_epk() && clock.is_timeout(c.last_announce_time, cfg.gca_ping_interval))
            .unwrap_or(false)
    }

    pub fn mark_announced(&mut self, chat_id: &Epk, now: u64) {
        if let Some(chat) = self.chat_mut(chat_id) {
            chat.last_announce_time = now;
        }
    }
}

impl Default for GroupSession {
    fn default() -> Self {
        Self::new()
    }
}
