//! GroupWire - decentralized, cryptographically-authenticated group chat
//! over a friend-to-friend DHT overlay.
//!
//! This crate owns the application-facing surface: the `GcAnnounce` node
//! lookup service and the `GroupSession` gossip state machines are
//! orchestrated here into a single [`GroupWire`] handle that an embedding
//! application drives by calling `tick()` and reacting to `ChatCallbacks`.

pub mod announce;
pub mod cert;
pub mod config;
pub mod crypto;
pub mod dht;
pub mod error;
pub mod groupchat;
pub mod node;
pub mod time;
pub mod transport;
pub mod wire;

use std::net::SocketAddr;

use announce::GcAnnounce;
use config::Config;
use crypto::{Epk, ExtendedKeypair};
use dht::Dht;
use error::{Error, Result};
use groupchat::chat::Chat;
use groupchat::invite::{InviteRequest, InviteResponse, InviteState};
use groupchat::peer::{Role, Status};
use groupchat::{packet as gc_packet, GroupSession};
use node::{IpPort, Node};
use time::Clock;
use transport::{Datagram, Transport};
use wire::{Envelope, WireType};

/// Hooks the application wires in to learn about events this node can't just
/// poll for: an incoming plain-text message, a membership change, a
/// moderation action applied against the local peer list. A plain trait so
/// this crate stays front-end-agnostic.
pub trait ChatCallbacks: Send + Sync {
    /// A `PLAIN` gossip message was received and accepted into `chat_id`.
    fn on_message(&self, chat_id: Epk, sender: Epk, text: &str);

    /// A peer's nick, status, role, or ban state changed in `chat_id`.
    fn on_peer_updated(&self, chat_id: Epk, peer: Epk);
}

/// A callback sink that drops every event, for callers that only want to
/// poll state directly (used by the test suite below).
pub struct NullCallbacks;

impl ChatCallbacks for NullCallbacks {
    fn on_message(&self, _chat_id: Epk, _sender: Epk, _text: &str) {}
    fn on_peer_updated(&self, _chat_id: Epk, _peer: Epk) {}
}

/// Everything one running node needs: its identity, its view of the DHT and
/// transport, the announce service, every group chat it belongs to, and the
/// callback sink the embedding application supplies.
pub struct GroupWire {
    pub config: Config,
    pub self_keypair: ExtendedKeypair,
    pub dht: Box<dyn Dht>,
    pub transport: Box<dyn Transport>,
    pub clock: Box<dyn Clock>,
    pub announce: GcAnnounce,
    pub groups: GroupSession,
    pub callbacks: Box<dyn ChatCallbacks>,
    seen: transport::SeenWindow,
}

impl GroupWire {
    pub fn new(
        config: Config,
        self_keypair: ExtendedKeypair,
        dht: Box<dyn Dht>,
        transport: Box<dyn Transport>,
        clock: Box<dyn Clock>,
        callbacks: Box<dyn ChatCallbacks>,
    ) -> Self {
        Self {
            config,
            self_keypair,
            dht,
            transport,
            clock,
            announce: GcAnnounce::new(),
            groups: GroupSession::new(),
            callbacks,
            seen: transport::SeenWindow::new(config::GOSSIP_SEEN_WINDOW),
        }
    }

    // ---- operations  ----

    /// Found a brand new chat with this node as founder, and publish an
    /// initial `ANNOUNCE` so the DHT can route lookups to it.
    pub fn create_chat(&mut self, nick: &str) -> Epk {
        let now = self.clock.unix_time();
        let kp = ExtendedKeypair::generate();
        let chat_id = self.groups.found_chat(kp, nick, now);
        if self.announce_chat(chat_id).is_ok() {
            self.groups.mark_announced(&chat_id, now);
        }
        chat_id
    }

    /// Publish an `ANNOUNCE` for `chat_id` under that chat's own identity
    /// (not this node's ambient `self_keypair` — a chat's `self_keypair` is
    /// the identity other members see, and for the founder it's the chat id
    /// itself). This is a self-originated announce: it always relays to
    /// every close node the DHT knows and never gets stored in our own
    /// table.
    pub fn announce_chat(&mut self, chat_id: Epk) -> Result<()> {
        let now = self.clock.unix_time();
        let local_addr = self.transport.local_addr();
        let chat = self.groups.chat(&chat_id).ok_or(Error::UnknownInviter)?;
        let self_node = Node {
            epk: chat.self_keypair.epk(),
            ip_port: IpPort::udp(local_addr),
        };
        let outgoing = self
            .announce
            .announce(self.dht.as_ref(), &chat.self_keypair, chat_id, self_node, &self.config, now);
        announce::flush_outgoing(self.transport.as_ref(), outgoing);
        Ok(())
    }

    /// Ask the DHT who hosts `chat_id`, so a later `INVITE_REQUEST` has
    /// somewhere to go.
    pub fn find_chat_nodes(&mut self, chat_id: Epk) -> Result<()> {
        let now = self.clock.unix_time();
        let (_, packets) = self
            .announce
            .get_nodes(self.dht.as_ref(), chat_id, self.transport.local_addr(), &self.config, now)
            .ok_or(error::Error::TableFull)?;
        announce::flush_outgoing(self.transport.as_ref(), packets);
        Ok(())
    }

    /// Whatever hosts `find_chat_nodes` has resolved for `chat_id` so far
    /// (the `gca_get_requested_nodes`).
    pub fn requested_chat_nodes(&self, chat_id: Epk) -> Vec<Node> {
        self.announce.requested_nodes(&chat_id, &self.config)
    }

    /// Send an `INVITE_REQUEST` to a member reachable at `inviter_addr` to
    /// join `chat_id` under `founder`'s identity.
    pub fn send_invite_request(
        &mut self,
        chat_id: Epk,
        founder: Epk,
        inviter_epk: Epk,
        inviter_addr: SocketAddr,
        nick: &str,
    ) -> Result<Epk> {
        let now = self.clock.unix_time();
        let joiner_kp = ExtendedKeypair::generate();
        let joiner_epk = joiner_kp.epk();
        let request = groupchat::invite::send_invite_request(&joiner_kp, now);
        let bytes = gc_packet::seal_invite_request(&inviter_epk.enc(), &joiner_kp, &request)?;
        self.transport.send_to(inviter_addr, &bytes)?;

        let joining_chat = Chat::joining(joiner_kp, chat_id, founder, nick, now);
        self.groups.insert_chat(joining_chat);
        Ok(joiner_epk)
    }

    /// A member vouches for an `INVITE_REQUEST` from `requester_epk`,
    /// completing the certificate and replying directly.
    pub fn handle_invite_request(
        &mut self,
        chat_id: Epk,
        requester_addr: SocketAddr,
        requester_epk: Epk,
        request: InviteRequest,
    ) -> Result<()> {
        let now = self.clock.unix_time();
        let chat = self.groups.chat_mut(&chat_id).ok_or(Error::UnknownInviter)?;
        let response = groupchat::invite::handle_invite_request(chat, request, now)?;
        let bytes = gc_packet::seal_invite_response(&requester_epk.enc(), &chat.self_keypair, &response)?;
        self.transport.send_to(requester_addr, &bytes)?;
        self.callbacks.on_peer_updated(chat_id, requester_epk);
        Ok(())
    }

    /// Apply an `INVITE_RESPONSE`, advancing a pending join towards
    /// `InviteState::Joined` once the follow-up `SYNC_RESPONSE` lands.
    pub fn handle_invite_response(
        &mut self,
        chat_id: Epk,
        joiner_epk: &Epk,
        response: &InviteResponse,
    ) -> Result<InviteState> {
        let chat = self.groups.chat_mut(&chat_id).ok_or(Error::UnknownInviter)?;
        groupchat::invite::handle_invite_response(chat, response, joiner_epk)
    }

    /// Broadcast a `PLAIN` text message to `chat_id`'s close set.
    pub fn send_message(&mut self, chat_id: Epk, text: &str) -> Result<()> {
        let now = self.clock.unix_time();
        let chat = self.groups.chat_mut(&chat_id).ok_or(Error::Unauthorized)?;
        let message_number = chat.next_message_number();
        let msg = groupchat::gossip::GossipMessage::Plain {
            message_number,
            text: text.to_string(),
        };
        self.broadcast_gossip(chat_id, &msg, now)
    }

    /// Broadcast a nickname change to the close set and update our own
    /// `self_nick`.
    pub fn change_nick(&mut self, chat_id: Epk, nick: &str) -> Result<()> {
        let now = self.clock.unix_time();
        let chat = self.groups.chat_mut(&chat_id).ok_or(Error::Unauthorized)?;
        chat.self_nick = nick.to_string();
        let msg = groupchat::gossip::GossipMessage::ChangeNick(nick.to_string(), now);
        self.broadcast_gossip(chat_id, &msg, now)
    }

    /// Broadcast a topic change. Only the founder or an op may set the topic;
    /// callers are expected to have already checked
    /// `self_role`, mirroring how `change_nick`/`send_message` don't
    /// second-guess the caller's own membership.
    pub fn change_topic(&mut self, chat_id: Epk, topic: &str) -> Result<()> {
        let now = self.clock.unix_time();
        let chat = self.groups.chat_mut(&chat_id).ok_or(Error::Unauthorized)?;
        if !chat.self_role.is_op_or_founder() {
            return Err(Error::Unauthorized);
        }
        let self_epk = chat.self_epk();
        chat.set_topic(topic, self_epk, now)?;
        let msg = groupchat::gossip::GossipMessage::ChangeTopic(topic.to_string(), now);
        self.broadcast_gossip(chat_id, &msg, now)
    }

    /// Broadcast our own status change.
    pub fn change_status(&mut self, chat_id: Epk, status: Status) -> Result<()> {
        let now = self.clock.unix_time();
        let chat = self.groups.chat_mut(&chat_id).ok_or(Error::Unauthorized)?;
        chat.self_status = status;
        let msg = groupchat::gossip::GossipMessage::Status(status, now);
        self.broadcast_gossip(chat_id, &msg, now)
    }

    /// Issue and broadcast a ban against `target`. Requires
    /// this node to be the founder or an op of `chat_id`.
    pub fn ban_peer(&mut self, chat_id: Epk, target: Epk) -> Result<()> {
        let now = self.clock.unix_time();
        let chat = self.groups.chat_mut(&chat_id).ok_or(Error::Unauthorized)?;
        if !chat.self_role.is_op_or_founder() {
            return Err(Error::Unauthorized);
        }
        let cert = cert::make_common_cert(&chat.self_keypair, target, cert::CertType::Ban, now);
        groupchat::moderation::process_common_cert(chat, &cert, now)?;
        let msg = groupchat::gossip::GossipMessage::Action(cert);
        self.broadcast_gossip(chat_id, &msg, now)
    }

    /// Grant op credentials to `target`. Founder-only:
    /// `GRANT_OP` doesn't extend to existing ops the way `BAN` does.
    pub fn grant_op(&mut self, chat_id: Epk, target: Epk) -> Result<()> {
        let now = self.clock.unix_time();
        let chat = self.groups.chat_mut(&chat_id).ok_or(Error::Unauthorized)?;
        if chat.self_role != Role::FOUNDER {
            return Err(Error::Unauthorized);
        }
        let cert = cert::make_common_cert(&chat.self_keypair, target, cert::CertType::OpCredentials, now);
        groupchat::moderation::process_common_cert(chat, &cert, now)?;
        let msg = groupchat::gossip::GossipMessage::Action(cert);
        self.broadcast_gossip(chat_id, &msg, now)
    }

    fn broadcast_gossip(&mut self, chat_id: Epk, msg: &groupchat::gossip::GossipMessage, now: u64) -> Result<()> {
        let chat = self.groups.chat(&chat_id).ok_or(Error::Unauthorized)?;
        for peer_epk in &chat.close {
            let Some(peer) = chat.peer(peer_epk) else { continue };
            let Some(ip_port) = peer.ip_port else { continue };
            let bytes = gc_packet::seal_gossip(&peer_epk.enc(), &chat.self_keypair, msg)?;
            if let Err(err) = self.transport.send_to(ip_port.addr, &bytes) {
                tracing::warn!(%err, "gossip send failed");
            }
        }
        let _ = now;
        Ok(())
    }

    // ---- inbound dispatch  ----

    /// Route one inbound datagram to the announce or groupchat layer by its
    /// leading wire-type byte. Errors are logged and dropped, matching the
    /// network layer's general policy: one malformed packet from
    /// one peer must never take down the whole event loop.
    pub fn handle_datagram(&mut self, datagram: Datagram) {
        let envelope = match Envelope::parse(&datagram.data) {
            Ok(e) => e,
            Err(err) => {
                tracing::debug!(from = %datagram.from, error = %err, "dropping malformed packet");
                return;
            }
        };

        let result = match envelope.wire_type {
            WireType::GcaAnnounce => self.on_announce(&envelope),
            WireType::GcaGetNodes => self.on_get_nodes(&envelope),
            WireType::GcaSendNodes => self.announce.receive_send_nodes(&envelope, self.config.max_gca_sent_nodes),
            WireType::GcaPingRequest => self.on_ping_request(&envelope, datagram.from),
            WireType::GcaPingResponse => {
                let now = self.clock.unix_time();
                self.announce.receive_ping_response(&self.self_keypair, &envelope, now)
            }
            WireType::InviteRequest => self.on_invite_request(&envelope, datagram.from),
            WireType::InviteResponse => self.on_invite_response(&envelope, datagram.from),
            WireType::SyncRequest => self.on_sync_request(&envelope, datagram.from),
            WireType::SyncResponse => self.on_sync_response(&envelope),
            WireType::Ping
            | WireType::Status
            | WireType::NewPeer
            | WireType::ChangeNick
            | WireType::ChangeTopic
            | WireType::Message
            | WireType::Action => self.on_gossip(&envelope),
        };

        if let Err(err) = result {
            tracing::debug!(from = %datagram.from, error = %err, wire_type = ?envelope.wire_type, "packet handling failed");
            if matches!(err, Error::Decrypt | Error::CertCorrupt | Error::MalformedPacket(_)) {
                self.record_peer_error(&envelope.sender_enc_pk);
            }
        }
    }

    /// Count a decrypt/integrity failure against whichever known peer sent
    /// it, disconnecting the peer once `max_peer_errors` is exceeded. A
    /// sender we can't attribute to any chat's peer list (an unsolicited or
    /// pre-membership packet) is silently ignored here — there's nothing to
    /// disconnect.
    fn record_peer_error(&mut self, sender_enc_pk: &[u8; crypto::ENC_KEY_SIZE]) {
        let threshold = self.config.max_peer_errors;
        for chat_id in self.groups.chat_ids() {
            let Some(chat) = self.groups.chat_mut(&chat_id) else { continue };
            let over_threshold = chat
                .peers
                .values_mut()
                .find(|p| p.epk.enc() == *sender_enc_pk)
                .map(|p| (p.epk, p.record_error(threshold)));
            if let Some((epk, true)) = over_threshold {
                tracing::warn!(%epk, %chat_id, "disconnecting peer after repeated packet errors");
                chat.remove_peer(&epk);
            }
        }
    }

    fn on_announce(&mut self, envelope: &Envelope) -> Result<()> {
        let now = self.clock.unix_time();
        let outgoing = self
            .announce
            .receive_announce(self.dht.as_ref(), &self.self_keypair, envelope, &self.config, now)?;
        announce::flush_outgoing(self.transport.as_ref(), outgoing);
        Ok(())
    }

    fn on_get_nodes(&mut self, envelope: &Envelope) -> Result<()> {
        let outgoing = self
            .announce
            .receive_get_nodes(self.dht.as_ref(), &self.self_keypair, envelope, &self.config)?;
        announce::flush_outgoing(self.transport.as_ref(), outgoing);
        Ok(())
    }

    fn on_ping_request(&mut self, envelope: &Envelope, from: SocketAddr) -> Result<()> {
        let (addr, bytes) = self.announce.receive_ping_request(&self.self_keypair, envelope, from)?;
        self.transport.send_to(addr, &bytes)
    }

    /// We are the target of an `INVITE_REQUEST`: this happens when we
    /// already belong to the chat the requester resolved us as an announced
    /// host for, so find which chat by trying every one whose member list
    /// we're an op/founder of doesn't apply here — invites are addressed
    /// without a chat id in the payload, so the embedding application is
    /// expected to have already matched `from`/`requester_epk` against a
    /// chat via `find_chat_nodes`/`ANNOUNCE` and call
    /// `handle_invite_request` directly; this generic dispatch path only
    /// covers chats where we are the sole member (the founder bootstrapping
    /// their very first invite).
    fn on_invite_request(&mut self, envelope: &Envelope, from: SocketAddr) -> Result<()> {
        let chat_id = self
            .groups
            .chat_ids()
            .into_iter().find(|id| self.groups.chat(id).map(|c| c.peer_count() == 0).unwrap_or(false))
            .ok_or(Error::UnknownInviter)?;
        let chat = self.groups.chat(&chat_id).ok_or(Error::UnknownInviter)?;
        let request = gc_packet::open_invite_request(envelope, &chat.self_keypair)?;
        let requester_epk = request.semi.invitee;
        self.handle_invite_request(chat_id, from, requester_epk, request)
    }

    fn on_invite_response(&mut self, envelope: &Envelope, from: SocketAddr) -> Result<()> {
        let chat_id = self
            .groups
            .chat_ids()
            .into_iter().find(|id| {
                self.groups
                    .chat(id)
                    .map(|c| !c.self_verified && c.peer_count() == 0)
                    .unwrap_or(false)
            })
            .ok_or(Error::UnknownInviter)?;
        let self_epk = self.groups.chat(&chat_id).ok_or(Error::UnknownInviter)?.self_epk();
        let chat = self.groups.chat_mut(&chat_id).ok_or(Error::UnknownInviter)?;
        let response = gc_packet::open_invite_response(envelope, &chat.self_keypair)?;
        groupchat::invite::handle_invite_response(chat, &response, &self_epk)?;
        let sync_request = groupchat::sync::build_sync_request(chat);
        let bytes = gc_packet::seal_sync_request(&response.founder.enc(), &chat.self_keypair, &sync_request)?;
        self.transport.send_to(from, &bytes)
    }

    /// Like `on_invite_request`, `SYNC_REQUEST` carries no chat id in its
    /// cleartext framing, so the chat it's addressed to is whichever of our
    /// chats the envelope actually decrypts under: each chat has a distinct
    /// `self_keypair`, so at most one will open the ciphertext successfully.
    fn on_sync_request(&mut self, envelope: &Envelope, from: SocketAddr) -> Result<()> {
        let now = self.clock.unix_time();
        let chat_id = self
            .groups
            .chat_ids()
            .into_iter().find(|id| {
                self.groups
                    .chat(id)
                    .map(|c| gc_packet::open_sync_request(envelope, &c.self_keypair).is_ok())
                    .unwrap_or(false)
            })
            .ok_or(Error::UnknownInviter)?;
        let chat = self.groups.chat(&chat_id).ok_or(Error::UnknownInviter)?;
        let request = gc_packet::open_sync_request(envelope, &chat.self_keypair)?;
        let response = groupchat::sync::handle_sync_request(chat, request, now);
        let records: Vec<gc_packet::PeerRecord> = chat.peers.values().map(gc_packet::PeerRecord::from_peer).collect();
        let bytes = gc_packet::seal_sync_response(&envelope.sender_enc_pk, &chat.self_keypair, &response, &records)?;
        self.transport.send_to(from, &bytes)
    }

    fn on_sync_response(&mut self, envelope: &Envelope) -> Result<()> {
        let now = self.clock.unix_time();
        let chat_id = self
            .groups
            .chat_ids()
            .into_iter().find(|id| self.groups.chat(id).map(|c| !c.self_verified || c.peer_count() == 0).unwrap_or(false))
            .ok_or(Error::UnknownInviter)?;
        let chat = self.groups.chat_mut(&chat_id).ok_or(Error::UnknownInviter)?;
        let (mut response, records) = gc_packet::open_sync_response(envelope, &chat.self_keypair)?;
        response.peers = records
            .iter().filter_map(|r| r.ip_port.map(|ip_port| Node { epk: r.epk, ip_port }))
            .collect();
        let known_before: std::collections::HashSet<[u8; 64]> = chat.peers.keys().copied().collect();
        groupchat::sync::apply_sync_response(chat, response, now)?;

        for record in records {
            let is_new = !known_before.contains(record.epk.as_bytes());
            let peer = chat.upsert_peer(record.epk, now);
            if is_new || record.last_update_time >= peer.last_update_time {
                peer.nick = record.nick;
                peer.role = record.role;
                peer.status = record.status;
                peer.invite_certificate = record.invite_certificate;
                peer.last_update_time = record.last_update_time;
            }
            for cert in record.common_certificates {
                peer.add_common_certificate_if_new(cert);
            }
        }
        self.announce.cleanup_chat(&chat_id);
        Ok(())
    }

    fn on_gossip(&mut self, envelope: &Envelope) -> Result<()> {
        let now = self.clock.unix_time();
        let chat_id = self
            .groups
            .chat_ids()
            .into_iter().find(|id| {
                self.groups
                    .chat(id)
                    .map(|c| c.peers.values().any(|p| p.epk.enc() == envelope.sender_enc_pk))
                    .unwrap_or(false)
            });
        let chat_id = chat_id.ok_or(Error::Unauthorized)?;
        let chat = self.groups.chat_mut(&chat_id).ok_or(Error::Unauthorized)?;
        let sender = *chat
            .peers
            .values().find(|p| p.epk.enc() == envelope.sender_enc_pk)
            .map(|p| &p.epk)
            .ok_or(Error::Unauthorized)?;

        let msg = gc_packet::open_gossip(envelope, &chat.self_keypair)?;
        let digest = gossip_digest(&envelope.ciphertext);
        let already_seen = self.seen.check_and_insert(digest);

        let is_message = matches!(msg, groupchat::gossip::GossipMessage::Plain { .. });
        let text_for_callback = if let groupchat::gossip::GossipMessage::Plain { ref text, .. } = msg {
            Some(text.clone())
        } else {
            None
        };

        let outcome = groupchat::gossip::handle_gossip(chat, &sender, msg, now, already_seen)?;
        self.callbacks.on_peer_updated(chat_id, sender);
        if is_message {
            if let Some(text) = text_for_callback {
                self.callbacks.on_message(chat_id, sender, &text);
            }
        }

        if outcome.rebroadcast {
            let close = chat.close.clone();
            let self_keypair_epk = chat.self_keypair.epk();
            for peer_epk in close {
                if peer_epk == sender || peer_epk == self_keypair_epk {
                    continue;
                }
                let Some(peer) = chat.peer(&peer_epk) else { continue };
                let Some(ip_port) = peer.ip_port else { continue };
                if let Ok(bytes) = Envelope::seal(
                    envelope.wire_type,
                    &peer_epk.enc(),
                    &chat.self_keypair,
                    wire::EnvelopeExtra::None,
                    &envelope.ciphertext,
                ) {
                    let _ = self.transport.send_to(ip_port.addr, &bytes);
                }
            }
        }
        Ok(())
    }

    /// Periodic housekeeping (the "do" function): poll inbound
    /// datagrams, run the announce service's tick, then the groupchat
    /// liveness sweep and close-set pings.
    pub fn tick(&mut self) {
        for datagram in self.transport.poll() {
            self.handle_datagram(datagram);
        }

        let outgoing = self.announce.tick(self.clock.as_ref(), &self.self_keypair, &self.config);
        announce::flush_outgoing(self.transport.as_ref(), outgoing);

        self.groups.expire_stale_peers(self.clock.as_ref(), &self.config);

        let chat_ids = self.groups.chat_ids();
        for chat_id in chat_ids {
            if !self.groups.due_for_ping(&chat_id, self.clock.as_ref(), &self.config) {
                continue;
            }
            let now = self.clock.unix_time();
            if let Some(chat) = self.groups.chat(&chat_id) {
                for peer_epk in chat.close.clone() {
                    let Some(peer) = chat.peer(&peer_epk) else { continue };
                    let Some(ip_port) = peer.ip_port else { continue };
                    if let Ok(bytes) = gc_packet::seal_gossip(
                        &peer_epk.enc(),
                        &chat.self_keypair,
                        &groupchat::gossip::GossipMessage::Ping,
                    ) {
                        let _ = self.transport.send_to(ip_port.addr, &bytes);
                    }
                }
            }
            self.groups.mark_pinged(&chat_id, now);
        }

        for chat_id in self.groups.chat_ids() {
            if !self.groups.due_for_announce(&chat_id, self.clock.as_ref(), &self.config) {
                continue;
            }
            let now = self.clock.unix_time();
            if self.announce_chat(chat_id).is_ok() {
                self.groups.mark_announced(&chat_id, now);
            }
        }
    }
}

fn gossip_digest(ciphertext: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(ciphertext);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dht::InMemoryDht;

    fn node(transport: transport::InMemoryTransport) -> GroupWire {
        GroupWire::new(
            Config::default(),
            ExtendedKeypair::generate(),
            Box::new(InMemoryDht::new()),
            Box::new(transport),
            Box::new(time::FrozenClock::new(1_000)),
            Box::new(NullCallbacks),
        )
    }

    /// Full join flow end to end: a founder invites a joiner directly, the
    /// joiner applies the invite response, sends a follow-up `SYNC_REQUEST`,
    /// and the founder's `SYNC_RESPONSE` leaves the joiner verified with the
    /// founder in its peer list.
    #[test]
    fn invite_then_sync_joins_a_new_member() {
        let founder_transport = transport::InMemoryTransport::new("127.0.0.1:41001".parse().unwrap());
        let joiner_transport = transport::InMemoryTransport::new("127.0.0.1:41002".parse().unwrap());
        founder_transport.link(&joiner_transport);

        let mut founder = node(founder_transport);
        let mut joiner = node(joiner_transport);

        let chat_id = founder.create_chat("founder");
        let founder_epk = founder.groups.chat(&chat_id).unwrap().self_keypair.epk();
        let founder_addr = founder.transport.local_addr();
        let joiner_addr = joiner.transport.local_addr();

        joiner
            .send_invite_request(chat_id, founder_epk, founder_epk, founder_addr, "joiner")
            .unwrap();

        founder.tick();
        joiner.tick();
        founder.tick();
        joiner.tick();

        let joined_chat = joiner.groups.chat(&chat_id).unwrap();
        assert!(joined_chat.self_verified);
        assert_eq!(joined_chat.peer_count(), 1);
        assert!(joined_chat.peer(&founder_epk).is_some());

        let founders_view = founder.groups.chat(&chat_id).unwrap();
        assert_eq!(founders_view.peer_count(), 1);
        let _ = joiner_addr;
    }

    /// `create_chat` must actually publish an `ANNOUNCE`, not just set up
    /// local state — otherwise nobody else can ever resolve this chat's
    /// host through the DHT.
    #[test]
    fn create_chat_announces_to_a_dht_known_relay() {
        let relay_keypair = ExtendedKeypair::generate();
        let relay_transport = transport::InMemoryTransport::new("127.0.0.1:41101".parse().unwrap());
        let founder_transport = transport::InMemoryTransport::new("127.0.0.1:41102".parse().unwrap());
        founder_transport.link(&relay_transport);

        let mut dht = InMemoryDht::new();
        dht.insert(Node {
            epk: relay_keypair.epk(),
            ip_port: IpPort::udp(relay_transport.local_addr()),
        });

        let mut founder = GroupWire::new(
            Config::default(),
            ExtendedKeypair::generate(),
            Box::new(dht),
            Box::new(founder_transport),
            Box::new(time::FrozenClock::new(1_000)),
            Box::new(NullCallbacks),
        );

        founder.create_chat("founder");

        let datagrams = relay_transport.poll();
        assert_eq!(datagrams.len(), 1);
        let envelope = Envelope::parse(&datagrams[0].data).unwrap();
        assert_eq!(envelope.wire_type, WireType::GcaAnnounce);
    }

    /// A peer whose packets repeatedly fail to decrypt gets disconnected
    /// once `max_peer_errors` is exceeded.
    #[test]
    fn repeated_decrypt_failures_disconnect_the_peer() {
        let mut founder = node(transport::InMemoryTransport::new("127.0.0.1:41201".parse().unwrap()));
        let chat_id = founder.create_chat("founder");

        let bad_peer_kp = ExtendedKeypair::generate();
        let bad_peer_epk = bad_peer_kp.epk();
        founder.groups.chat_mut(&chat_id).unwrap().upsert_peer(bad_peer_epk, 0);

        let sender_enc_pk = bad_peer_epk.enc();
        for _ in 0..=founder.config.max_peer_errors {
            founder.record_peer_error(&sender_enc_pk);
        }

        assert!(founder.groups.chat(&chat_id).unwrap().peer(&bad_peer_epk).is_none());
    }
}
