//! The group announce service: lets a peer discover who is
//! hosting a chat it wants to join, and lets hosting peers stay reachable
//! without broadcasting their address to the whole DHT.

pub mod dispatch;
pub mod packet;
pub mod requests;
pub mod table;

use std::net::SocketAddr;

use crate::config::Config;
use crate::crypto::{self, Epk, ExtendedKeypair};
use crate::dht::Dht;
use crate::error::{Error, Result};
use crate::node::{IpPort, Node};
use crate::time::Clock;
use crate::transport::Transport;
use crate::wire::{Envelope, EnvelopeExtra};

use requests::SelfRequestTable;
use table::AnnounceTable;

/// `GC_Announce`: this node's view of the announce service.
pub struct GcAnnounce {
    pub table: AnnounceTable,
    pub self_requests: SelfRequestTable,
}

impl GcAnnounce {
    pub fn new() -> Self {
        Self {
            table: AnnounceTable::new(),
            self_requests: SelfRequestTable::new(),
        }
    }

    /// Announce that we host `chat_id`, reachable at `self_node`. This is a
    /// self-originated packet: it relays to every close node the DHT knows
    /// rather than only strictly-closer ones, and we never store it in our
    /// own table — we can't be the terminal hop for our own announcement,
    /// only a node receiving it from elsewhere can be.
    pub fn announce(
        &mut self,
        dht: &dyn Dht,
        self_keypair: &ExtendedKeypair,
        chat_id: Epk,
        self_node: Node,
        cfg: &Config,
        now: u64,
    ) -> Vec<(SocketAddr, Vec<u8>)> {
        let decision = dispatch::dispatch_packet(dht, &self_keypair.epk(), &chat_id, cfg.max_gca_sent_nodes, true);
        let body = packet::AnnounceBody::build(self_keypair, chat_id, self_node, now);
        Self::seal_to_many(decision.forward_to, |n| packet::seal_announce(&n.epk.enc(), self_keypair, &body))
    }

    /// Handle an inbound `ANNOUNCE`: verify its end-to-end signature, then
    /// either store it (we're among the closest to `chat_id`) or relay it
    /// further in.
    pub fn receive_announce(
        &mut self,
        dht: &dyn Dht,
        self_keypair: &ExtendedKeypair,
        envelope: &Envelope,
        cfg: &Config,
        now: u64,
    ) -> Result<Vec<(SocketAddr, Vec<u8>)>> {
        let body = packet::open_announce(envelope, self_keypair)?;
        if !body.verify() {
            return Err(Error::Decrypt);
        }

        let decision = dispatch::dispatch_packet(dht, &self_keypair.epk(), &body.chat_id, cfg.max_gca_sent_nodes, false);
        if decision.handle_locally {
            self.table.insert(body.chat_id, body.node, now);
        }
        Ok(Self::seal_to_many(decision.forward_to, |n| {
            packet::seal_announce(&n.epk.enc(), self_keypair, &body)
        }))
    }

    /// Start a lookup for who hosts `chat_id` (`GET_NODES`).
    /// The lookup is signed and addressed under a fresh ephemeral keypair
    /// rather than our permanent identity, so a relay can't link a lookup to
    /// whichever chat we eventually join. Returns the forwarding packets to
    /// send and the self-request slot index used to match the eventual
    /// `SEND_NODES` reply, or `None` if the self-request table is full.
    pub fn get_nodes(
        &mut self,
        dht: &dyn Dht,
        chat_id: Epk,
        self_addr: SocketAddr,
        cfg: &Config,
        now: u64,
    ) -> Option<(usize, Vec<(SocketAddr, Vec<u8>)>)> {
        let ephemeral = ExtendedKeypair::generate();
        let req_id = crypto::random_64b();
        let asker_node = Node {
            epk: ephemeral.epk(),
            ip_port: IpPort::udp(self_addr),
        };
        let body = packet::GetNodesBody::build(&ephemeral, chat_id, req_id, asker_node, now);

        let decision = dispatch::dispatch_packet(dht, &ephemeral.epk(), &chat_id, cfg.max_gca_sent_nodes, true);
        let packets = Self::seal_to_many(decision.forward_to, |n| packet::seal_get_nodes(&n.epk.enc(), &ephemeral, &body));

        let idx = self.self_requests.add(chat_id, req_id, ephemeral, now)?;
        Some((idx, packets))
    }

    /// Handle an inbound `GET_NODES`: verify its signature, then either
    /// answer directly to the asker's embedded `self_node` (we're among the
    /// closest to `chat_id`) or relay it further in.
    pub fn receive_get_nodes(
        &mut self,
        dht: &dyn Dht,
        self_keypair: &ExtendedKeypair,
        envelope: &Envelope,
        cfg: &Config,
    ) -> Result<Vec<(SocketAddr, Vec<u8>)>> {
        let body = packet::open_get_nodes(envelope, self_keypair)?;
        if !body.verify() {
            return Err(Error::Decrypt);
        }

        let decision = dispatch::dispatch_packet(dht, &self_keypair.epk(), &body.chat_id, cfg.max_gca_sent_nodes, false);
        if decision.handle_locally {
            let nodes = self.table.nodes_for_chat(&body.chat_id, cfg.max_gca_sent_nodes);
            let bytes = packet::seal_send_nodes(&body.node.epk.enc(), self_keypair, body.req_id, &nodes)?;
            return Ok(vec![(body.node.ip_port.addr, bytes)]);
        }
        Ok(Self::seal_to_many(decision.forward_to, |n| {
            packet::seal_get_nodes(&n.epk.enc(), self_keypair, &body)
        }))
    }

    /// Apply an inbound `SEND_NODES` reply against the matching self-request,
    /// decrypting with the ephemeral keypair the lookup was sent under.
    pub fn receive_send_nodes(&mut self, envelope: &Envelope, max_nodes: usize) -> Result<()> {
        let EnvelopeExtra::ReqId(req_id) = envelope.extra else {
            return Err(Error::MalformedPacket("send_nodes missing req_id"));
        };
        let request = self
            .self_requests
            .find_by_req_id(req_id)
            .ok_or(Error::MalformedPacket("send_nodes for unknown request"))?;
        let (_, nodes) = packet::open_send_nodes(envelope, &request.ephemeral_keypair, max_nodes)?;
        self.self_requests.add_response_nodes(req_id, nodes);
        Ok(())
    }

    /// Answer a liveness `PING_REQUEST` against one of our table entries.
    pub fn receive_ping_request(
        &self,
        self_keypair: &ExtendedKeypair,
        envelope: &Envelope,
        from: SocketAddr,
    ) -> Result<(SocketAddr, Vec<u8>)> {
        let ping_id = packet::open_ping_request(envelope, self_keypair)?;
        let bytes = packet::seal_ping_response(&envelope.sender_enc_pk, self_keypair, ping_id)?;
        Ok((from, bytes))
    }

    /// Apply a `PING_RESPONSE`: refresh the matching table entry's liveness
    /// timestamp.
    pub fn receive_ping_response(&mut self, self_keypair: &ExtendedKeypair, envelope: &Envelope, now: u64) -> Result<()> {
        let ping_id = packet::open_ping_response(envelope, self_keypair)?;
        self.table.confirm_ping(&envelope.sender_enc_pk, ping_id, now);
        Ok(())
    }

    /// Currently known hosts for `chat_id` ('s
    /// `gca_get_requested_nodes`), up to `max_gca_sent_nodes` entries.
    pub fn requested_nodes(&self, chat_id: &Epk, cfg: &Config) -> Vec<Node> {
        self.self_requests.nodes_for_chat(chat_id, cfg.max_gca_sent_nodes)
    }

    /// Forget any self-requests for a chat we've since joined ('s
    /// `gca_cleanup`).
    pub fn cleanup_chat(&mut self, chat_id: &Epk) {
        self.self_requests.cleanup_chat(chat_id);
    }

    /// Per-tick housekeeping (`do_gca`): expire stale
    /// announcements, then ping whatever is left that's due.
    pub fn tick(&mut self, clock: &dyn Clock, self_keypair: &ExtendedKeypair, cfg: &Config) -> Vec<(SocketAddr, Vec<u8>)> {
        let now = clock.unix_time();

        let expired: Vec<usize> = self
            .table
            .iter_mut().filter(|(_, entry)| now.saturating_sub(entry.last_rcvd_ping) > cfg.gca_nodes_expiration)
            .map(|(idx, _)| idx)
            .collect();
        for idx in expired {
            tracing::debug!(slot = idx, "announce node timed out");
            self.table.expire(idx);
        }

        let mut outgoing = Vec::new();
        for (_, entry) in self.table.iter_mut() {
            if now.saturating_sub(entry.last_sent_ping) <= cfg.gca_ping_interval {
                continue;
            }
            let ping_id = crypto::random_64b();
            entry.ping_id = ping_id;
            entry.last_sent_ping = now;
            if let Ok(bytes) = packet::seal_ping_request(&entry.node.epk.enc(), self_keypair, ping_id) {
                outgoing.push((entry.node.ip_port.addr, bytes));
            }
        }
        outgoing
    }

    fn seal_to_many(nodes: Vec<Node>, seal: impl Fn(&Node) -> Result<Vec<u8>>) -> Vec<(SocketAddr, Vec<u8>)> {
        nodes
            .into_iter().filter_map(|n| seal(&n).ok().map(|bytes| (n.ip_port.addr, bytes)))
            .collect()}
}

impl Default for GcAnnounce {
    fn default() -> Self {
        Self::new()
    }
}

/// Send every `(addr, bytes)` pair produced by [`GcAnnounce`] methods out
/// over `transport`, logging (not propagating) individual send failures —
/// one unreachable forwarding target shouldn't abort the whole round.
pub fn flush_outgoing(transport: &dyn Transport, outgoing: Vec<(SocketAddr, Vec<u8>)>) {
    for (addr, bytes) in outgoing {
        if let Err(err) = transport.send_to(addr, &bytes) {
            tracing::warn!(%addr, error = %err, "failed to send announce packet");
        }
    }
}
