//! The five `GCA_*` wire packets: seal/open each payload
//! through the shared [`crate::wire::Envelope`] framing.
//!
//! `ANNOUNCE` and `GET_NODES` each carry a self-contained, signed body
//! (`{chat_id, [req_id,] self_node, timestamp, sig}`) rather
//! than just the bare `chat_id` a single-hop exchange would need. The sig
//! is end-to-end (over the announcer's/asker's own SIG key) while the
//! envelope's AEAD is hop-to-hop, so a converging-forward relay can
//! re-encrypt the same body for the next hop without invalidating it, and a
//! terminal node can reply directly to the original asker's `self_node`
//! instead of the immediate sender of the last hop.

use crate::crypto::{self, Epk, ExtendedKeypair, EPK_SIZE, SIGNATURE_SIZE};
use crate::error::{Error, Result};
use crate::node::{self, Node};
use crate::wire::{Envelope, EnvelopeExtra, WireType};

/// `ANNOUNCE`: "I host `chat_id`, here's how to reach me."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnounceBody {
    pub chat_id: Epk,
    pub node: Node,
    pub ts: u64,
    pub sig: [u8; SIGNATURE_SIZE],
}

impl AnnounceBody {
    fn signed_prefix(chat_id: &Epk, node: &Node, ts: u64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(EPK_SIZE + 64 + 8);
        buf.extend_from_slice(chat_id.as_bytes());
        buf.extend_from_slice(&node::pack_nodes(std::slice::from_ref(node)));
        buf.extend_from_slice(&ts.to_be_bytes());
        buf
    }

    /// Build and sign a fresh announcement of `node` hosting `chat_id`,
    /// using `node`'s own SIG key (`announcer_keypair`).
    pub fn build(announcer_keypair: &ExtendedKeypair, chat_id: Epk, node: Node, now: u64) -> Self {
        let prefix = Self::signed_prefix(&chat_id, &node, now);
        Self {
            chat_id,
            node,
            ts: now,
            sig: announcer_keypair.sign(&prefix),
        }
    }

    pub fn verify(&self) -> bool {
        let prefix = Self::signed_prefix(&self.chat_id, &self.node, self.ts);
        crypto::verify(&self.node.epk.sig(), &prefix, &self.sig)
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Self::signed_prefix(&self.chat_id, &self.node, self.ts);
        out.extend_from_slice(&self.sig);
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < EPK_SIZE {
            return Err(Error::MalformedPacket("announce payload too short"));
        }
        let mut chat_id_bytes = [0u8; EPK_SIZE];
        chat_id_bytes.copy_from_slice(&bytes[..EPK_SIZE]);
        let chat_id = Epk::from_bytes(chat_id_bytes);

        if bytes.len() < EPK_SIZE + SIGNATURE_SIZE {
            return Err(Error::MalformedPacket("announce payload too short"));
        }
        let sig_start = bytes.len() - SIGNATURE_SIZE;
        let ts_start = sig_start - 8;
        let nodes = node::unpack_nodes(&bytes[EPK_SIZE..ts_start], 1, false)?;
        let node = nodes
            .into_iter()
            .next()
            .ok_or(Error::MalformedPacket("announce carried no node"))?;

        let mut ts_bytes = [0u8; 8];
        ts_bytes.copy_from_slice(&bytes[ts_start..sig_start]);
        let mut sig = [0u8; SIGNATURE_SIZE];
        sig.copy_from_slice(&bytes[sig_start..]);

        Ok(Self {
            chat_id,
            node,
            ts: u64::from_be_bytes(ts_bytes),
            sig,
        })
    }
}

pub fn seal_announce(recv_enc_pk: &[u8; EPK_SIZE], send_keypair: &ExtendedKeypair, body: &AnnounceBody) -> Result<Vec<u8>> {
    Envelope::seal(
        WireType::GcaAnnounce,
        recv_enc_pk,
        send_keypair,
        EnvelopeExtra::None,
        &body.encode(),
    )
}

pub fn open_announce(envelope: &Envelope, recv_keypair: &ExtendedKeypair) -> Result<AnnounceBody> {
    let plaintext = envelope.open(recv_keypair)?;
    AnnounceBody::decode(&plaintext)
}

/// `GET_NODES`: "who hosts `chat_id`?", tagged with the asker's `req_id` and
/// reachable `self_node` so a terminal node can reply straight back to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetNodesBody {
    pub chat_id: Epk,
    pub req_id: u64,
    pub node: Node,
    pub ts: u64,
    pub sig: [u8; SIGNATURE_SIZE],
}

impl GetNodesBody {
    fn signed_prefix(chat_id: &Epk, req_id: u64, node: &Node, ts: u64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(EPK_SIZE + 8 + 64 + 8);
        buf.extend_from_slice(chat_id.as_bytes());
        buf.extend_from_slice(&req_id.to_be_bytes());
        buf.extend_from_slice(&node::pack_nodes(std::slice::from_ref(node)));
        buf.extend_from_slice(&ts.to_be_bytes());
        buf
    }

    /// Build and sign a lookup for `chat_id`, under the asker's (typically
    /// ephemeral) keypair.
    pub fn build(asker_keypair: &ExtendedKeypair, chat_id: Epk, req_id: u64, node: Node, now: u64) -> Self {
        let prefix = Self::signed_prefix(&chat_id, req_id, &node, now);
        Self {
            chat_id,
            req_id,
            node,
            ts: now,
            sig: asker_keypair.sign(&prefix),
        }
    }

    pub fn verify(&self) -> bool {
        let prefix = Self::signed_prefix(&self.chat_id, self.req_id, &self.node, self.ts);
        crypto::verify(&self.node.epk.sig(), &prefix, &self.sig)
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Self::signed_prefix(&self.chat_id, self.req_id, &self.node, self.ts);
        out.extend_from_slice(&self.sig);
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < EPK_SIZE + 8 {
            return Err(Error::MalformedPacket("get_nodes payload too short"));
        }
        let mut chat_id_bytes = [0u8; EPK_SIZE];
        chat_id_bytes.copy_from_slice(&bytes[..EPK_SIZE]);
        let mut req_id_bytes = [0u8; 8];
        req_id_bytes.copy_from_slice(&bytes[EPK_SIZE..EPK_SIZE + 8]);

        if bytes.len() < EPK_SIZE + 8 + SIGNATURE_SIZE {
            return Err(Error::MalformedPacket("get_nodes payload too short"));
        }
        let sig_start = bytes.len() - SIGNATURE_SIZE;
        let ts_start = sig_start - 8;
        let nodes = node::unpack_nodes(&bytes[EPK_SIZE + 8..ts_start], 1, false)?;
        let node = nodes
            .into_iter()
            .next()
            .ok_or(Error::MalformedPacket("get_nodes carried no node"))?;

        let mut ts_bytes = [0u8; 8];
        ts_bytes.copy_from_slice(&bytes[ts_start..sig_start]);
        let mut sig = [0u8; SIGNATURE_SIZE];
        sig.copy_from_slice(&bytes[sig_start..]);

        Ok(Self {
            chat_id: Epk::from_bytes(chat_id_bytes),
            req_id: u64::from_be_bytes(req_id_bytes),
            node,
            ts: u64::from_be_bytes(ts_bytes),
            sig,
        })
    }
}

pub fn seal_get_nodes(recv_enc_pk: &[u8; EPK_SIZE], send_keypair: &ExtendedKeypair, body: &GetNodesBody) -> Result<Vec<u8>> {
    Envelope::seal(
        WireType::GcaGetNodes,
        recv_enc_pk,
        send_keypair,
        EnvelopeExtra::None,
        &body.encode(),
    )
}

pub fn open_get_nodes(envelope: &Envelope, recv_keypair: &ExtendedKeypair) -> Result<GetNodesBody> {
    let plaintext = envelope.open(recv_keypair)?;
    GetNodesBody::decode(&plaintext)
}

/// `SEND_NODES`: reply to either `ANNOUNCE` or `GET_NODES`, carrying the
/// `req_id` the requester used so it can match the reply to its lookup.
pub fn seal_send_nodes(
    recv_enc_pk: &[u8; EPK_SIZE],
    send_keypair: &ExtendedKeypair,
    req_id: u64,
    nodes: &[Node],
) -> Result<Vec<u8>> {
    let plaintext = node::pack_nodes(nodes);
    Envelope::seal(
        WireType::GcaSendNodes,
        recv_enc_pk,
        send_keypair,
        EnvelopeExtra::ReqId(req_id),
        &plaintext,
    )
}

pub fn open_send_nodes(envelope: &Envelope, recv_keypair: &ExtendedKeypair, max_nodes: usize) -> Result<(u64, Vec<Node>)> {
    let EnvelopeExtra::ReqId(req_id) = envelope.extra else {
        return Err(Error::MalformedPacket("send_nodes missing req_id"));
    };
    let plaintext = envelope.open(recv_keypair)?;
    let nodes = node::unpack_nodes(&plaintext, max_nodes, false)?;
    Ok((req_id, nodes))
}

/// `PING_REQUEST`: liveness check against an announced node, with the
/// recipient's key interleaved into the header the way the original inserts
/// `node->client_id` after the sender's DHT key.
pub fn seal_ping_request(
    recv_enc_pk: &[u8; EPK_SIZE],
    send_keypair: &ExtendedKeypair,
    ping_id: u64,
) -> Result<Vec<u8>> {
    Envelope::seal(
        WireType::GcaPingRequest,
        recv_enc_pk,
        send_keypair,
        EnvelopeExtra::RecipientEncKey(*recv_enc_pk),
        &ping_id.to_be_bytes(),
    )
}

pub fn open_ping_request(envelope: &Envelope, recv_keypair: &ExtendedKeypair) -> Result<u64> {
    let plaintext = envelope.open(recv_keypair)?;
    if plaintext.len() != 8 {
        return Err(Error::MalformedPacket("ping_request payload wrong size"));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&plaintext);
    Ok(u64::from_be_bytes(buf))
}

/// `PING_RESPONSE`: echoes the `ping_id` back.
pub fn seal_ping_response(
    recv_enc_pk: &[u8; EPK_SIZE],
    send_keypair: &ExtendedKeypair,
    ping_id: u64,
) -> Result<Vec<u8>> {
    Envelope::seal(
        WireType::GcaPingResponse,
        recv_enc_pk,
        send_keypair,
        EnvelopeExtra::None,
        &ping_id.to_be_bytes(),
    )
}

pub fn open_ping_response(envelope: &Envelope, recv_keypair: &ExtendedKeypair) -> Result<u64> {
    let plaintext = envelope.open(recv_keypair)?;
    if plaintext.len() != 8 {
        return Err(Error::MalformedPacket("ping_response payload wrong size"));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&plaintext);
    Ok(u64::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::IpPort;

    #[test]
    fn announce_roundtrip() {
        let sender = ExtendedKeypair::generate();
        let recv = ExtendedKeypair::generate();
        let chat_id = Epk::from_bytes([7u8; EPK_SIZE]);
        let self_node = Node {
            epk: sender.epk(),
            ip_port: IpPort::udp("127.0.0.1:33445".parse().unwrap()),
        };
        let body = AnnounceBody::build(&sender, chat_id, self_node, 100);
        assert!(body.verify());

        let packet = seal_announce(&recv.enc_public(), &sender, &body).unwrap();
        let envelope = Envelope::parse(&packet).unwrap();
        assert_eq!(envelope.wire_type, WireType::GcaAnnounce);
        let payload = open_announce(&envelope, &recv).unwrap();
        assert_eq!(payload.chat_id, chat_id);
        assert_eq!(payload.node.epk, sender.epk());
        assert!(payload.verify());
    }

    #[test]
    fn tampered_announce_body_fails_verification() {
        let sender = ExtendedKeypair::generate();
        let chat_id = Epk::from_bytes([7u8; EPK_SIZE]);
        let self_node = Node {
            epk: sender.epk(),
            ip_port: IpPort::udp("127.0.0.1:33445".parse().unwrap()),
        };
        let mut body = AnnounceBody::build(&sender, chat_id, self_node, 100);
        body.ts += 1;
        assert!(!body.verify());
    }

    #[test]
    fn get_nodes_roundtrip_carries_req_id_and_asker_node() {
        let sender = ExtendedKeypair::generate();
        let recv = ExtendedKeypair::generate();
        let chat_id = Epk::from_bytes([3u8; EPK_SIZE]);
        let asker_node = Node {
            epk: sender.epk(),
            ip_port: IpPort::udp("127.0.0.1:9000".parse().unwrap()),
        };
        let body = GetNodesBody::build(&sender, chat_id, 55, asker_node, 10);

        let packet = seal_get_nodes(&recv.enc_public(), &sender, &body).unwrap();
        let envelope = Envelope::parse(&packet).unwrap();
        assert_eq!(envelope.extra, EnvelopeExtra::None);
        let got = open_get_nodes(&envelope, &recv).unwrap();
        assert_eq!(got.chat_id, chat_id);
        assert_eq!(got.req_id, 55);
        assert_eq!(got.node, asker_node);
        assert!(got.verify());
    }

    #[test]
    fn send_nodes_roundtrip_carries_req_id() {
        let sender = ExtendedKeypair::generate();
        let recv = ExtendedKeypair::generate();
        let node_a = Node {
            epk: Epk::from_bytes([1u8; EPK_SIZE]),
            ip_port: IpPort::udp("127.0.0.1:1".parse().unwrap()),
        };

        let packet = seal_send_nodes(&recv.enc_public(), &sender, 99, &[node_a]).unwrap();
        let envelope = Envelope::parse(&packet).unwrap();
        let (req_id, nodes) = open_send_nodes(&envelope, &recv, 4).unwrap();
        assert_eq!(req_id, 99);
        assert_eq!(nodes, vec![node_a]);
    }

    #[test]
    fn ping_request_response_roundtrip() {
        let sender = ExtendedKeypair::generate();
        let recv = ExtendedKeypair::generate();

        let req_packet = seal_ping_request(&recv.enc_public(), &sender, 123).unwrap();
        let req_envelope = Envelope::parse(&req_packet).unwrap();
        assert_eq!(open_ping_request(&req_envelope, &recv).unwrap(), 123);

        let resp_packet = seal_ping_response(&sender.enc_public(), &recv, 123).unwrap();
        let resp_envelope = Envelope::parse(&resp_packet).unwrap();
        assert_eq!(open_ping_response(&resp_envelope, &sender).unwrap(), 123);
    }
}
