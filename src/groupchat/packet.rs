//! Group-chat wire packets: the `INVITE_*`/`SYNC_*`
//! handshake and the `GM_*` gossip kinds, each sealed through the shared
//! envelope. Variable-length fields (nicknames, topics, message text) are
//! length-prefixed with a `u32`; fixed-size certs and EPKs are encoded
//! exactly as `cert`/`crypto` define them.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use crate::cert::{CommonCert, InviteCert, SemiInviteCert, COMMON_CERT_SIZE, INVITE_CERT_SIZE, SEMI_INVITE_CERT_SIZE};
use crate::config::MAX_CERTIFICATES_NUM;
use crate::crypto::{Epk, ExtendedKeypair, ENC_KEY_SIZE, EPK_SIZE};
use crate::error::{Error, Result};
use crate::groupchat::gossip::GossipMessage;
use crate::groupchat::invite::{InviteRequest, InviteResponse};
use crate::groupchat::peer::{Peer, Role, Status};
use crate::groupchat::sync::{SyncRequest, SyncResponse};
use crate::node::IpPort;
use crate::wire::{Envelope, EnvelopeExtra, WireType};

fn write_lenpfx(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn read_lenpfx<'a>(data: &'a [u8], pos: &mut usize) -> Result<&'a [u8]> {
    if data.len() < *pos + 4 {
        return Err(Error::MalformedPacket("truncated length prefix"));
    }
    let len = u32::from_be_bytes(data[*pos..*pos + 4].try_into().unwrap()) as usize;
    *pos += 4;
    if data.len() < *pos + len {
        return Err(Error::MalformedPacket("truncated length-prefixed field"));
    }
    let field = &data[*pos..*pos + len];
    *pos += len;
    Ok(field)
}

fn read_u64(data: &[u8], pos: &mut usize) -> Result<u64> {
    if data.len() < *pos + 8 {
        return Err(Error::MalformedPacket("truncated u64 field"));
    }
    let value = u64::from_be_bytes(data[*pos..*pos + 8].try_into().unwrap());
    *pos += 8;
    Ok(value)
}

fn read_u32(data: &[u8], pos: &mut usize) -> Result<u32> {
    if data.len() < *pos + 4 {
        return Err(Error::MalformedPacket("truncated u32 field"));
    }
    let value = u32::from_be_bytes(data[*pos..*pos + 4].try_into().unwrap());
    *pos += 4;
    Ok(value)
}

fn status_to_byte(status: Status) -> u8 {
    match status {
        Status::None => 0,
        Status::Online => 1,
        Status::Offline => 2,
        Status::Away => 3,
        Status::Busy => 4,
        Status::Invalid => 5,
    }
}

fn status_from_byte(b: u8) -> Result<Status> {
    Ok(match b {
        0 => Status::None,
        1 => Status::Online,
        2 => Status::Offline,
        3 => Status::Away,
        4 => Status::Busy,
        5 => Status::Invalid,
        _ => return Err(Error::MalformedPacket("unknown status byte")),
    })
}

/// Fixed 20-byte `ip_port` encoding: `present:1 | tcp:1 | v6-mapped addr:16 |
/// port:2`, so a peer record's size doesn't depend on whether the address
/// family is v4 or v6.
const IP_PORT_SIZE: usize = 20;

fn encode_ip_port(ip_port: &Option<IpPort>) -> [u8; IP_PORT_SIZE] {
    let mut out = [0u8; IP_PORT_SIZE];
    if let Some(ip) = ip_port {
        out[0] = 1;
        out[1] = ip.tcp as u8;
        let v6 = match ip.addr.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        out[2..18].copy_from_slice(&v6.octets());
        out[18..20].copy_from_slice(&ip.addr.port().to_be_bytes());
    }
    out
}

fn decode_ip_port(bytes: &[u8]) -> Result<Option<IpPort>> {
    if bytes.len() != IP_PORT_SIZE {
        return Err(Error::MalformedPacket("truncated ip_port"));
    }
    if bytes[0] == 0 {
        return Ok(None);
    }
    let tcp = bytes[1] != 0;
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&bytes[2..18]);
    let v6 = Ipv6Addr::from(octets);
    let port = u16::from_be_bytes([bytes[18], bytes[19]]);
    let ip = v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6));
    Ok(Some(IpPort {
        addr: SocketAddr::new(ip, port),
        tcp,
    }))
}

/// A peer's `{epk, ip_port, nick, role, status, invite_cert, common_certs}`
/// as carried by `NEW_PEER` and `SYNC_RESPONSE` (§4.2.4).
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub epk: Epk,
    pub ip_port: Option<IpPort>,
    /// The sender's local `Peer::last_update_time` for this record, carried
    /// over the wire so a receiver can tell a stale resend apart from a
    /// genuine update instead of blindly overwriting (§4.2.3).
    pub last_update_time: u64,
    pub nick: String,
    pub role: Role,
    pub status: Status,
    pub invite_certificate: Option<InviteCert>,
    pub common_certificates: Vec<CommonCert>,
}

impl PeerRecord {
    pub fn from_peer(peer: &Peer) -> Self {
        Self {
            epk: peer.epk,
            ip_port: peer.ip_port,
            last_update_time: peer.last_update_time,
            nick: peer.nick.clone(),
            role: peer.role,
            status: peer.status,
            invite_certificate: peer.invite_certificate,
            common_certificates: peer.common_certificates.clone(),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.epk.as_bytes());
        out.extend_from_slice(&encode_ip_port(&self.ip_port));
        out.extend_from_slice(&self.last_update_time.to_be_bytes());
        write_lenpfx(out, self.nick.as_bytes());
        out.extend_from_slice(&self.role.0.to_be_bytes());
        out.push(status_to_byte(self.status));
        match &self.invite_certificate {
            Some(cert) => {
                out.push(1);
                out.extend_from_slice(&cert.encode());
            }
            None => out.push(0),
        }
        out.push(self.common_certificates.len().min(MAX_CERTIFICATES_NUM) as u8);
        for cert in self.common_certificates.iter().take(MAX_CERTIFICATES_NUM) {
            out.extend_from_slice(&cert.encode());
        }
    }

    fn decode(data: &[u8], pos: &mut usize) -> Result<Self> {
        if data.len() < *pos + EPK_SIZE {
            return Err(Error::MalformedPacket("truncated peer record epk"));
        }
        let mut epk_bytes = [0u8; EPK_SIZE];
        epk_bytes.copy_from_slice(&data[*pos..*pos + EPK_SIZE]);
        *pos += EPK_SIZE;
        let epk = Epk::from_bytes(epk_bytes);

        if data.len() < *pos + IP_PORT_SIZE {
            return Err(Error::MalformedPacket("truncated peer record ip_port"));
        }
        let ip_port = decode_ip_port(&data[*pos..*pos + IP_PORT_SIZE])?;
        *pos += IP_PORT_SIZE;

        let last_update_time = read_u64(data, pos)?;

        let nick = String::from_utf8_lossy(read_lenpfx(data, pos)?).into_owned();

        if data.len() < *pos + 8 {
            return Err(Error::MalformedPacket("truncated peer record role"));
        }
        let role = Role(u64::from_be_bytes(data[*pos..*pos + 8].try_into().unwrap()));
        *pos += 8;

        let status = status_from_byte(*data.get(*pos).ok_or(Error::MalformedPacket("truncated peer record status"))?)?;
        *pos += 1;

        let has_invite = *data.get(*pos).ok_or(Error::MalformedPacket("truncated peer record invite flag"))?;
        *pos += 1;
        let invite_certificate = if has_invite == 1 {
            if data.len() < *pos + INVITE_CERT_SIZE {
                return Err(Error::MalformedPacket("truncated peer record invite cert"));
            }
            let cert = InviteCert::decode(&data[*pos..*pos + INVITE_CERT_SIZE])?;
            *pos += INVITE_CERT_SIZE;
            Some(cert)
        } else {
            None
        };

        let cert_count = *data.get(*pos).ok_or(Error::MalformedPacket("truncated peer record cert count"))? as usize;
        *pos += 1;
        let mut common_certificates = Vec::with_capacity(cert_count);
        for _ in 0..cert_count {
            if data.len() < *pos + COMMON_CERT_SIZE {
                return Err(Error::MalformedPacket("truncated peer record common cert"));
            }
            let mut cert_bytes = [0u8; COMMON_CERT_SIZE];
            cert_bytes.copy_from_slice(&data[*pos..*pos + COMMON_CERT_SIZE]);
            common_certificates.push(CommonCert::decode(&cert_bytes)?);
            *pos += COMMON_CERT_SIZE;
        }

        Ok(Self {
            epk,
            ip_port,
            last_update_time,
            nick,
            role,
            status,
            invite_certificate,
            common_certificates,
        })
    }
}

// ---- INVITE_REQUEST / INVITE_RESPONSE  ----

pub fn seal_invite_request(
    recv_enc_pk: &[u8; ENC_KEY_SIZE],
    send_keypair: &ExtendedKeypair,
    request: &InviteRequest,
) -> Result<Vec<u8>> {
    Envelope::seal(
        WireType::InviteRequest,
        recv_enc_pk,
        send_keypair,
        EnvelopeExtra::None,
        &request.semi.encode(),
    )
}

pub fn open_invite_request(envelope: &Envelope, recv_keypair: &ExtendedKeypair) -> Result<InviteRequest> {
    let plaintext = envelope.open(recv_keypair)?;
    if plaintext.len() != SEMI_INVITE_CERT_SIZE {
        return Err(Error::MalformedPacket("invite_request wrong size"));
    }
    let mut bytes = [0u8; SEMI_INVITE_CERT_SIZE];
    bytes.copy_from_slice(&plaintext);
    Ok(InviteRequest {
        semi: SemiInviteCert::decode(&bytes)?,
    })
}

pub fn seal_invite_response(
    recv_enc_pk: &[u8; ENC_KEY_SIZE],
    send_keypair: &ExtendedKeypair,
    response: &InviteResponse,
) -> Result<Vec<u8>> {
    let mut plaintext = Vec::with_capacity(INVITE_CERT_SIZE + EPK_SIZE * 2 + 4 + response.topic.len());
    plaintext.extend_from_slice(&response.cert.encode());
    plaintext.extend_from_slice(response.chat_id.as_bytes());
    plaintext.extend_from_slice(response.founder.as_bytes());
    write_lenpfx(&mut plaintext, response.topic.as_bytes());
    Envelope::seal(WireType::InviteResponse, recv_enc_pk, send_keypair, EnvelopeExtra::None, &plaintext)
}

pub fn open_invite_response(envelope: &Envelope, recv_keypair: &ExtendedKeypair) -> Result<InviteResponse> {
    let data = envelope.open(recv_keypair)?;
    let mut pos = 0;

    if data.len() < INVITE_CERT_SIZE {
        return Err(Error::MalformedPacket("invite_response too short"));
    }
    let cert = InviteCert::decode(&data[..INVITE_CERT_SIZE])?;
    pos += INVITE_CERT_SIZE;

    if data.len() < pos + EPK_SIZE * 2 {
        return Err(Error::MalformedPacket("invite_response missing chat/founder epk"));
    }
    let mut chat_id_bytes = [0u8; EPK_SIZE];
    chat_id_bytes.copy_from_slice(&data[pos..pos + EPK_SIZE]);
    pos += EPK_SIZE;
    let mut founder_bytes = [0u8; EPK_SIZE];
    founder_bytes.copy_from_slice(&data[pos..pos + EPK_SIZE]);
    pos += EPK_SIZE;

    let topic = String::from_utf8_lossy(read_lenpfx(&data, &mut pos)?).into_owned();

    Ok(InviteResponse {
        cert,
        chat_id: Epk::from_bytes(chat_id_bytes),
        founder: Epk::from_bytes(founder_bytes),
        topic,
    })
}

// ---- SYNC_REQUEST / SYNC_RESPONSE  ----

pub fn seal_sync_request(
    recv_enc_pk: &[u8; ENC_KEY_SIZE],
    send_keypair: &ExtendedKeypair,
    request: &SyncRequest,
) -> Result<Vec<u8>> {
    Envelope::seal(
        WireType::SyncRequest,
        recv_enc_pk,
        send_keypair,
        EnvelopeExtra::None,
        &request.last_synced_time.to_be_bytes(),
    )
}

pub fn open_sync_request(envelope: &Envelope, recv_keypair: &ExtendedKeypair) -> Result<SyncRequest> {
    let data = envelope.open(recv_keypair)?;
    if data.len() != 8 {
        return Err(Error::MalformedPacket("sync_request wrong size"));
    }
    Ok(SyncRequest {
        last_synced_time: u64::from_be_bytes(data.try_into().unwrap()),
    })
}

/// `records` is supplied separately from `response.peers` (the [`Node`]-only
/// view `Chat::peer_list_nodes` builds) because a sync reply needs each
/// peer's full record, not just its address.
pub fn seal_sync_response(
    recv_enc_pk: &[u8; ENC_KEY_SIZE],
    send_keypair: &ExtendedKeypair,
    response: &SyncResponse,
    records: &[PeerRecord],
) -> Result<Vec<u8>> {
    let mut plaintext = Vec::new();
    plaintext.extend_from_slice(&response.server_time.to_be_bytes());
    write_lenpfx(&mut plaintext, response.topic.as_bytes());
    plaintext.extend_from_slice(&(records.len() as u32).to_be_bytes());
    for record in records {
        record.encode(&mut plaintext);
    }
    Envelope::seal(WireType::SyncResponse, recv_enc_pk, send_keypair, EnvelopeExtra::None, &plaintext)
}

pub fn open_sync_response(envelope: &Envelope, recv_keypair: &ExtendedKeypair) -> Result<(SyncResponse, Vec<PeerRecord>)> {
    let data = envelope.open(recv_keypair)?;
    let mut pos = 0;
    let server_time = read_u64(&data, &mut pos)?;
    let topic = String::from_utf8_lossy(read_lenpfx(&data, &mut pos)?).into_owned();
    let count = read_u32(&data, &mut pos)? as usize;

    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        records.push(PeerRecord::decode(&data, &mut pos)?);
    }

    Ok((
        SyncResponse {
            server_time,
            peers: Vec::new(),
            topic,
        },
        records,
    ))
}

// ---- GM_* gossip  ----

fn encode_gossip(msg: &GossipMessage) -> (WireType, Vec<u8>) {
    match msg {
        GossipMessage::Ping => (WireType::Ping, Vec::new()),
        GossipMessage::Status(status, ts) => {
            let mut out = ts.to_be_bytes().to_vec();
            out.push(status_to_byte(*status));
            (WireType::Status, out)
        }
        GossipMessage::NewPeer(epk) => (WireType::NewPeer, epk.as_bytes().to_vec()),
        GossipMessage::ChangeNick(nick, ts) => {
            let mut out = ts.to_be_bytes().to_vec();
            out.extend_from_slice(nick.as_bytes());
            (WireType::ChangeNick, out)
        }
        GossipMessage::ChangeTopic(topic, ts) => {
            let mut out = ts.to_be_bytes().to_vec();
            out.extend_from_slice(topic.as_bytes());
            (WireType::ChangeTopic, out)
        }
        GossipMessage::Plain { message_number, text } => {
            let mut out = message_number.to_be_bytes().to_vec();
            out.extend_from_slice(text.as_bytes());
            (WireType::Message, out)
        }
        GossipMessage::Action(cert) => (WireType::Action, cert.encode().to_vec()),
    }
}

fn decode_gossip(wire_type: WireType, data: &[u8]) -> Result<GossipMessage> {
    match wire_type {
        WireType::Ping => Ok(GossipMessage::Ping),
        WireType::Status => {
            if data.len() != 9 {
                return Err(Error::MalformedPacket("status payload wrong size"));
            }
            let ts = u64::from_be_bytes(data[..8].try_into().unwrap());
            Ok(GossipMessage::Status(status_from_byte(data[8])?, ts))
        }
        WireType::NewPeer => {
            if data.len() != EPK_SIZE {
                return Err(Error::MalformedPacket("new_peer payload wrong size"));
            }
            let mut bytes = [0u8; EPK_SIZE];
            bytes.copy_from_slice(data);
            Ok(GossipMessage::NewPeer(Epk::from_bytes(bytes)))
        }
        WireType::ChangeNick => {
            if data.len() < 8 {
                return Err(Error::MalformedPacket("change_nick payload too short"));
            }
            let ts = u64::from_be_bytes(data[..8].try_into().unwrap());
            let nick = String::from_utf8_lossy(&data[8..]).into_owned();
            Ok(GossipMessage::ChangeNick(nick, ts))
        }
        WireType::ChangeTopic => {
            if data.len() < 8 {
                return Err(Error::MalformedPacket("change_topic payload too short"));
            }
            let ts = u64::from_be_bytes(data[..8].try_into().unwrap());
            let topic = String::from_utf8_lossy(&data[8..]).into_owned();
            Ok(GossipMessage::ChangeTopic(topic, ts))
        }
        WireType::Message => {
            if data.len() < 4 {
                return Err(Error::MalformedPacket("message payload too short"));
            }
            let message_number = u32::from_be_bytes(data[..4].try_into().unwrap());
            let text = String::from_utf8_lossy(&data[4..]).into_owned();
            Ok(GossipMessage::Plain { message_number, text })
        }
        WireType::Action => {
            if data.len() != COMMON_CERT_SIZE {
                return Err(Error::MalformedPacket("action payload wrong size"));
            }
            let mut bytes = [0u8; COMMON_CERT_SIZE];
            bytes.copy_from_slice(data);
            Ok(GossipMessage::Action(CommonCert::decode(&bytes)?))
        }
        _ => Err(Error::MalformedPacket("not a gossip wire type")),
    }
}

pub fn seal_gossip(recv_enc_pk: &[u8; ENC_KEY_SIZE], send_keypair: &ExtendedKeypair, msg: &GossipMessage) -> Result<Vec<u8>> {
    let (wire_type, payload) = encode_gossip(msg);
    Envelope::seal(wire_type, recv_enc_pk, send_keypair, EnvelopeExtra::None, &payload)
}

pub fn open_gossip(envelope: &Envelope, recv_keypair: &ExtendedKeypair) -> Result<GossipMessage> {
    let plaintext = envelope.open(recv_keypair)?;
    decode_gossip(envelope.wire_type, &plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert;
    use crate::groupchat::chat::Chat;

    #[test]
    fn invite_request_response_roundtrip() {
        let joiner = ExtendedKeypair::generate();
        let inviter = ExtendedKeypair::generate();

        let request = crate::groupchat::invite::send_invite_request(&joiner, 10);
        let packet = seal_invite_request(&inviter.enc_public(), &joiner, &request).unwrap();
        let envelope = Envelope::parse(&packet).unwrap();
        let decoded = open_invite_request(&envelope, &inviter).unwrap();
        assert_eq!(decoded.semi, request.semi);

        let mut inviter_chat = Chat::found(inviter, "inviter", 0);
        let response = crate::groupchat::invite::handle_invite_request(&mut inviter_chat, decoded, 11).unwrap();

        let packet = seal_invite_response(&joiner.enc_public(), &inviter_chat.self_keypair, &response).unwrap();
        let envelope = Envelope::parse(&packet).unwrap();
        let decoded_response = open_invite_response(&envelope, &joiner).unwrap();
        assert_eq!(decoded_response.chat_id, response.chat_id);
        assert_eq!(decoded_response.founder, response.founder);
        assert!(decoded_response.cert.verify_integrity());
    }

    #[test]
    fn sync_roundtrip_carries_peer_records() {
        let founder = ExtendedKeypair::generate();
        let mut chat = Chat::found(founder, "founder", 0);
        let peer_kp = ExtendedKeypair::generate();
        let semi = cert::make_invite_half(&peer_kp, 1);
        let invite_cert = cert::complete_invite(semi, &chat.self_keypair, 2).unwrap();
        let peer = chat.upsert_peer(peer_kp.epk(), 2);
        peer.nick = "bob".to_string();
        peer.invite_certificate = Some(invite_cert);
        peer.ip_port = Some(IpPort::udp("127.0.0.1:4000".parse().unwrap()));
        let records: Vec<PeerRecord> = chat.peers.values().map(PeerRecord::from_peer).collect();

        let requester = ExtendedKeypair::generate();
        let sync_request = crate::groupchat::sync::build_sync_request(&chat);
        let packet = seal_sync_request(&chat.self_keypair.enc_public(), &requester, &sync_request).unwrap();
        let envelope = Envelope::parse(&packet).unwrap();
        let decoded_request = open_sync_request(&envelope, &chat.self_keypair).unwrap();
        assert_eq!(decoded_request.last_synced_time, sync_request.last_synced_time);

        let response = crate::groupchat::sync::handle_sync_request(&chat, decoded_request, 100);
        let packet = seal_sync_response(&requester.enc_public(), &chat.self_keypair, &response, &records).unwrap();
        let envelope = Envelope::parse(&packet).unwrap();
        let (decoded_response, decoded_records) = open_sync_response(&envelope, &requester).unwrap();
        assert_eq!(decoded_response.server_time, 100);
        assert_eq!(decoded_records.len(), 1);
        assert_eq!(decoded_records[0].nick, "bob");
        assert!(decoded_records[0].invite_certificate.unwrap().verify_integrity());
    }

    #[test]
    fn gossip_change_nick_roundtrip() {
        let sender = ExtendedKeypair::generate();
        let recv = ExtendedKeypair::generate();
        let msg = GossipMessage::ChangeNick("new-nick".to_string(), 42);
        let packet = seal_gossip(&recv.enc_public(), &sender, &msg).unwrap();
        let envelope = Envelope::parse(&packet).unwrap();
        assert_eq!(open_gossip(&envelope, &recv).unwrap(), msg);
    }

    #[test]
    fn gossip_action_roundtrip_carries_common_cert() {
        let sender = ExtendedKeypair::generate();
        let recv = ExtendedKeypair::generate();
        let target = Epk::from_bytes([2u8; EPK_SIZE]);
        let cert = cert::make_common_cert(&sender, target, cert::CertType::Ban, 7);
        let msg = GossipMessage::Action(cert);

        let packet = seal_gossip(&recv.enc_public(), &sender, &msg).unwrap();
        let envelope = Envelope::parse(&packet).unwrap();
        let decoded = open_gossip(&envelope, &recv).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn gossip_ping_roundtrip_is_empty_payload() {
        let sender = ExtendedKeypair::generate();
        let recv = ExtendedKeypair::generate();
        let packet = seal_gossip(&recv.enc_public(), &sender, &GossipMessage::Ping).unwrap();
        let envelope = Envelope::parse(&packet).unwrap();
        assert_eq!(open_gossip(&envelope, &recv).unwrap(), GossipMessage::Ping);
    }
}
