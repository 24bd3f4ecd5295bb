//! Wire framing shared by every packet: the stable type byte and the
//! authenticated-encryption envelope.
//!
//! `[ type:1 | sender_ENC_pk:32 | {req_id:8 for SEND_NODES}{recipient_ENC_pk:32
//! for PING_REQUEST} | nonce:24 | ciphertext | MAC:16 ]`

use crate::crypto::{self, Epk, ExtendedKeypair, ENC_KEY_SIZE, NONCE_SIZE};
use crate::error::{Error, Result};

/// Maximum packet length: the UDP payload limit.
pub const MAX_PACKET_LEN: usize = 65507;

/// Stable wire type bytes. Numeric values are this crate's choice but must
/// stay fixed for interop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WireType {
    GcaAnnounce = 0x80,
    GcaGetNodes = 0x81,
    GcaSendNodes = 0x82,
    GcaPingRequest = 0x83,
    GcaPingResponse = 0x84,

    InviteRequest = 0x90,
    InviteResponse = 0x91,
    SyncRequest = 0x92,
    SyncResponse = 0x93,
    Ping = 0x94,
    Status = 0x95,
    NewPeer = 0x96,
    ChangeNick = 0x97,
    ChangeTopic = 0x98,
    Message = 0x99,
    Action = 0x9A,
}

impl WireType {
    pub fn from_byte(b: u8) -> Result<Self> {
        use WireType::*;
        Ok(match b {
            0x80 => GcaAnnounce,
            0x81 => GcaGetNodes,
            0x82 => GcaSendNodes,
            0x83 => GcaPingRequest,
            0x84 => GcaPingResponse,
            0x90 => InviteRequest,
            0x91 => InviteResponse,
            0x92 => SyncRequest,
            0x93 => SyncResponse,
            0x94 => Ping,
            0x95 => Status,
            0x96 => NewPeer,
            0x97 => ChangeNick,
            0x98 => ChangeTopic,
            0x99 => Message,
            0x9A => Action,
            _ => return Err(Error::MalformedPacket("unknown wire type byte")),
        })
    }
}

/// The extra header field interleaved ahead of the nonce for the two packet
/// kinds that need it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeExtra {
    None,
    ReqId(u64),
    RecipientEncKey([u8; ENC_KEY_SIZE]),
}

impl EnvelopeExtra {
    fn encoded_len(&self) -> usize {
        match self {
            EnvelopeExtra::None => 0,
            EnvelopeExtra::ReqId(_) => 8,
            EnvelopeExtra::RecipientEncKey(_) => ENC_KEY_SIZE,
        }
    }
}

/// A decoded-but-still-sealed packet.
pub struct Envelope {
    pub wire_type: WireType,
    pub sender_enc_pk: [u8; ENC_KEY_SIZE],
    pub extra: EnvelopeExtra,
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Seal `plaintext` for `recv_enc_pk` and frame it for the wire.
    pub fn seal(
        wire_type: WireType,
        recv_enc_pk: &[u8; ENC_KEY_SIZE],
        send_keypair: &ExtendedKeypair,
        extra: EnvelopeExtra,
        plaintext: &[u8],
    ) -> Result<Vec<u8>> {
        let nonce = crypto::new_nonce();
        let ciphertext = crypto::encrypt(recv_enc_pk, send_keypair, &nonce, plaintext)?;

        let mut out = Vec::with_capacity(1 + ENC_KEY_SIZE + extra.encoded_len() + NONCE_SIZE + ciphertext.len());
        out.push(wire_type as u8);
        out.extend_from_slice(&send_keypair.enc_public());
        match extra {
            EnvelopeExtra::None => {}
            EnvelopeExtra::ReqId(id) => out.extend_from_slice(&id.to_be_bytes()),
            EnvelopeExtra::RecipientEncKey(pk) => out.extend_from_slice(&pk),
        }
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Parse framing without decrypting. The extra header field (if any) is
    /// determined by `wire_type` itself: `GcaSendNodes` carries a `req_id`,
    /// `GcaPingRequest` carries the intended recipient's key, everything
    /// else carries neither.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.is_empty() || data.len() > MAX_PACKET_LEN {
            return Err(Error::MalformedPacket("packet length out of bounds"));
        }

        let wire_type = WireType::from_byte(data[0])?;
        let has_req_id = wire_type == WireType::GcaSendNodes;
        let has_recipient_key = wire_type == WireType::GcaPingRequest;
        let mut pos = 1;

        if data.len() < pos + ENC_KEY_SIZE {
            return Err(Error::MalformedPacket("truncated sender key"));
        }
        let mut sender_enc_pk = [0u8; ENC_KEY_SIZE];
        sender_enc_pk.copy_from_slice(&data[pos..pos + ENC_KEY_SIZE]);
        pos += ENC_KEY_SIZE;

        let extra = if has_req_id {
            if data.len() < pos + 8 {
                return Err(Error::MalformedPacket("truncated req_id"));
            }
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&data[pos..pos + 8]);
            pos += 8;
            EnvelopeExtra::ReqId(u64::from_be_bytes(buf))
        } else if has_recipient_key {
            if data.len() < pos + ENC_KEY_SIZE {
                return Err(Error::MalformedPacket("truncated recipient key"));
            }
            let mut buf = [0u8; ENC_KEY_SIZE];
            buf.copy_from_slice(&data[pos..pos + ENC_KEY_SIZE]);
            pos += ENC_KEY_SIZE;
            EnvelopeExtra::RecipientEncKey(buf)
        } else {
            EnvelopeExtra::None
        };

        if data.len() < pos + NONCE_SIZE {
            return Err(Error::MalformedPacket("truncated nonce"));
        }
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&data[pos..pos + NONCE_SIZE]);
        pos += NONCE_SIZE;

        Ok(Self {
            wire_type,
            sender_enc_pk,
            extra,
            nonce,
            ciphertext: data[pos..].to_vec(),
        })
    }

    pub fn open(&self, recv_keypair: &ExtendedKeypair) -> Result<Vec<u8>> {
        crypto::decrypt(&self.sender_enc_pk, recv_keypair, &self.nonce, &self.ciphertext)
    }
}

/// Sender identity that doubles as an `Epk` (so packet handlers can reject
/// self-originated loops).
pub fn sender_is_self(sender_enc_pk: &[u8; ENC_KEY_SIZE], self_epk: &Epk) -> bool {
    *sender_enc_pk == self_epk.enc()
}
