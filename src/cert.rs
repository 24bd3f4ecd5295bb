//! Certificate algebra: invite certificates and moderation (common)
//! certificates. Pure data + pure functions — no chat state lives here, so
//! `groupchat::moderation` can unit test authorization separately from
//! integrity.
//!
//! Byte layout follows the original `group_chats.h` definitions exactly:
//! `SEMI_INVITE_CERTIFICATE_SIGNED_SIZE` = 137, `INVITE_CERTIFICATE_SIGNED_SIZE`
//! = 273, `COMMON_CERTIFICATE_SIGNED_SIZE` = 201.

use crate::crypto::{Epk, ExtendedKeypair, EPK_SIZE, SIGNATURE_SIZE};
use crate::error::{Error, Result};

pub const SEMI_INVITE_CERT_SIZE: usize = 1 + EPK_SIZE + 8 + SIGNATURE_SIZE;
pub const INVITE_CERT_SIZE: usize = SEMI_INVITE_CERT_SIZE + EPK_SIZE + 8 + SIGNATURE_SIZE;
pub const COMMON_CERT_SIZE: usize = 1 + EPK_SIZE + EPK_SIZE + 8 + SIGNATURE_SIZE;

/// `MAX_CERTIFICATES_NUM`: common certificates a peer record carries.
pub const MAX_CERTIFICATES_NUM: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CertType {
    Invite = 0,
    Ban = 1,
    OpCredentials = 2,
}

impl CertType {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(CertType::Invite),
            1 => Ok(CertType::Ban),
            2 => Ok(CertType::OpCredentials),
            _ => Err(Error::CertCorrupt),
        }
    }
}

/// The invitee's half of an invite certificate, before the inviter
/// countersigns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemiInviteCert {
    pub invitee: Epk,
    pub invitee_ts: u64,
    pub invitee_sig: [u8; SIGNATURE_SIZE],
}

impl SemiInviteCert {
    fn signed_prefix(invitee: &Epk, ts: u64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + EPK_SIZE + 8);
        buf.push(CertType::Invite as u8);
        buf.extend_from_slice(invitee.as_bytes());
        buf.extend_from_slice(&ts.to_be_bytes());
        buf
    }

    pub fn encode(&self) -> [u8; SEMI_INVITE_CERT_SIZE] {
        let mut out = [0u8; SEMI_INVITE_CERT_SIZE];
        let prefix = Self::signed_prefix(&self.invitee, self.invitee_ts);
        out[..prefix.len()].copy_from_slice(&prefix);
        out[prefix.len()..].copy_from_slice(&self.invitee_sig);
        out
    }

    pub fn decode(bytes: &[u8; SEMI_INVITE_CERT_SIZE]) -> Result<Self> {
        if CertType::from_byte(bytes[0])? != CertType::Invite {
            return Err(Error::CertCorrupt);
        }
        let mut invitee = [0u8; EPK_SIZE];
        invitee.copy_from_slice(&bytes[1..1 + EPK_SIZE]);
        let mut ts_bytes = [0u8; 8];
        ts_bytes.copy_from_slice(&bytes[1 + EPK_SIZE..1 + EPK_SIZE + 8]);
        let mut sig = [0u8; SIGNATURE_SIZE];
        sig.copy_from_slice(&bytes[1 + EPK_SIZE + 8..]);
        Ok(Self {
            invitee: Epk::from_bytes(invitee),
            invitee_ts: u64::from_be_bytes(ts_bytes),
            invitee_sig: sig,
        })
    }

    pub fn verify_integrity(&self) -> bool {
        let prefix = Self::signed_prefix(&self.invitee, self.invitee_ts);
        crate::crypto::verify(&self.invitee.sig(), &prefix, &self.invitee_sig)
    }
}

/// A fully countersigned invite certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InviteCert {
    pub semi: SemiInviteCert,
    pub inviter: Epk,
    pub inviter_ts: u64,
    pub inviter_sig: [u8; SIGNATURE_SIZE],
}

impl InviteCert {
    fn inviter_signed_prefix(semi: &SemiInviteCert, inviter: &Epk, ts: u64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SEMI_INVITE_CERT_SIZE + EPK_SIZE + 8);
        buf.extend_from_slice(&semi.encode());
        buf.extend_from_slice(inviter.as_bytes());
        buf.extend_from_slice(&ts.to_be_bytes());
        buf
    }

    pub fn encode(&self) -> [u8; INVITE_CERT_SIZE] {
        let mut out = [0u8; INVITE_CERT_SIZE];
        let mut pos = 0;
        out[pos..pos + SEMI_INVITE_CERT_SIZE].copy_from_slice(&self.semi.encode());
        pos += SEMI_INVITE_CERT_SIZE;
        out[pos..pos + EPK_SIZE].copy_from_slice(self.inviter.as_bytes());
        pos += EPK_SIZE;
        out[pos..pos + 8].copy_from_slice(&self.inviter_ts.to_be_bytes());
        pos += 8;
        out[pos..].copy_from_slice(&self.inviter_sig);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != INVITE_CERT_SIZE {
            return Err(Error::CertCorrupt);
        }
        let mut semi_bytes = [0u8; SEMI_INVITE_CERT_SIZE];
        semi_bytes.copy_from_slice(&bytes[..SEMI_INVITE_CERT_SIZE]);
        let semi = SemiInviteCert::decode(&semi_bytes)?;

        let mut pos = SEMI_INVITE_CERT_SIZE;
        let mut inviter = [0u8; EPK_SIZE];
        inviter.copy_from_slice(&bytes[pos..pos + EPK_SIZE]);
        pos += EPK_SIZE;
        let mut ts_bytes = [0u8; 8];
        ts_bytes.copy_from_slice(&bytes[pos..pos + 8]);
        pos += 8;
        let mut sig = [0u8; SIGNATURE_SIZE];
        sig.copy_from_slice(&bytes[pos..]);

        Ok(Self {
            semi,
            inviter: Epk::from_bytes(inviter),
            inviter_ts: u64::from_be_bytes(ts_bytes),
            inviter_sig: sig,
        })
    }

    /// Both the invitee's half-signature and the inviter's countersignature
    /// must verify.
    pub fn verify_integrity(&self) -> bool {
        if !self.semi.verify_integrity() {
            return false;
        }
        let prefix = Self::inviter_signed_prefix(&self.semi, &self.inviter, self.inviter_ts);
        crate::crypto::verify(&self.inviter.sig(), &prefix, &self.inviter_sig)
    }
}

/// The invitee signs its own half of the invite (join step 1).
pub fn make_invite_half(invitee_keypair: &ExtendedKeypair, now: u64) -> SemiInviteCert {
    let invitee = invitee_keypair.epk();
    let prefix = SemiInviteCert::signed_prefix(&invitee, now);
    SemiInviteCert {
        invitee,
        invitee_ts: now,
        invitee_sig: invitee_keypair.sign(&prefix),
    }
}

/// The inviter countersigns a semi-certificate it received (join step 2).
/// Fails if the invitee's own half doesn't verify.
pub fn complete_invite(semi: SemiInviteCert, inviter_keypair: &ExtendedKeypair, now: u64) -> Result<InviteCert> {
    if !semi.verify_integrity() {
        return Err(Error::CertCorrupt);
    }
    let inviter = inviter_keypair.epk();
    let prefix = InviteCert::inviter_signed_prefix(&semi, &inviter, now);
    Ok(InviteCert {
        semi,
        inviter,
        inviter_ts: now,
        inviter_sig: inviter_keypair.sign(&prefix),
    })
}

/// A moderation certificate: a ban or an op-credentials grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonCert {
    pub cert_type: CertType,
    pub target: Epk,
    pub source: Epk,
    pub ts: u64,
    pub source_sig: [u8; SIGNATURE_SIZE],
}

impl CommonCert {
    fn signed_prefix(cert_type: CertType, target: &Epk, source: &Epk, ts: u64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + EPK_SIZE + EPK_SIZE + 8);
        buf.push(cert_type as u8);
        buf.extend_from_slice(target.as_bytes());
        buf.extend_from_slice(source.as_bytes());
        buf.extend_from_slice(&ts.to_be_bytes());
        buf
    }

    pub fn encode(&self) -> [u8; COMMON_CERT_SIZE] {
        let mut out = [0u8; COMMON_CERT_SIZE];
        let prefix = Self::signed_prefix(self.cert_type, &self.target, &self.source, self.ts);
        out[..prefix.len()].copy_from_slice(&prefix);
        out[prefix.len()..].copy_from_slice(&self.source_sig);
        out
    }

    pub fn decode(bytes: &[u8; COMMON_CERT_SIZE]) -> Result<Self> {
        let cert_type = CertType::from_byte(bytes[0])?;
        if cert_type == CertType::Invite {
            return Err(Error::CertCorrupt);
        }
        let mut pos = 1;
        let mut target = [0u8; EPK_SIZE];
        target.copy_from_slice(&bytes[pos..pos + EPK_SIZE]);
        pos += EPK_SIZE;
        let mut source = [0u8; EPK_SIZE];
        source.copy_from_slice(&bytes[pos..pos + EPK_SIZE]);
        pos += EPK_SIZE;
        let mut ts_bytes = [0u8; 8];
        ts_bytes.copy_from_slice(&bytes[pos..pos + 8]);
        pos += 8;
        let mut sig = [0u8; SIGNATURE_SIZE];
        sig.copy_from_slice(&bytes[pos..]);
        Ok(Self {
            cert_type,
            target: Epk::from_bytes(target),
            source: Epk::from_bytes(source),
            ts: u64::from_be_bytes(ts_bytes),
            source_sig: sig,
        })
    }

    pub fn verify_integrity(&self) -> bool {
        let prefix = Self::signed_prefix(self.cert_type, &self.target, &self.source, self.ts);
        crate::crypto::verify(&self.source.sig(), &prefix, &self.source_sig)
    }
}

/// A moderator issues a ban or an op-credentials grant against `target`.
/// Caller is responsible for checking the source is actually authorized
/// before broadcasting (see `groupchat::moderation`).
pub fn make_common_cert(
    source_keypair: &ExtendedKeypair,
    target: Epk,
    cert_type: CertType,
    now: u64,
) -> CommonCert {
    let source = source_keypair.epk();
    let prefix = CommonCert::signed_prefix(cert_type, &target, &source, now);
    CommonCert {
        cert_type,
        target,
        source,
        ts: now,
        source_sig: source_keypair.sign(&prefix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invite_certificate_roundtrip() {
        let invitee = ExtendedKeypair::generate();
        let inviter = ExtendedKeypair::generate();

        let semi = make_invite_half(&invitee, 1000);
        assert!(semi.verify_integrity());

        let cert = complete_invite(semi, &inviter, 1001).unwrap();
        assert!(cert.verify_integrity());

        let encoded = cert.encode();
        let decoded = InviteCert::decode(&encoded).unwrap();
        assert_eq!(cert, decoded);
        assert!(decoded.verify_integrity());
    }

    #[test]
    fn tampered_invite_fails_integrity() {
        let invitee = ExtendedKeypair::generate();
        let inviter = ExtendedKeypair::generate();
        let semi = make_invite_half(&invitee, 1000);
        let mut cert = complete_invite(semi, &inviter, 1001).unwrap();
        cert.inviter_ts += 1;
        assert!(!cert.verify_integrity());
    }

    #[test]
    fn completing_a_forged_semi_cert_fails() {
        let invitee = ExtendedKeypair::generate();
        let inviter = ExtendedKeypair::generate();
        let mut semi = make_invite_half(&invitee, 1000);
        semi.invitee_ts += 1;
        assert!(complete_invite(semi, &inviter, 1001).is_err());
    }

    #[test]
    fn common_certificate_roundtrip() {
        let op = ExtendedKeypair::generate();
        let target = ExtendedKeypair::generate().epk();
        let cert = make_common_cert(&op, target, CertType::Ban, 2000);
        assert!(cert.verify_integrity());

        let encoded = cert.encode();
        let decoded = CommonCert::decode(&encoded).unwrap();
        assert_eq!(cert, decoded);
    }

    #[test]
    fn tampered_common_cert_fails_integrity() {
        let op = ExtendedKeypair::generate();
        let target = ExtendedKeypair::generate().epk();
        let mut cert = make_common_cert(&op, target, CertType::OpCredentials, 2000);
        cert.ts += 1;
        assert!(!cert.verify_integrity());
    }
}
