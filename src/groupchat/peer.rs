//! A single peer's view as kept by every other member: `GC_GroupPeer`.

use crate::cert::{CommonCert, InviteCert, MAX_CERTIFICATES_NUM};
use crate::config::MAX_NICK_BYTES;
use crate::crypto::Epk;
use crate::node::IpPort;

/// `GROUP_ROLE` bitset. Hand-rolled rather than pulled in via `bitflags`
/// since this is the only bitset the crate needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Role(pub u64);

impl Role {
    pub const FOUNDER: Role = Role(1);
    pub const OP: Role = Role(2);
    pub const USER: Role = Role(4);
    pub const HUMAN: Role = Role(8);
    pub const ELF: Role = Role(16);
    pub const DWARF: Role = Role(32);

    pub fn contains(self, other: Role) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn with(self, other: Role) -> Role {
        Role(self.0 | other.0)
    }

    pub fn without(self, other: Role) -> Role {
        Role(self.0 & !other.0)
    }

    pub fn is_founder(self) -> bool {
        self.contains(Role::FOUNDER)
    }

    pub fn is_op_or_founder(self) -> bool {
        self.contains(Role::FOUNDER) || self.contains(Role::OP)
    }
}

/// `GROUP_STATUS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    None,
    Online,
    Offline,
    Away,
    Busy,
    Invalid,
}

/// `GC_GroupPeer`.
#[derive(Debug, Clone)]
pub struct Peer {
    pub epk: Epk,
    pub ip_port: Option<IpPort>,

    pub invite_certificate: Option<InviteCert>,
    pub common_certificates: Vec<CommonCert>,

    pub nick: String,
    pub nick_time: u64,
    pub banned: bool,
    pub banned_time: u64,
    pub status: Status,
    pub status_time: u64,
    pub verified: bool,
    pub role: Role,

    pub last_update_time: u64,
    pub last_rcvd_ping: u64,

    /// Consecutive malformed/undecryptable packets attributed to this peer.
    /// Reset on anything that decodes successfully.
    pub error_count: u32,
}

impl Peer {
    pub fn new(epk: Epk, now: u64) -> Self {
        Self {
            epk,
            ip_port: None,
            invite_certificate: None,
            common_certificates: Vec::new(),
            nick: String::new(),
            nick_time: 0,
            banned: false,
            banned_time: 0,
            status: Status::None,
            status_time: 0,
            verified: false,
            role: Role::USER,
            last_update_time: now,
            last_rcvd_ping: now,
            error_count: 0,
        }
    }

    pub fn set_nick(&mut self, nick: &str, now: u64) {
        let truncated: String = nick.chars().take(MAX_NICK_BYTES).collect();
        self.nick = truncated;
        self.nick_time = now;
        self.last_update_time = now;
    }

    pub fn set_status(&mut self, status: Status, now: u64) {
        self.status = status;
        self.status_time = now;
        self.last_update_time = now;
    }

    pub fn add_common_certificate(&mut self, cert: CommonCert) {
        if self.common_certificates.len() == MAX_CERTIFICATES_NUM {
            self.common_certificates.remove(0);
        }
        self.common_certificates.push(cert);
    }

    /// Like `add_common_certificate`, but a no-op if an identical cert is
    /// already present, so re-applying the same `SYNC_RESPONSE` can't evict
    /// genuinely distinct certs past the cap through duplicate inserts.
    pub fn add_common_certificate_if_new(&mut self, cert: CommonCert) {
        if self.common_certificates.contains(&cert) {
            return;
        }
        self.add_common_certificate(cert);
    }

    pub fn is_alive(&self, now: u64, timeout: u64) -> bool {
        !self.banned && now.saturating_sub(self.last_rcvd_ping) <= timeout
    }

    /// Record a packet-integrity failure attributed to this peer. Returns
    /// `true` once the count exceeds `threshold`, meaning the caller should
    /// disconnect it.
    pub fn record_error(&mut self, threshold: u32) -> bool {
        self.error_count += 1;
        self.error_count > threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_bitset_composition() {
        let role = Role::USER.with(Role::HUMAN);
        assert!(role.contains(Role::USER));
        assert!(role.contains(Role::HUMAN));
        assert!(!role.contains(Role::OP));
        assert!(!role.is_op_or_founder());
    }

    #[test]
    fn founder_and_op_both_satisfy_moderator_check() {
        assert!(Role::FOUNDER.is_op_or_founder());
        assert!(Role::OP.is_op_or_founder());
        assert!(!Role::USER.is_op_or_founder());
    }

    #[test]
    fn nick_truncated_to_max_bytes() {
        let mut peer = Peer::new(Epk::from_bytes([0u8; 64]), 0);
        let long_nick = "a".repeat(300);
        peer.set_nick(&long_nick, 10);
        assert_eq!(peer.nick.chars().count(), MAX_NICK_BYTES);
        assert_eq!(peer.last_update_time, 10);
    }

    #[test]
    fn common_certificates_capped_and_drop_oldest() {
        let op = crate::crypto::ExtendedKeypair::generate();
        let mut peer = Peer::new(Epk::from_bytes([1u8; 64]), 0);
        for i in 0..MAX_CERTIFICATES_NUM + 2 {
            let target = Epk::from_bytes([i as u8; 64]);
            let cert = crate::cert::make_common_cert(&op, target, crate::cert::CertType::Ban, i as u64);
            peer.add_common_certificate(cert);
        }
        assert_eq!(peer.common_certificates.len(), MAX_CERTIFICATES_NUM);
    }

    #[test]
    fn add_common_certificate_if_new_skips_exact_duplicates() {
        let op = crate::crypto::ExtendedKeypair::generate();
        let mut peer = Peer::new(Epk::from_bytes([1u8; 64]), 0);
        let target = Epk::from_bytes([2u8; 64]);
        let cert = crate::cert::make_common_cert(&op, target, crate::cert::CertType::Ban, 5);

        peer.add_common_certificate_if_new(cert);
        peer.add_common_certificate_if_new(cert);
        peer.add_common_certificate_if_new(cert);

        assert_eq!(peer.common_certificates.len(), 1);
    }

    #[test]
    fn record_error_reports_threshold_crossed() {
        let mut peer = Peer::new(Epk::from_bytes([3u8; 64]), 0);
        for _ in 0..3 {
            assert!(!peer.record_error(3));
        }
        assert!(peer.record_error(3));
        assert_eq!(peer.error_count, 4);
    }
}
