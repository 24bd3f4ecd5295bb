//! `process_invite_cert` / `process_common_cert`: verified status
//! propagation and ban/op-credential authorization.
//!
//! `process_chain_trust`, a recursive "walk the invite graph back to the
//! founder" check, is not implemented here. Verification here is
//! single-hop: a peer is verified if whoever countersigned its invite was
//! itself verified at cert-processing time.

use crate::cert::{CertType, CommonCert, InviteCert};
use crate::error::{Error, Result};
use crate::groupchat::chat::Chat;
use crate::groupchat::peer::Role;

/// Apply a received `InviteCert` to `chat`: verify its integrity, then mark
/// the invitee verified if the inviter is a known, verified member (or the
/// chat founder itself).
pub fn process_invite_cert(chat: &mut Chat, cert: &InviteCert, now: u64) -> Result<()> {
    if !cert.verify_integrity() {
        return Err(Error::CertCorrupt);
    }

    let inviter_verified = if cert.inviter == chat.founder {
        true
    } else {
        chat.peer(&cert.inviter)
            .ok_or(Error::UnknownInviter)?
            .verified
    };

    let invitee = cert.semi.invitee;
    let peer = chat.upsert_peer(invitee, now);
    peer.invite_certificate = Some(*cert);
    peer.verified = inviter_verified;
    Ok(())
}

/// Apply a received `CommonCert` (ban or op grant). Only the founder or an
/// existing op may issue one; a self-signed cert from the founder is valid
/// even before the founder shows up in the peer table.
pub fn process_common_cert(chat: &mut Chat, cert: &CommonCert, now: u64) -> Result<()> {
    if !cert.verify_integrity() {
        return Err(Error::CertCorrupt);
    }

    let source_authorized = cert.source == chat.founder
        || chat
            .peer(&cert.source)
            .map(|p| p.role.is_op_or_founder())
            .unwrap_or(false);

    if !source_authorized {
        return Err(Error::Unauthorized);
    }

    match cert.cert_type {
        CertType::Ban => {
            let target = cert.target;
            // A moderator may never ban a peer with equal or higher rank
            // (an op cannot ban the founder, nor another op).
            if target == chat.founder {
                return Err(Error::Unauthorized);
            }
            if let Some(target_peer) = chat.peer(&target) {
                if target_peer.role.is_op_or_founder() && cert.source != chat.founder {
                    return Err(Error::Unauthorized);
                }
            }
            let peer = chat.upsert_peer(target, now);
            peer.banned = true;
            peer.banned_time = cert.ts;
            peer.add_common_certificate(*cert);
        }
        CertType::OpCredentials => {
            let target = cert.target;
            chat.credentials.grant(target, Role::OP);
            let peer = chat.upsert_peer(target, now);
            peer.role = peer.role.with(Role::OP);
            peer.add_common_certificate(*cert);
        }
        CertType::Invite => return Err(Error::CertCorrupt),
    }
    Ok(())
}
