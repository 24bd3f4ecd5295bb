//! Invite state machine: an unjoined peer asks a member to vouch for it,
//! the member countersigns, the peer is now a group member.

use crate::cert::{self, InviteCert};
use crate::crypto::{Epk, ExtendedKeypair};
use crate::error::{Error, Result};
use crate::groupchat::chat::Chat;
use crate::groupchat::peer::Role;

/// Where a join attempt is at. Tracked per outstanding invite target, not
/// persisted once `Joined` folds into `Chat::peers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteState {
    Idle,
    Requested,
    HalfSigned,
    Verified,
    Joined,
}

/// Wire payload of `INVITE_REQUEST`: the invitee's half-signed certificate.
#[derive(Debug, Clone, Copy)]
pub struct InviteRequest {
    pub semi: cert::SemiInviteCert,
}

/// Wire payload of `INVITE_RESPONSE`: the completed certificate plus enough
/// chat context for the new member to bootstrap.
#[derive(Debug, Clone)]
pub struct InviteResponse {
    pub cert: InviteCert,
    pub chat_id: Epk,
    pub founder: Epk,
    pub topic: String,
}

/// Build the outgoing `INVITE_REQUEST` for joining a chat via some member
/// reachable at the handshake address.
pub fn send_invite_request(joiner_keypair: &ExtendedKeypair, now: u64) -> InviteRequest {
    InviteRequest {
        semi: cert::make_invite_half(joiner_keypair, now),
    }
}

/// An existing member receives an `INVITE_REQUEST` and vouches for the
/// requester by countersigning. Rejects a request from an already-banned
/// peer or one whose half-certificate fails integrity. The new peer is
/// inserted as verified: the inviter is verified by induction, since only a
/// verified member can complete an invite.
pub fn handle_invite_request(chat: &mut Chat, request: InviteRequest, now: u64) -> Result<InviteResponse> {
    if let Some(existing) = chat.peer(&request.semi.invitee) {
        if existing.banned {
            return Err(Error::Banned);
        }
    }

    let cert = cert::complete_invite(request.semi, &chat.self_keypair, now)?;
    let inviter_verified = chat.self_verified;

    let peer = chat.upsert_peer(cert.semi.invitee, now);
    peer.invite_certificate = Some(cert);
    peer.role = Role::USER;
    peer.verified = inviter_verified;

    Ok(InviteResponse {
        cert,
        chat_id: chat.chat_id,
        founder: chat.founder,
        topic: chat.topic.clone(),
    })
}

/// The joiner receives the countersigned certificate back and becomes a
/// member (`REQUESTED -> HALF_SIGNED -> VERIFIED`).
/// `chat` is the joiner's own (still peerless) `Chat::joining` handle;
/// `self_verified` is set once the inviter is the chat itself or is known
/// to be verified (the `HALF_SIGNED -> VERIFIED` transition). The
/// final `VERIFIED -> JOINED` step happens once a `SYNC_RESPONSE` installs
/// the peer list (`sync::apply_sync_response`).
pub fn handle_invite_response(chat: &mut Chat, response: &InviteResponse, joiner_epk: &Epk) -> Result<InviteState> {
    if &response.cert.semi.invitee != joiner_epk {
        return Err(Error::CertCorrupt);
    }
    if !response.cert.verify_integrity() {
        return Err(Error::CertCorrupt);
    }

    let inviter_is_founder_or_chat = response.cert.inviter == chat.founder;
    chat.self_verified = inviter_is_founder_or_chat;

    Ok(if inviter_is_founder_or_chat {
        InviteState::Verified
    } else {
        InviteState::HalfSigned
    })
}
