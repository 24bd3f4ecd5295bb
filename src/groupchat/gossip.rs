//! `GROUP_MESSAGE` gossip: ping/status/membership/chat events that spread
//! peer-to-peer across the close-neighbor graph.
use crate::cert::CommonCert;
use crate::crypto::Epk;
use crate::error::{Error, Result};
use crate::groupchat::chat::Chat;
use crate::groupchat::moderation;
use crate::groupchat::peer::Status;

/// `GM_*` message kinds. Every variant but `Ping` carries the sender's own
/// `ts` ("all gossip packets start with `{type, timestamp}`"),
/// which is what staleness is judged against — not the receiver's clock.
/// `Action` is a certificate broadcast (a `BAN`/`OP_CREDENTIALS` common
/// cert relayed to the close set), not an IRC-style `/me` message — `Plain`
/// is the free-text kind.
#[derive(Debug, Clone, PartialEq)]
pub enum GossipMessage {
    Ping,
    Status(Status, u64),
    NewPeer(Epk),
    ChangeNick(String, u64),
    ChangeTopic(String, u64),
    Plain { message_number: u32, text: String },
    Action(CommonCert),
}

/// Outcome of handling an inbound gossip message: whether the caller should
/// rebroadcast it to its own close set (flooding).
pub struct GossipOutcome {
    pub rebroadcast: bool,
}

/// Apply `msg`, received from `sender`, to `chat`. `already_seen` is looked
/// up by the caller against a [`crate::transport::SeenWindow`] keyed on the
/// message's content hash for `Plain`/`Action`, which are the only kinds
/// that get rebroadcast (pings and state changes are per-sender and
/// idempotent, so flooding them isn't needed).
pub fn handle_gossip(
    chat: &mut Chat,
    sender: &Epk,
    msg: GossipMessage,
    now: u64,
    already_seen: bool,
) -> Result<GossipOutcome> {
    let Some(peer) = chat.peer_mut(sender) else {
        return Err(Error::Unauthorized);
    };
    if peer.banned {
        return Err(Error::Banned);
    }

    match msg {
        GossipMessage::Ping => {
            peer.last_rcvd_ping = now;
            Ok(GossipOutcome { rebroadcast: false })
        }
        GossipMessage::Status(status, ts) => {
            if ts <= peer.status_time {
                return Ok(GossipOutcome { rebroadcast: false });
            }
            peer.set_status(status, ts);
            Ok(GossipOutcome { rebroadcast: false })
        }
        GossipMessage::NewPeer(new_epk) => {
            chat.upsert_peer(new_epk, now);
            Ok(GossipOutcome { rebroadcast: false })
        }
        GossipMessage::ChangeNick(nick, ts) => {
            if ts <= peer.nick_time {
                return Ok(GossipOutcome { rebroadcast: false });
            }
            peer.set_nick(&nick, ts);
            Ok(GossipOutcome { rebroadcast: false })
        }
        GossipMessage::ChangeTopic(topic, ts) => {
            if ts <= chat.topic_time {
                return Ok(GossipOutcome { rebroadcast: false });
            }
            let setter = *sender;
            chat.set_topic(&topic, setter, ts)?;
            Ok(GossipOutcome { rebroadcast: false })
        }
        GossipMessage::Plain { .. } => Ok(GossipOutcome {
            rebroadcast: !already_seen,
        }),
        GossipMessage::Action(cert) => {
            if already_seen {
                return Ok(GossipOutcome { rebroadcast: false });
            }
            let now_for_cert = cert.ts;
            moderation::process_common_cert(chat, &cert, now_for_cert)?;
            Ok(GossipOutcome { rebroadcast: true })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ExtendedKeypair;

    fn chat_with_peer() -> (Chat, Epk) {
        let founder_kp = ExtendedKeypair::generate();
        let mut chat = Chat::found(founder_kp, "founder", 0);
        let peer_epk = Epk::from_bytes([3u8; 64]);
        chat.upsert_peer(peer_epk, 0);
        (chat, peer_epk)
    }

    #[test]
    fn ping_updates_liveness() {
        let (mut chat, peer_epk) = chat_with_peer();
        handle_gossip(&mut chat, &peer_epk, GossipMessage::Ping, 42, false).unwrap();
        assert_eq!(chat.peer(&peer_epk).unwrap().last_rcvd_ping, 42);
    }

    #[test]
    fn banned_sender_rejected() {
        let (mut chat, peer_epk) = chat_with_peer();
        chat.peer_mut(&peer_epk).unwrap().banned = true;
        let result = handle_gossip(&mut chat, &peer_epk, GossipMessage::Ping, 1, false);
        assert!(matches!(result, Err(Error::Banned)));
    }

    #[test]
    fn unknown_sender_rejected() {
        let founder_kp = ExtendedKeypair::generate();
        let mut chat = Chat::found(founder_kp, "founder", 0);
        let stranger = Epk::from_bytes([9u8; 64]);
        let result = handle_gossip(&mut chat, &stranger, GossipMessage::Ping, 1, false);
        assert!(matches!(result, Err(Error::Unauthorized)));
    }

    #[test]
    fn plain_message_rebroadcasts_only_if_unseen() {
        let (mut chat, peer_epk) = chat_with_peer();
        let msg = GossipMessage::Plain {
            message_number: 1,
            text: "hi".to_string(),
        };
        let outcome = handle_gossip(&mut chat, &peer_epk, msg.clone(), 1, false).unwrap();
        assert!(outcome.rebroadcast);

        let outcome = handle_gossip(&mut chat, &peer_epk, msg, 1, true).unwrap();
        assert!(!outcome.rebroadcast);
    }

    #[test]
    fn change_topic_updates_chat() {
        let (mut chat, peer_epk) = chat_with_peer();
        handle_gossip(&mut chat, &peer_epk, GossipMessage::ChangeTopic("new topic".into(), 5), 5, false).unwrap();
        assert_eq!(chat.topic, "new topic");
        assert_eq!(chat.topic_setter, Some(peer_epk));
    }

    /// Two `CHANGE_NICK` packets with timestamps t1 < t2 arrive out of
    /// order (t2 first). The final nick must equal the t2 value; there must
    /// be no regression back to t1's value once it shows up late.
    #[test]
    fn nick_change_out_of_order_does_not_regress() {
        let (mut chat, peer_epk) = chat_with_peer();

        handle_gossip(&mut chat, &peer_epk, GossipMessage::ChangeNick("second".into(), 20), 20, false).unwrap();
        assert_eq!(chat.peer(&peer_epk).unwrap().nick, "second");

        // The earlier update, t1 = 10, arrives late.
        handle_gossip(&mut chat, &peer_epk, GossipMessage::ChangeNick("first".into(), 10), 21, false).unwrap();
        assert_eq!(chat.peer(&peer_epk).unwrap().nick, "second");
    }

    #[test]
    fn status_change_out_of_order_does_not_regress() {
        let (mut chat, peer_epk) = chat_with_peer();

        handle_gossip(&mut chat, &peer_epk, GossipMessage::Status(Status::Busy, 20), 20, false).unwrap();
        handle_gossip(&mut chat, &peer_epk, GossipMessage::Status(Status::Away, 10), 21, false).unwrap();
        assert_eq!(chat.peer(&peer_epk).unwrap().status, Status::Busy);
    }

    #[test]
    fn action_applies_cert_and_rebroadcasts_once() {
        let (mut chat, peer_epk) = chat_with_peer();
        let target = Epk::from_bytes([8u8; 64]);
        let cert = crate::cert::make_common_cert(&chat.self_keypair, target, crate::cert::CertType::Ban, 5);

        let outcome = handle_gossip(&mut chat, &peer_epk, GossipMessage::Action(cert), 5, false).unwrap();
        assert!(outcome.rebroadcast);
        assert!(chat.peer(&target).unwrap().banned);

        let outcome = handle_gossip(&mut chat, &peer_epk, GossipMessage::Action(cert), 5, true).unwrap();
        assert!(!outcome.rebroadcast);
    }
}
