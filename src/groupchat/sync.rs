//! Peer-list sync: reconcile membership with another member instead of
//! replaying the whole gossip history.

use crate::config::SYNC_SKEW_TOLERANCE_SECS;
use crate::error::{Error, Result};
use crate::groupchat::chat::Chat;
use crate::node::Node;

/// Wire payload of `SYNC_REQUEST`: our high-watermark, so the peer can reply
/// with only what changed since.
#[derive(Debug, Clone, Copy)]
pub struct SyncRequest {
    pub last_synced_time: u64,
}

/// Wire payload of `SYNC_RESPONSE`.
#[derive(Debug, Clone)]
pub struct SyncResponse {
    pub server_time: u64,
    pub peers: Vec<Node>,
    pub topic: String,
}

pub fn build_sync_request(chat: &Chat) -> SyncRequest {
    SyncRequest {
        last_synced_time: chat.last_synced_time,
    }
}

pub fn handle_sync_request(chat: &Chat, _request: SyncRequest, now: u64) -> SyncResponse {
    SyncResponse {
        server_time: now,
        peers: chat.peer_list_nodes(),
        topic: chat.topic.clone(),
    }
}

/// Apply a sync response. Rejects a response whose `server_time` lags far
/// enough behind our last sync to suggest replay or clock skew.
pub fn apply_sync_response(chat: &mut Chat, response: SyncResponse, now: u64) -> Result<()> {
    if response.server_time + SYNC_SKEW_TOLERANCE_SECS < chat.last_synced_time {
        return Err(Error::StaleTimestamp);
    }

    for node in response.peers {
        if node.epk == chat.self_epk() {
            continue;
        }
        let peer = chat.upsert_peer(node.epk, now);
        peer.ip_port = Some(node.ip_port);
    }

    if !response.topic.is_empty() {
        chat.topic = response.topic;
    }

    chat.last_synced_time = response.server_time.max(chat.last_synced_time);
    Ok(())
}
