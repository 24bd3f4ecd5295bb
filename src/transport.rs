//! Packet transport: send raw datagrams, demultiplex inbound
//! ones by their leading wire-type byte. No peer discovery, NAT traversal, or
//! TCP relay — those concerns belong to whatever `Dht` is wired in.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::wire::MAX_PACKET_LEN;

/// An inbound datagram, still fully encoded.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub from: SocketAddr,
    pub data: Vec<u8>,
}

/// Send and receive raw datagrams. `poll` is called once per tick/// and drains whatever arrived since the last call.
pub trait Transport: Send + Sync {
    fn send_to(&self, dest: SocketAddr, data: &[u8]) -> Result<()>;

    fn poll(&self) -> Vec<Datagram>;

    fn local_addr(&self) -> SocketAddr;
}

/// An in-process transport backed by `mpsc` channels, for tests and for
/// wiring several `GroupWire` instances together in one process without a
/// socket.
pub struct InMemoryTransport {
    local_addr: SocketAddr,
    inbox_tx: mpsc::UnboundedSender<Datagram>,
    inbox_rx: Mutex<mpsc::UnboundedReceiver<Datagram>>,
    peers: Mutex<Vec<(SocketAddr, mpsc::UnboundedSender<Datagram>)>>,
}

impl InMemoryTransport {
    pub fn new(local_addr: SocketAddr) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            local_addr,
            inbox_tx,
            inbox_rx: Mutex::new(inbox_rx),
            peers: Mutex::new(Vec::new()),
        }
    }

    /// Wire two in-memory transports together so each can reach the other by
    /// address. Test-only topology helper; a real deployment has no such
    /// notion since `UdpTransport` just sends to any `SocketAddr`.
    pub fn link(&self, other: &InMemoryTransport) {
        self.peers
            .lock().unwrap().push((other.local_addr, other.inbox_tx.clone()));
        other
            .peers
            .lock().unwrap().push((self.local_addr, self.inbox_tx.clone()));
    }
}

impl Transport for InMemoryTransport {
    fn send_to(&self, dest: SocketAddr, data: &[u8]) -> Result<()> {
        if data.len() > MAX_PACKET_LEN {
            return Err(Error::LengthOverflow);
        }
        let peers = self.peers.lock().unwrap();
        let Some((_, tx)) = peers.iter().find(|(addr, _)| *addr == dest) else {
            return Err(Error::Transport(format!("no linked peer at {dest}")));
        };
        tx.send(Datagram {
            from: self.local_addr,
            data: data.to_vec(),
        })
        .map_err(|_| Error::Transport(format!("peer at {dest} is gone")))
    }

    fn poll(&self) -> Vec<Datagram> {
        let mut rx = self.inbox_rx.lock().unwrap();
        let mut out = Vec::new();
        while let Ok(datagram) = rx.try_recv() {
            out.push(datagram);
        }
        out
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Bounded record of recently seen datagrams, used by handlers that need to
/// dedup a rebroadcast (ACTION gossip) without growing unbounded.
pub struct SeenWindow {
    capacity: usize,
    seen: Mutex<VecDeque<[u8; 32]>>,
}

impl SeenWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seen: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Insert `digest`, returning true if it was already present.
    pub fn check_and_insert(&self, digest: [u8; 32]) -> bool {
        let mut seen = self.seen.lock().unwrap();
        if seen.contains(&digest) {
            return true;
        }
        if seen.len() == self.capacity {
            seen.pop_front();
        }
        seen.push_back(digest);
        false
    }
}

#[cfg(feature = "live-net")]
pub mod udp;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linked_transports_exchange_datagrams() {
        let a = InMemoryTransport::new("127.0.0.1:10001".parse().unwrap());
        let b = InMemoryTransport::new("127.0.0.1:10002".parse().unwrap());
        a.link(&b);

        a.send_to(b.local_addr, b"hello").unwrap();
        let received = b.poll();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].data, b"hello");
        assert_eq!(received[0].from, a.local_addr());
    }

    #[test]
    fn send_to_unlinked_peer_errors() {
        let a = InMemoryTransport::new("127.0.0.1:10003".parse().unwrap());
        let unknown: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        assert!(a.send_to(unknown, b"x").is_err());
    }

    #[test]
    fn oversized_payload_rejected() {
        let a = InMemoryTransport::new("127.0.0.1:10004".parse().unwrap());
        let b = InMemoryTransport::new("127.0.0.1:10005".parse().unwrap());
        a.link(&b);
        let oversized = vec![0u8; MAX_PACKET_LEN + 1];
        assert!(a.send_to(b.local_addr, &oversized).is_err());
    }

    #[test]
    fn seen_window_deduplicates_and_evicts() {
        let window = SeenWindow::new(2);
        assert!(!window.check_and_insert([1u8; 32]));
        assert!(window.check_and_insert([1u8; 32]));
        assert!(!window.check_and_insert([2u8; 32]));
        assert!(!window.check_and_insert([3u8; 32]));
        // [1] was evicted to make room for [3]; seeing it again looks fresh.
        assert!(!window.check_and_insert([1u8; 32]));
    }
}
