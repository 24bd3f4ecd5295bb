//! Real `UdpSocket`-backed transport, gated behind the `live-net` feature so
//! the rest of the crate and its tests never need an open socket.

use std::net::SocketAddr;
use std::sync::Mutex;

use tokio::net::UdpSocket;
use tokio::runtime::Handle;

use crate::error::{Error, Result};
use crate::transport::{Datagram, Transport};
use crate::wire::MAX_PACKET_LEN;

/// A transport backed by a single bound UDP socket. `poll` drains whatever
/// the background receive task has buffered since the last call.
pub struct UdpTransport {
    socket: std::sync::Arc<UdpSocket>,
    local_addr: SocketAddr,
    inbox: std::sync::Arc<Mutex<Vec<Datagram>>>,
}

impl UdpTransport {
    /// Bind `addr` and spawn the background receive loop on the current
    /// tokio runtime. Must be called from within a tokio context.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| Error::Transport(e.to_string()))?;
        let socket = std::sync::Arc::new(socket);
        let inbox = std::sync::Arc::new(Mutex::new(Vec::new()));

        let recv_socket = socket.clone();
        let recv_inbox = inbox.clone();
        Handle::current().spawn(async move {
            let mut buf = vec![0u8; MAX_PACKET_LEN];
            loop {
                match recv_socket.recv_from(&mut buf).await {
                    Ok((len, from)) => {
                        recv_inbox.lock().unwrap().push(Datagram {
                            from,
                            data: buf[..len].to_vec(),
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "udp recv_from failed");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            socket,
            local_addr,
            inbox,
        })
    }
}

impl Transport for UdpTransport {
    fn send_to(&self, dest: SocketAddr, data: &[u8]) -> Result<()> {
        if data.len() > MAX_PACKET_LEN {
            return Err(Error::LengthOverflow);
        }
        self.socket
            .try_send_to(data, dest)
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(())
    }

    fn poll(&self) -> Vec<Datagram> {
        std::mem::take(&mut self.inbox.lock().unwrap())
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
