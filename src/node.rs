//! The wire "packed node" format: `family:1 | ip:(4 or 16) |
//! port:2 | epk:64`, and the `IpPort`/`Node` types built on it.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use crate::crypto::{Epk, EPK_SIZE};
use crate::error::{Error, Result};

/// Address family byte for a packed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Ip4 = 2,
    Ip4Tcp = 130,
    Ip6 = 10,
    Ip6Tcp = 138,
}

impl Family {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            2 => Ok(Family::Ip4),
            130 => Ok(Family::Ip4Tcp),
            10 => Ok(Family::Ip6),
            138 => Ok(Family::Ip6Tcp),
            _ => Err(Error::MalformedPacket("unknown node address family")),
        }
    }

    fn is_tcp(self) -> bool {
        matches!(self, Family::Ip4Tcp | Family::Ip6Tcp)
    }

    fn is_ip6(self) -> bool {
        matches!(self, Family::Ip6 | Family::Ip6Tcp)
    }
}

/// A socket address tagged with whether it travels over UDP or TCP, matching
/// the four packed-node families above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpPort {
    pub addr: SocketAddr,
    pub tcp: bool,
}

impl IpPort {
    pub fn udp(addr: SocketAddr) -> Self {
        Self { addr, tcp: false }
    }

    pub fn is_zero(&self) -> bool {
        self.addr.port() == 0
            && match self.addr {
                SocketAddr::V4(v4) => v4.ip().is_unspecified(),
                SocketAddr::V6(v6) => v6.ip().is_unspecified(),
            }
    }

    pub fn zero() -> Self {
        Self {
            addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)),
            tcp: false,
        }
    }

    fn family(&self) -> Family {
        match (self.addr, self.tcp) {
            (SocketAddr::V4(_), false) => Family::Ip4,
            (SocketAddr::V4(_), true) => Family::Ip4Tcp,
            (SocketAddr::V6(_), false) => Family::Ip6,
            (SocketAddr::V6(_), true) => Family::Ip6Tcp,
        }
    }
}

/// A chat-hosting node: its identity and where to reach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    pub epk: Epk,
    pub ip_port: IpPort,
}

/// Pack `nodes` into `buf`-style output, `family | addr | port | epk` per
/// node, matching `pack_gca_nodes` byte-for-byte.
pub fn pack_nodes(nodes: &[Node]) -> Vec<u8> {
    let mut out = Vec::new();
    for node in nodes {
        let family = node.ip_port.family();
        out.push(family as u8);
        match node.ip_port.addr {
            SocketAddr::V4(v4) => out.extend_from_slice(&v4.ip().octets()),
            SocketAddr::V6(v6) => out.extend_from_slice(&v6.ip().octets()),
        }
        out.extend_from_slice(&node.ip_port.addr.port().to_be_bytes());
        out.extend_from_slice(node.epk.as_bytes());
    }
    out
}

/// Unpack up to `max_num_nodes` nodes from `data`. `tcp_enabled` rejects the
/// TCP families with a distinct error when false.
pub fn unpack_nodes(data: &[u8], max_num_nodes: usize, tcp_enabled: bool) -> Result<Vec<Node>> {
    let mut nodes = Vec::new();
    let mut pos = 0usize;

    while nodes.len() < max_num_nodes && pos < data.len() {
        let family = Family::from_byte(
            *data
                .get(pos)
                .ok_or(Error::MalformedPacket("truncated node family byte"))?,
        )?;

        if family.is_tcp() && !tcp_enabled {
            return Err(Error::MalformedPacket("tcp node family not enabled"));
        }

        let addr_len = if family.is_ip6() { 16 } else { 4 };
        let entry_len = 1 + addr_len + 2 + EPK_SIZE;
        if pos + entry_len > data.len() {
            return Err(Error::MalformedPacket("truncated packed node"));
        }

        let addr_start = pos + 1;
        let port_start = addr_start + addr_len;
        let epk_start = port_start + 2;

        let port = u16::from_be_bytes([data[port_start], data[port_start + 1]]);
        let socket_addr = if family.is_ip6() {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&data[addr_start..addr_start + 16]);
            SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::from(octets), port, 0, 0))
        } else {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&data[addr_start..addr_start + 4]);
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(octets), port))
        };

        let mut epk_bytes = [0u8; EPK_SIZE];
        epk_bytes.copy_from_slice(&data[epk_start..epk_start + EPK_SIZE]);

        nodes.push(Node {
            epk: Epk::from_bytes(epk_bytes),
            ip_port: IpPort {
                addr: socket_addr,
                tcp: family.is_tcp(),
            },
        });

        pos += entry_len;
    }

    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_node(seed: u8) -> Node {
        let mut epk = [0u8; EPK_SIZE];
        epk.fill(seed);
        Node {
            epk: Epk::from_bytes(epk),
            ip_port: IpPort::udp("127.0.0.1:33445".parse().unwrap()),
        }
    }

    #[test]
    fn pack_unpack_roundtrip() {
        let nodes = vec![sample_node(1), sample_node(2), sample_node(3)];
        let packed = pack_nodes(&nodes);
        let unpacked = unpack_nodes(&packed, 8, false).unwrap();
        assert_eq!(nodes, unpacked);
    }

    #[test]
    fn pack_unpack_roundtrip_ipv6() {
        let node = Node {
            epk: Epk::from_bytes([7u8; EPK_SIZE]),
            ip_port: IpPort::udp("[::1]:33445".parse().unwrap()),
        };
        let packed = pack_nodes(&[node]);
        let unpacked = unpack_nodes(&packed, 8, false).unwrap();
        assert_eq!(vec![node], unpacked);
    }

    #[test]
    fn tcp_rejected_when_disabled() {
        let node = Node {
            epk: Epk::from_bytes([9u8; EPK_SIZE]),
            ip_port: IpPort {
                addr: "127.0.0.1:33445".parse().unwrap(),
                tcp: true,
            },
        };
        let packed = pack_nodes(&[node]);
        assert!(unpack_nodes(&packed, 8, false).is_err());
        assert!(unpack_nodes(&packed, 8, true).is_ok());
    }

    #[test]
    fn truncated_buffer_is_malformed() {
        let nodes = vec![sample_node(1)];
        let mut packed = pack_nodes(&nodes);
        packed.truncate(packed.len() - 1);
        assert!(unpack_nodes(&packed, 8, false).is_err());
    }

    #[test]
    fn zero_ip_port_detection() {
        assert!(IpPort::zero().is_zero());
        assert!(!IpPort::udp("127.0.0.1:1".parse().unwrap()).is_zero());
    }
}
