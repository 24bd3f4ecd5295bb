//! Converging-forward routing: an `ANNOUNCE` or
//! `GET_NODES` packet keeps moving to progressively closer nodes until it
//! reaches one with no closer neighbor for `chat_id`, which then handles it.

use crate::crypto::Epk;
use crate::dht::Dht;
use crate::node::Node;

pub struct DispatchDecision {
    pub handle_locally: bool,
    pub forward_to: Vec<Node>,
}

/// Decide whether `self_epk` should handle a packet targeting `chat_id`
/// itself, or relay it on to nodes strictly closer to `chat_id` than we are.
///
/// `self_originated` distinguishes a packet we're creating (our own
/// `ANNOUNCE`/`GET_NODES`) from one we're relaying on behalf of someone
/// else: a self-originated packet skips the closer-than-self filter and
/// goes out to every close node the DHT knows, and is never handled
/// locally — we can't be the terminal hop for our own request.
pub fn dispatch_packet(dht: &dyn Dht, self_epk: &Epk, chat_id: &Epk, max_sent_nodes: usize, self_originated: bool) -> DispatchDecision {
    let close = dht.get_close_nodes(chat_id, max_sent_nodes);

    if self_originated {
        let forward_to: Vec<Node> = close.into_iter().filter(|n| n.epk != *self_epk).collect();
        return DispatchDecision { handle_locally: false, forward_to };
    }

    let self_distance = self_epk.xor_distance(chat_id);
    let forward_to: Vec<Node> = close
        .into_iter().filter(|n| n.epk != *self_epk && n.epk.xor_distance(chat_id) < self_distance)
        .collect();

    DispatchDecision {
        handle_locally: forward_to.is_empty(),
        forward_to,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EPK_SIZE;
    use crate::dht::InMemoryDht;
    use crate::node::IpPort;

    fn epk(seed: u8) -> Epk {
        let mut bytes = [0u8; EPK_SIZE];
        bytes[0] = seed;
        Epk::from_bytes(bytes)
    }

    fn node(seed: u8) -> Node {
        Node {
            epk: epk(seed),
            ip_port: IpPort::udp("127.0.0.1:33445".parse().unwrap()),
        }
    }

    #[test]
    fn handles_locally_when_no_closer_node_known() {
        let dht = InMemoryDht::new();
        let self_epk = epk(1);
        let chat_id = epk(0);
        let decision = dispatch_packet(&dht, &self_epk, &chat_id, 4, false);
        assert!(decision.handle_locally);
        assert!(decision.forward_to.is_empty());
    }

    #[test]
    fn forwards_to_strictly_closer_nodes() {
        let mut dht = InMemoryDht::new();
        dht.insert(node(0x01)); // closer to chat_id=0 than self=0x10
        dht.insert(node(0x20)); // farther than self
        let self_epk = epk(0x10);
        let chat_id = epk(0);

        let decision = dispatch_packet(&dht, &self_epk, &chat_id, 4, false);
        assert!(!decision.handle_locally);
        assert_eq!(decision.forward_to.len(), 1);
        assert_eq!(decision.forward_to[0].epk, epk(0x01));
    }

    #[test]
    fn self_originated_forwards_to_all_close_nodes_and_never_handles_locally() {
        let mut dht = InMemoryDht::new();
        dht.insert(node(0x01)); // farther than self by xor distance, irrelevant here
        dht.insert(node(0x20)); // closer than self by xor distance, irrelevant here
        let self_epk = epk(0x10);
        let chat_id = epk(0);

        let decision = dispatch_packet(&dht, &self_epk, &chat_id, 4, true);
        assert!(!decision.handle_locally);
        let mut epks: Vec<Epk> = decision.forward_to.iter().map(|n| n.epk).collect();
        epks.sort_by_key(|e| e.as_bytes().to_vec());
        let mut expected = vec![epk(0x01), epk(0x20)];
        expected.sort_by_key(|e| e.as_bytes().to_vec());
        assert_eq!(epks, expected);
    }

    #[test]
    fn self_originated_excludes_self_from_forward_set() {
        let mut dht = InMemoryDht::new();
        let self_epk = epk(0x10);
        dht.insert(Node { epk: self_epk, ip_port: IpPort::udp("127.0.0.1:33445".parse().unwrap()) });
        dht.insert(node(0x01));
        let chat_id = epk(0);

        let decision = dispatch_packet(&dht, &self_epk, &chat_id, 4, true);
        assert!(!decision.handle_locally);
        assert_eq!(decision.forward_to.len(), 1);
        assert_eq!(decision.forward_to[0].epk, epk(0x01));
    }
}
