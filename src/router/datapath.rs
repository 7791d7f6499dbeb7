//! Raw packet datapath: the in-network router's fast path over full
//! Ethernet/IPv4/UDP frames.
//!
//! Requests are steered by rewriting the destination MAC/IPv4/UDP port in
//! place (recomputing the IPv4 header checksum, zeroing the UDP checksum);
//! replies only update load accounting via UDP source-port arithmetic.

use crate::cluster::NodeAddress;
use crate::router::balancer::LoadBalancer;
use crate::utils::{djb2_hash, PegasusError};
use crate::wire::{ControllerCodec, ControllerMessage, NodeId, CONTROLLER, PEGASUS};

// Frame offsets (Ethernet II, IPv4 without options, UDP).
pub(crate) const ETH_DST: usize = 0;
pub(crate) const IP_HEADER: usize = 14;
pub(crate) const IP_SIZE: usize = 20;
pub(crate) const IP_CKSUM: usize = IP_HEADER + 10;
pub(crate) const IP_DST: usize = IP_HEADER + 16;
pub(crate) const UDP_SRC: usize = IP_HEADER + IP_SIZE;
pub(crate) const UDP_DST: usize = UDP_SRC + 2;
pub(crate) const UDP_CKSUM: usize = UDP_SRC + 6;
pub(crate) const APP_HEADER: usize = UDP_SRC + 8;

// Pegasus header geometry the fast path needs: op type right after the
// identifier, and the request payload's fixed prefix before key_len.
const APP_OP_TYPE: usize = 2;
const APP_PAYLOAD: usize = 20;
const REQ_KEY_LEN: usize = APP_PAYLOAD + 4 + 4 + 4 + 1;

const OP_GET: u8 = 0x0;
const OP_PUT: u8 = 0x1;
const OP_DEL: u8 = 0x2;
const OP_REP_R: u8 = 0x3;
const OP_REP_W: u8 = 0x4;
const OP_PUT_FWD: u8 = 0x7;

/// What the router decided to do with a frame.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RouterAction {
    /// Frame was rewritten; emit it toward the chosen node.
    Forward(NodeId),
    /// Frame passes through unchanged (e.g. replies flowing to clients).
    Pass,
    /// Frame was consumed or is not steerable.
    Drop,
}

/// The in-network router fast path for one rack.
pub struct PacketRouter {
    /// Outstanding-load table and selection state.
    balancer: LoadBalancer,

    /// Server addresses of this rack, indexed by node ID.
    node_addresses: Vec<NodeAddress>,

    /// Controller codec for fast-path reset frames.
    ctrl_codec: ControllerCodec,
}

impl PacketRouter {
    pub fn new(
        node_addresses: Vec<NodeAddress>,
        load_constant: f64,
    ) -> Result<Self, PegasusError> {
        let balancer =
            LoadBalancer::new(node_addresses.len(), load_constant)?;
        Ok(PacketRouter {
            balancer,
            node_addresses,
            ctrl_codec: ControllerCodec::new(),
        })
    }

    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    /// Processes one raw frame in place.
    pub fn process_frame(&self, frame: &mut [u8]) -> RouterAction {
        if frame.len() < APP_HEADER + APP_OP_TYPE + 1 {
            return RouterAction::Drop;
        }
        let app = &frame[APP_HEADER..];
        let identifier = u16::from_be_bytes([app[0], app[1]]);

        match identifier {
            PEGASUS => self.process_kv_frame(frame),
            CONTROLLER => {
                match self.ctrl_codec.decode(&frame[APP_HEADER..]) {
                    Ok(ControllerMessage::ResetRequest {
                        num_nodes, ..
                    }) => {
                        let bound = self.node_addresses.len() as u16;
                        self.balancer.reset(num_nodes.min(bound));
                        RouterAction::Drop
                    }
                    _ => RouterAction::Drop,
                }
            }
            _ => RouterAction::Drop,
        }
    }

    fn process_kv_frame(&self, frame: &mut [u8]) -> RouterAction {
        let op_type = frame[APP_HEADER + APP_OP_TYPE];
        match op_type {
            OP_GET | OP_PUT | OP_DEL | OP_PUT_FWD => {
                // raw mode recomputes djb2 over the payload key
                let Some(key) = Self::request_key(&frame[APP_HEADER..])
                else {
                    return RouterAction::Drop;
                };
                let node = self.balancer.pick_node(djb2_hash(key));
                self.balancer.note_forwarded(node);
                self.forward_to_node(frame, node);
                RouterAction::Forward(node)
            }
            OP_REP_R | OP_REP_W => {
                let src_port = u16::from_be_bytes([
                    frame[UDP_SRC],
                    frame[UDP_SRC + 1],
                ]);
                match self.balancer.port_to_node(src_port) {
                    Some(node) => {
                        self.balancer.note_reply(node);
                        RouterAction::Pass
                    }
                    None => RouterAction::Drop,
                }
            }
            // migration traffic is addressed point-to-point; not steered
            _ => RouterAction::Pass,
        }
    }

    /// Extracts the key slice of a request frame, bounds-checked.
    fn request_key(app: &[u8]) -> Option<&[u8]> {
        if app.len() < REQ_KEY_LEN + 2 {
            return None;
        }
        let key_len = u16::from_le_bytes([
            app[REQ_KEY_LEN],
            app[REQ_KEY_LEN + 1],
        ]) as usize;
        app.get(REQ_KEY_LEN + 2..REQ_KEY_LEN + 2 + key_len)
    }

    /// Rewrites destination addressing toward `node` and fixes checksums.
    fn forward_to_node(&self, frame: &mut [u8], node: NodeId) {
        let addr = &self.node_addresses[node as usize];

        frame[ETH_DST..ETH_DST + 6].copy_from_slice(&addr.mac);

        frame[IP_DST..IP_DST + 4].copy_from_slice(&addr.ipv4.octets());
        frame[IP_CKSUM] = 0;
        frame[IP_CKSUM + 1] = 0;
        let cksum =
            ipv4_checksum(&frame[IP_HEADER..IP_HEADER + IP_SIZE]);
        frame[IP_CKSUM..IP_CKSUM + 2].copy_from_slice(&cksum.to_be_bytes());

        frame[UDP_DST..UDP_DST + 2]
            .copy_from_slice(&addr.udp_port.to_be_bytes());
        // UDP checksum is optional over IPv4; zero means "not computed"
        frame[UDP_CKSUM] = 0;
        frame[UDP_CKSUM + 1] = 0;
    }
}

/// 16-bit ones'-complement sum over the IPv4 header (RFC 1071).
pub(crate) fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in header.chunks(2) {
        let word = if chunk.len() == 2 {
            u16::from_be_bytes([chunk[0], chunk[1]])
        } else {
            u16::from_be_bytes([chunk[0], 0])
        };
        sum += word as u32;
    }
    while sum >> 16 != 0 {
        sum = (sum >> 16) + (sum & 0xffff);
    }
    !(sum as u16)
}

#[cfg(test)]
mod datapath_tests {
    use super::*;
    use crate::router::balancer::PORT_ZERO;
    use crate::utils::compute_keyhash;
    use crate::wire::{
        KvCodec, KvMessage, KvRequest, KvReply, Operation, OpType,
    };
    use bytes::Bytes;
    use std::net::Ipv4Addr;

    fn rack_addresses(n: usize) -> Vec<NodeAddress> {
        (0..n)
            .map(|i| NodeAddress {
                mac: [0xe4, 0x1d, 0x2d, 0x2e, 0x35, 0x11 + i as u8],
                ipv4: Ipv4Addr::new(10, 10, 1, 7 + i as u8),
                udp_port: PORT_ZERO + i as u16,
                dev_port: i as u16,
                blacklist: vec![],
            })
            .collect()
    }

    /// Builds a full Ethernet/IPv4/UDP frame around an app payload.
    fn raw_frame(src_port: u16, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(APP_HEADER + payload.len());
        // Ethernet
        frame.extend_from_slice(&[0xff; 6]); // dst
        frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x99]); // src
        frame.extend_from_slice(&0x0800u16.to_be_bytes());
        // IPv4
        let total_len = (IP_SIZE + 8 + payload.len()) as u16;
        frame.push(0x45);
        frame.push(0);
        frame.extend_from_slice(&total_len.to_be_bytes());
        frame.extend_from_slice(&[0x1c, 0x46, 0x40, 0x00]); // id + flags
        frame.push(64); // ttl
        frame.push(17); // udp
        frame.extend_from_slice(&[0, 0]); // checksum placeholder
        frame.extend_from_slice(&Ipv4Addr::new(10, 10, 1, 100).octets());
        frame.extend_from_slice(&Ipv4Addr::new(10, 10, 1, 1).octets());
        let cksum = ipv4_checksum(&frame[IP_HEADER..IP_HEADER + IP_SIZE]);
        frame[IP_CKSUM..IP_CKSUM + 2].copy_from_slice(&cksum.to_be_bytes());
        // UDP
        frame.extend_from_slice(&src_port.to_be_bytes());
        frame.extend_from_slice(&9999u16.to_be_bytes());
        frame.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(payload);
        frame
    }

    fn kv_request_payload(key: &[u8]) -> Bytes {
        KvCodec::from_name("pegasus")
            .unwrap()
            .encode(&KvMessage::Request(KvRequest {
                client_id: 0,
                req_id: 7,
                req_time: 0,
                node_id: 0,
                op: Operation {
                    op_type: OpType::Get,
                    keyhash: compute_keyhash(key),
                    ver: 0,
                    key: Bytes::copy_from_slice(key),
                    ..Default::default()
                },
            }))
            .unwrap()
    }

    #[test]
    fn rfc1071_checksum_vector() {
        let header: [u8; 20] = [
            0x45, 0x00, 0x00, 0x3c, 0x1c, 0x46, 0x40, 0x00, 0x40, 0x06,
            0x00, 0x00, 0xac, 0x10, 0x0a, 0x63, 0xac, 0x10, 0x0a, 0x0c,
        ];
        assert_eq!(ipv4_checksum(&header), 0xb1e6);
    }

    #[test]
    fn request_steered_and_rewritten() -> Result<(), PegasusError> {
        let addrs = rack_addresses(4);
        let router = PacketRouter::new(addrs.clone(), 1.0)?;
        router.balancer().seed_loads(&[10, 0, 0, 0]);

        // pick a key landing on the overloaded node 0
        let mut key = None;
        for candidate in 0u32.. {
            let k = format!("key{}", candidate);
            if djb2_hash(k.as_bytes()) % 4 == 0 {
                key = Some(k);
                break;
            }
        }
        let key = key.unwrap();

        let mut frame = raw_frame(23456, &kv_request_payload(key.as_bytes()));
        let action = router.process_frame(&mut frame);
        // shed to node 1, the next index within the load bound
        assert_eq!(action, RouterAction::Forward(1));
        assert_eq!(router.balancer().load_of(1), 1);

        assert_eq!(&frame[ETH_DST..ETH_DST + 6], &addrs[1].mac);
        assert_eq!(
            &frame[IP_DST..IP_DST + 4],
            &addrs[1].ipv4.octets()
        );
        assert_eq!(
            u16::from_be_bytes([frame[UDP_DST], frame[UDP_DST + 1]]),
            addrs[1].udp_port
        );
        // rewritten IPv4 header checksum re-validates
        let mut check = frame[IP_HEADER..IP_HEADER + IP_SIZE].to_vec();
        check[10] = 0;
        check[11] = 0;
        assert_eq!(
            ipv4_checksum(&check).to_be_bytes(),
            [frame[IP_CKSUM], frame[IP_CKSUM + 1]]
        );
        assert_eq!(frame[UDP_CKSUM], 0);
        assert_eq!(frame[UDP_CKSUM + 1], 0);
        Ok(())
    }

    #[test]
    fn reply_decrements_by_source_port() -> Result<(), PegasusError> {
        let router = PacketRouter::new(rack_addresses(4), 1.0)?;
        let payload = KvCodec::from_name("pegasus")
            .unwrap()
            .encode(&KvMessage::Reply(KvReply {
                node_id: 2,
                ..Default::default()
            }))?;

        let mut frame = raw_frame(PORT_ZERO + 2, &payload);
        assert_eq!(router.process_frame(&mut frame), RouterAction::Pass);
        assert_eq!(router.balancer().load_of(2), -1);

        // replies from ports outside the node range are dropped
        let mut bogus = raw_frame(PORT_ZERO + 9, &payload);
        assert_eq!(router.process_frame(&mut bogus), RouterAction::Drop);
        Ok(())
    }

    #[test]
    fn reset_frame_consumed() -> Result<(), PegasusError> {
        let router = PacketRouter::new(rack_addresses(4), 1.0)?;
        router.balancer().seed_loads(&[1, 2, 3, 4]);

        let reset = ControllerCodec::new().encode(
            &ControllerMessage::ResetRequest {
                num_nodes: 2,
                num_rkeys: 8,
            },
        )?;
        let mut frame = raw_frame(45678, &reset);
        assert_eq!(router.process_frame(&mut frame), RouterAction::Drop);
        assert_eq!(router.balancer().num_nodes(), 2);
        assert_eq!(router.balancer().load_of(0), 0);
        assert_eq!(router.balancer().load_of(3), 0);
        Ok(())
    }

    #[test]
    fn unknown_and_truncated_frames_dropped() -> Result<(), PegasusError> {
        let router = PacketRouter::new(rack_addresses(2), 1.0)?;

        let mut junk = raw_frame(1, &[0xAB, 0xCD, 0x00, 0x00]);
        assert_eq!(router.process_frame(&mut junk), RouterAction::Drop);

        let mut tiny = vec![0u8; APP_HEADER];
        assert_eq!(router.process_frame(&mut tiny), RouterAction::Drop);

        // a KV request whose key_len overruns the frame
        let payload = kv_request_payload(b"goodkey");
        let mut cut = raw_frame(1, &payload[..payload.len() - 3]);
        assert_eq!(router.process_frame(&mut cut), RouterAction::Drop);
        Ok(())
    }
}
