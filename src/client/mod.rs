//! Closed-loop client stub: builds requests, routes them to the proper rack
//! and node, and correlates replies by request ID.

use std::sync::Arc;

use bytes::Bytes;

use serde::Deserialize;

use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::cluster::RackTopology;
use crate::transport::MAX_FRAME_SIZE;
use crate::utils::{compute_keyhash, PegasusError};
use crate::wire::{
    ClientId, KvCodec, KvMessage, KvReply, KvRequest, NodeId, Operation,
    OpType, RackId, Ver,
};

/// Configuration parameters struct.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Send requests through the endhost load balancer instead of straight
    /// to the hash-mapped server.
    pub use_endhost_lb: bool,
}

#[allow(clippy::derivable_impls)]
impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            use_endhost_lb: false,
        }
    }
}

/// A closed-loop KV client endpoint.
pub struct KvClient {
    /// My client ID (indexes the topology's client list).
    id: ClientId,

    /// Configuration parameters struct.
    config: ClientConfig,

    /// Cluster topology.
    topology: Arc<RackTopology>,

    /// KV wire codec.
    codec: KvCodec,

    /// Socket bound at my topology address so tail servers can reach me.
    socket: UdpSocket,

    /// Next request ID to allocate.
    next_req_id: u32,

    /// Time base for request timestamps.
    start: Instant,
}

impl KvClient {
    /// Binds the client's socket at its topology address.
    pub async fn new_and_setup(
        id: ClientId,
        topology: Arc<RackTopology>,
        codec: KvCodec,
        config_str: Option<&str>,
    ) -> Result<Self, PegasusError> {
        let config =
            parsed_config!(config_str => ClientConfig; use_endhost_lb)?;
        if config.use_endhost_lb && !topology.has_lb() {
            return logged_err!("endhost LB enabled but no lb in topology");
        }
        let addr = topology.client_addr(id)?.socket_addr();
        let socket = UdpSocket::bind(addr).await?;
        pf_debug!("client {} bound on {}", id, addr);

        Ok(KvClient {
            id,
            config,
            topology,
            codec,
            socket,
            next_req_id: 0,
            start: Instant::now(),
        })
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Issues a GET and waits for its reply. Reads go to the tail rack.
    pub async fn get(&mut self, key: &[u8]) -> Result<KvReply, PegasusError> {
        self.issue(Operation {
            op_type: OpType::Get,
            keyhash: compute_keyhash(key),
            ver: 0,
            key: Bytes::copy_from_slice(key),
            value: Bytes::new(),
        })
        .await
    }

    /// Issues a PUT with an explicit version and waits for its reply.
    /// Writes enter the chain at the head rack.
    pub async fn put(
        &mut self,
        key: &[u8],
        value: &[u8],
        ver: Ver,
    ) -> Result<KvReply, PegasusError> {
        self.issue(Operation {
            op_type: OpType::Put,
            keyhash: compute_keyhash(key),
            ver,
            key: Bytes::copy_from_slice(key),
            value: Bytes::copy_from_slice(value),
        })
        .await
    }

    /// Issues a DEL and waits for its reply.
    pub async fn del(
        &mut self,
        key: &[u8],
        ver: Ver,
    ) -> Result<KvReply, PegasusError> {
        self.issue(Operation {
            op_type: OpType::Del,
            keyhash: compute_keyhash(key),
            ver,
            key: Bytes::copy_from_slice(key),
            value: Bytes::new(),
        })
        .await
    }

    /// Sends one request and blocks until the matching reply arrives.
    /// Replies with stale request IDs (e.g. from client retries) are skipped.
    async fn issue(&mut self, op: Operation) -> Result<KvReply, PegasusError> {
        self.next_req_id += 1;
        let req_id = self.next_req_id;

        let num_nodes = self.topology.num_nodes_per_rack();
        let node_id = (op.keyhash as usize % num_nodes) as NodeId;
        let rack_id: RackId = if op.op_type == OpType::Get {
            (self.topology.num_racks() - 1) as RackId
        } else {
            0
        };

        let frame = self.codec.encode(&KvMessage::Request(KvRequest {
            client_id: self.id,
            req_id,
            req_time: self.start.elapsed().as_micros() as u32,
            node_id,
            op,
        }))?;

        let dest = if self.config.use_endhost_lb {
            self.topology.lb_addr()?.socket_addr()
        } else {
            self.topology.node_addr(rack_id, node_id)?.socket_addr()
        };
        self.socket.send_to(&frame, dest).await?;

        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        loop {
            let (len, _src) = self.socket.recv_from(&mut buf).await?;
            match self.codec.decode(&buf[..len]) {
                Ok(KvMessage::Reply(reply)) if reply.req_id == req_id => {
                    return Ok(reply);
                }
                Ok(_) => pf_trace!("skipping unmatched reply"),
                Err(e) => pf_trace!("skipping undecodable frame: {}", e),
            }
        }
    }
}
