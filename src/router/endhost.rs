//! Endhost load balancer: the router datapath recast as a datagram
//! application, for deployments without a programmable fabric.
//!
//! Unlike the raw fast path, frames here are re-framed through the codec, so
//! selection uses the key hash already carried in the header, and the chosen
//! node is written back into the forwarded request for the chain downstream.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use bytes::Bytes;

use dashmap::DashMap;

use serde::Deserialize;

use crate::cluster::RackTopology;
use crate::router::balancer::LoadBalancer;
use crate::transport::{DatagramApp, Transport, WorkerId};
use crate::utils::{KeyHash, PegasusError};
use crate::wire::{
    ControllerCodec, ControllerMessage, KvCodec, KvMessage, KvRequest,
    OpType, RackId, Ver,
};

/// Configuration parameters struct.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    /// Probe threshold multiplier over the mean outstanding load.
    pub load_constant: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig { load_constant: 1.0 }
    }
}

/// The endhost load-balancer application.
pub struct EndhostLb {
    /// Cluster topology.
    topology: Arc<RackTopology>,

    /// KV wire codec shared with servers and clients.
    codec: KvCodec,

    /// Controller wire codec.
    ctrl_codec: ControllerCodec,

    /// Outstanding-load table and selection state.
    balancer: LoadBalancer,

    /// Fan-out table of replicated (migrated) keys, keyed by hash, with the
    /// highest acked version.
    rkeys: DashMap<KeyHash, Ver>,

    /// Datagram transport for all sends.
    transport: Arc<dyn Transport>,
}

impl EndhostLb {
    pub fn new_and_setup(
        topology: Arc<RackTopology>,
        codec: KvCodec,
        transport: Arc<dyn Transport>,
        config_str: Option<&str>,
    ) -> Result<Self, PegasusError> {
        let config =
            parsed_config!(config_str => RouterConfig; load_constant)?;
        let balancer = LoadBalancer::new(
            topology.num_nodes_per_rack(),
            config.load_constant,
        )?;

        Ok(EndhostLb {
            topology,
            codec,
            ctrl_codec: ControllerCodec::new(),
            balancer,
            rkeys: DashMap::new(),
            transport,
        })
    }

    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    /// Is this keyhash currently replicated across its rack?
    pub fn is_replicated(&self, keyhash: KeyHash) -> bool {
        self.rkeys.contains_key(&keyhash)
    }

    /// Steers one request: chain forwards stay on their node and move one
    /// rack down; client requests go to the tail rack (reads) or the head
    /// rack (writes) on a load-selected node.
    async fn handle_request(
        &self,
        mut req: KvRequest,
        src: SocketAddr,
    ) -> Result<(), PegasusError> {
        let (rack_id, node_id) = if req.op.op_type == OpType::PutFwd {
            match self.topology.locate(src) {
                Some((src_rack, src_node)) => (src_rack + 1, src_node),
                None => {
                    return logged_err!(
                        "chain forward from unknown server {}",
                        src
                    );
                }
            }
        } else {
            let rack_id = if req.op.op_type == OpType::Get {
                (self.topology.num_racks() - 1) as RackId
            } else {
                0
            };
            (rack_id, self.balancer.pick_node(req.op.keyhash as u64))
        };

        self.balancer.note_forwarded(node_id);
        req.node_id = node_id;
        let frame = self.codec.encode(&KvMessage::Request(req))?;
        self.transport.send_to_node(frame, rack_id, node_id).await
    }

    async fn handle_kv_message(
        &self,
        msg: KvMessage,
        src: SocketAddr,
    ) -> Result<(), PegasusError> {
        match msg {
            KvMessage::Request(req) => self.handle_request(req, src).await,

            KvMessage::Reply(reply) => {
                // correlate by the per-reply node id, then relay
                self.balancer.note_reply(reply.node_id);
                let client =
                    self.topology.client_addr(reply.client_id)?.socket_addr();
                let frame = self.codec.encode(&KvMessage::Reply(reply))?;
                self.transport.send_to(frame, client).await
            }

            KvMessage::MigrationAck(ack) => {
                // fan-out bookkeeping only; acks are not relayed further
                self.rkeys.insert(ack.keyhash, ack.ver);
                pf_debug!(
                    "keyhash {} replicated at node {} (ver {})",
                    ack.keyhash,
                    ack.node_id,
                    ack.ver
                );
                Ok(())
            }

            KvMessage::MigrationRequest(_) => {
                logged_err!("unexpected migration request at LB")
            }
        }
    }

    fn handle_ctrl_message(
        &self,
        msg: ControllerMessage,
    ) -> Result<(), PegasusError> {
        match msg {
            ControllerMessage::ResetRequest { num_nodes, .. } => {
                pf_info!("controller reset: num_nodes {}", num_nodes);
                let bound = self.topology.num_nodes_per_rack() as u16;
                self.balancer.reset(num_nodes.min(bound));
                self.rkeys.clear();
                Ok(()) // the router sends no reset reply
            }
            _ => logged_err!("unexpected controller message at LB"),
        }
    }
}

#[async_trait]
impl DatagramApp for EndhostLb {
    async fn receive(&self, frame: Bytes, src: SocketAddr, _tid: WorkerId) {
        if let Ok(ctrl_msg) = self.ctrl_codec.decode(&frame) {
            if let Err(e) = self.handle_ctrl_message(ctrl_msg) {
                pf_error!("error handling ctrl message: {}", e);
            }
            return;
        }

        match self.codec.decode(&frame) {
            Ok(kv_msg) => {
                if let Err(e) = self.handle_kv_message(kv_msg, src).await {
                    pf_error!("error handling kv message: {}", e);
                }
            }
            Err(e) => {
                // undecodable frames are silently dropped on the data path
                pf_trace!("dropping frame from {}: {}", src, e);
            }
        }
    }
}
