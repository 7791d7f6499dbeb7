//! Server request engine: operation application, chain-replication hop,
//! hot-key sampling/reporting, and controller-driven key migration.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use bytes::Bytes;

use serde::Deserialize;

use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};

use crate::cluster::RackTopology;
use crate::server::hotkeys::HotKeySampler;
use crate::server::loadwin::LoadWindow;
use crate::server::store::Store;
use crate::transport::{DatagramApp, Transport, WorkerId};
use crate::utils::PegasusError;
use crate::wire::{
    ControllerCodec, ControllerMessage, CtrlAck, HotKeyEntry, KvCodec,
    KvMessage, KvReply, KvRequest, MigrationAck, MigrationRequest, NodeId,
    Operation, OpResult, OpType, RackId,
};

/// Configuration parameters struct.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Artificial per-request processing latency in microsecs (a test knob).
    pub proc_latency_us: u64,

    /// Value returned for missing GETs.
    pub default_value: String,

    /// Whether replies carry the epoch-window load.
    pub report_load: bool,

    /// Route replies and chain forwards through the endhost load balancer.
    pub use_endhost_lb: bool,

    /// Every `kr_sample_rate`-th request updates hot-key counts.
    pub kr_sample_rate: u64,

    /// Sampled count at which a key is considered hot.
    pub hk_threshold: u64,

    /// Hot-key reporting cadence in millisecs.
    pub hk_epoch_ms: u64,

    /// Maximum number of entries per hot-key report.
    pub max_hk_size: usize,

    /// Load window epoch duration in millisecs.
    pub epoch_duration_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            proc_latency_us: 0,
            default_value: String::new(),
            report_load: true,
            use_endhost_lb: false,
            kr_sample_rate: 100,
            hk_threshold: 32,
            hk_epoch_ms: 1000,
            max_hk_size: 32,
            epoch_duration_ms: 1000,
        }
    }
}

/// One back-end KV server.
pub struct KvServer {
    /// My rack ID in the chain.
    rack_id: RackId,

    /// My node ID within the rack.
    node_id: NodeId,

    /// Configuration parameters struct.
    config: ServerConfig,

    /// Cluster topology.
    topology: Arc<RackTopology>,

    /// KV wire codec (clients and peers frame with the same one).
    codec: KvCodec,

    /// Controller wire codec.
    ctrl_codec: ControllerCodec,

    /// Versioned key-value store.
    store: Store,

    /// Per-worker hot-key sampling state.
    sampler: HotKeySampler,

    /// Epoch load window.
    load_window: LoadWindow,

    /// Datagram transport for all sends.
    transport: Arc<dyn Transport>,

    /// Default value as owned bytes.
    default_value: Bytes,
}

impl KvServer {
    /// Creates the server engine. `n_workers` must match the transport's
    /// worker count so per-worker sampling tables line up.
    pub fn new_and_setup(
        rack_id: RackId,
        node_id: NodeId,
        topology: Arc<RackTopology>,
        codec: KvCodec,
        transport: Arc<dyn Transport>,
        n_workers: usize,
        config_str: Option<&str>,
    ) -> Result<Self, PegasusError> {
        let config = parsed_config!(config_str => ServerConfig;
                                    proc_latency_us, default_value,
                                    report_load, use_endhost_lb,
                                    kr_sample_rate, hk_threshold, hk_epoch_ms,
                                    max_hk_size, epoch_duration_ms)?;
        if config.kr_sample_rate == 0 {
            return logged_err!(
                "invalid config.kr_sample_rate '{}'",
                config.kr_sample_rate
            );
        }
        if config.hk_epoch_ms == 0 {
            return logged_err!(
                "invalid config.hk_epoch_ms '{}'",
                config.hk_epoch_ms
            );
        }
        topology.node_addr(rack_id, node_id)?; // I must exist in the topology
        if config.use_endhost_lb && !topology.has_lb() {
            return logged_err!("endhost LB enabled but no lb in topology");
        }

        let sampler = HotKeySampler::new(
            n_workers,
            config.kr_sample_rate,
            config.hk_threshold,
        );
        let load_window =
            LoadWindow::new(Duration::from_millis(config.epoch_duration_ms));
        let default_value = Bytes::from(config.default_value.clone());

        Ok(KvServer {
            rack_id,
            node_id,
            config,
            topology,
            codec,
            ctrl_codec: ControllerCodec::new(),
            store: Store::new(),
            sampler,
            load_window,
            transport,
            default_value,
        })
    }

    pub fn rack_id(&self) -> RackId {
        self.rack_id
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Shared view of the store (used by tests and debug tooling).
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Spawns the periodic hot-key reporting task.
    pub fn spawn_hotkey_reporter(self: &Arc<Self>) -> JoinHandle<()> {
        let server = self.clone();
        let epoch = Duration::from_millis(server.config.hk_epoch_ms);
        tokio::spawn(async move {
            pf_debug!("hot-key reporter spawned");
            let mut ticker = time::interval(epoch);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                if let Err(e) = server.report_hot_keys().await {
                    pf_error!("error reporting hot keys: {}", e);
                }
            }
        })
    }

    /// Merges the per-worker tables and emits one HK_REPORT, capped and
    /// sorted by count descending. Skips emission when nothing is hot.
    pub async fn report_hot_keys(&self) -> Result<(), PegasusError> {
        let merged = self.sampler.drain_merged();
        if merged.is_empty() {
            return Ok(());
        }

        let mut sorted: Vec<(u32, u64)> = merged.into_iter().collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1));
        let reports: Vec<HotKeyEntry> = sorted
            .into_iter()
            .take(self.config.max_hk_size)
            .map(|(keyhash, count)| HotKeyEntry {
                keyhash,
                load: count.min(u16::MAX as u64) as u16,
            })
            .collect();
        pf_debug!("reporting {} hot keys", reports.len());

        let frame = self
            .ctrl_codec
            .encode(&ControllerMessage::HotKeyReport { reports })?;
        self.transport.send_to_controller(frame, self.rack_id).await
    }

    /// Applies one operation to the store and builds the reply skeleton.
    fn process_op(&self, op: &Operation, tid: WorkerId) -> KvReply {
        let mut reply = KvReply {
            node_id: self.node_id,
            op_type: op.op_type,
            keyhash: op.keyhash,
            ver: op.ver,
            key: op.key.clone(),
            load: if self.config.report_load {
                self.load_window.observe(Instant::now())
            } else {
                0
            },
            ..Default::default()
        };

        match op.op_type {
            OpType::Get => match self.store.find_shared(&op.key) {
                Some(record) => {
                    reply.result = OpResult::Ok;
                    reply.value = record.value.clone();
                }
                None => {
                    reply.result = OpResult::NotFound;
                    reply.value = self.default_value.clone();
                }
            },
            OpType::Put | OpType::PutFwd => {
                self.store.apply_versioned(&op.key, &op.value, op.ver);
                reply.op_type = OpType::Put; // clients never see PUTFWD
                reply.result = OpResult::Ok;
                reply.value = op.value.clone(); // echoed for netcache
            }
            OpType::Del => {
                self.store.erase(&op.key);
                reply.result = OpResult::Ok;
                reply.value = Bytes::new();
            }
        }

        self.sampler.observe(tid, op.keyhash, &op.key);
        reply
    }

    /// Full request pipeline: apply, then take the chain-replication hop.
    async fn handle_kv_request(
        &self,
        req: KvRequest,
        tid: WorkerId,
    ) -> Result<(), PegasusError> {
        if self.config.proc_latency_us > 0 {
            time::sleep(Duration::from_micros(self.config.proc_latency_us))
                .await;
        }

        let mut reply = self.process_op(&req.op, tid);

        let out = if self.topology.is_tail_rack(self.rack_id) {
            // tail rack answers the client
            reply.client_id = req.client_id;
            reply.req_id = req.req_id;
            reply.req_time = req.req_time;
            KvMessage::Reply(reply)
        } else {
            // non-tail racks forward the request along the chain
            let mut fwd = req.clone();
            fwd.op.op_type = OpType::PutFwd;
            KvMessage::Request(fwd)
        };
        let frame = self.codec.encode(&out)?;

        if self.config.use_endhost_lb {
            self.transport.send_to_lb(frame).await
        } else if self.topology.is_tail_rack(self.rack_id) {
            let client = self.topology.client_addr(req.client_id)?;
            self.transport.send_to(frame, client.socket_addr()).await
        } else {
            self.transport
                .send_to_node(frame, self.rack_id + 1, self.node_id)
                .await
        }
    }

    /// Applies a peer's migration under the version guard; acks to the LB
    /// only when accepted, and stays silent on stale migrations.
    async fn handle_migration_request(
        &self,
        mgr: MigrationRequest,
    ) -> Result<(), PegasusError> {
        if !self.store.apply_versioned(&mgr.key, &mgr.value, mgr.ver) {
            pf_trace!("discarded stale migration of keyhash {}", mgr.keyhash);
            return Ok(());
        }

        let ack = KvMessage::MigrationAck(MigrationAck {
            keyhash: mgr.keyhash,
            ver: mgr.ver,
            node_id: self.node_id,
        });
        let frame = self.codec.encode(&ack)?;
        self.transport.send_to_lb(frame).await
    }

    /// Controller asked me to replicate a key: fan the current value out to
    /// every other node in my rack.
    async fn handle_key_migration(
        &self,
        keyhash: u32,
        key: Bytes,
    ) -> Result<(), PegasusError> {
        let key = if key.is_empty() {
            match self.sampler.resolve_key(keyhash) {
                Some(key) => key,
                None => {
                    pf_warn!("no key known for migrated hash {}", keyhash);
                    return Ok(());
                }
            }
        } else {
            key
        };

        let (value, ver) = match self.store.find_shared(&key) {
            Some(record) => (record.value.clone(), record.ver),
            None => (self.default_value.clone(), 0),
        };
        let frame =
            self.codec
                .encode(&KvMessage::MigrationRequest(MigrationRequest {
                    keyhash,
                    ver,
                    key,
                    value,
                }))?;

        for node_id in 0..self.topology.num_nodes_per_rack() as NodeId {
            if node_id != self.node_id {
                self.transport
                    .send_to_local_node(frame.clone(), node_id)
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_ctrl_message(
        &self,
        msg: ControllerMessage,
        src: SocketAddr,
    ) -> Result<(), PegasusError> {
        match msg {
            ControllerMessage::KeyMigration { keyhash, key } => {
                self.handle_key_migration(keyhash, key).await
            }
            ControllerMessage::ResetRequest { .. } => {
                pf_info!("controller reset received");
                self.sampler.reset();
                let frame = self.ctrl_codec.encode(
                    &ControllerMessage::ResetReply { ack: CtrlAck::Ok },
                )?;
                self.transport.send_to(frame, src).await
            }
            _ => logged_err!("unexpected controller message at server"),
        }
    }

    async fn handle_kv_message(
        &self,
        msg: KvMessage,
        tid: WorkerId,
    ) -> Result<(), PegasusError> {
        match msg {
            KvMessage::Request(req) => self.handle_kv_request(req, tid).await,
            KvMessage::MigrationRequest(mgr) => {
                self.handle_migration_request(mgr).await
            }
            _ => logged_err!("unexpected kv message type at server"),
        }
    }
}

#[async_trait]
impl DatagramApp for KvServer {
    async fn receive(&self, frame: Bytes, src: SocketAddr, tid: WorkerId) {
        // controller codec first: only it matches on its own identifier
        if let Ok(ctrl_msg) = self.ctrl_codec.decode(&frame) {
            if let Err(e) = self.handle_ctrl_message(ctrl_msg, src).await {
                pf_error!("error handling ctrl message: {}", e);
            }
            return;
        }

        match self.codec.decode(&frame) {
            Ok(kv_msg) => {
                if let Err(e) = self.handle_kv_message(kv_msg, tid).await {
                    pf_error!("error handling kv message: {}", e);
                }
            }
            Err(e) => {
                // neither codec matched; drop the datagram
                pf_error!("unexpected message from {}: {}", src, e);
            }
        }
    }
}

#[cfg(test)]
mod engine_tests {
    use super::*;
    use crate::transport::testing::{RecordingTransport, SentTo};
    use crate::utils::compute_keyhash;

    const ONE_RACK: &str = "\
rack
node 02:00:00:00:00:01|10.0.0.1|12345|1
node 02:00:00:00:00:02|10.0.0.2|12346|2
client 02:00:00:00:00:10|10.0.0.100|23456|3
controller 02:00:00:00:00:20|10.0.0.200|45678|4
";

    const TWO_RACKS: &str = "\
rack
node 02:00:00:00:00:01|10.0.0.1|12345|1
rack
node 02:00:00:00:00:03|10.0.1.1|12345|1
client 02:00:00:00:00:10|10.0.0.100|23456|3
controller 02:00:00:00:00:20|10.0.0.200|45678|4
controller 02:00:00:00:00:21|10.0.1.200|45678|4
";

    fn make_server(
        topo_text: &str,
        rack_id: RackId,
        node_id: NodeId,
        config_str: Option<&str>,
    ) -> (Arc<KvServer>, Arc<RecordingTransport>) {
        let topology = Arc::new(RackTopology::from_str(topo_text).unwrap());
        let transport = RecordingTransport::new();
        let server = KvServer::new_and_setup(
            rack_id,
            node_id,
            topology,
            KvCodec::from_name("static").unwrap(),
            transport.clone(),
            1,
            config_str,
        )
        .unwrap();
        (Arc::new(server), transport)
    }

    fn codec() -> KvCodec {
        KvCodec::from_name("static").unwrap()
    }

    fn request(op_type: OpType, key: &str, value: &str, ver: u32) -> Bytes {
        let key = Bytes::copy_from_slice(key.as_bytes());
        codec()
            .encode(&KvMessage::Request(KvRequest {
                client_id: 0,
                req_id: 1,
                req_time: 0,
                node_id: 0,
                op: Operation {
                    op_type,
                    keyhash: compute_keyhash(&key),
                    ver,
                    key,
                    value: Bytes::copy_from_slice(value.as_bytes()),
                },
            }))
            .unwrap()
    }

    fn client_src() -> SocketAddr {
        "10.0.0.100:23456".parse().unwrap()
    }

    fn decoded_reply(frame: &Bytes) -> KvReply {
        match codec().decode(frame).unwrap() {
            KvMessage::Reply(reply) => reply,
            other => panic!("expected reply, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn put_then_get() {
        let (server, transport) = make_server(ONE_RACK, 0, 0, None);

        server
            .receive(request(OpType::Put, "foo", "bar", 1), client_src(), 0)
            .await;
        let sent = transport.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, SentTo::Addr(client_src()));
        let reply = decoded_reply(&sent[0].1);
        assert_eq!(reply.op_type, OpType::Put);
        assert_eq!(reply.result, OpResult::Ok);
        assert_eq!(reply.value, Bytes::from_static(b"bar"));

        server
            .receive(request(OpType::Get, "foo", "", 0), client_src(), 0)
            .await;
        let sent = transport.take();
        let reply = decoded_reply(&sent[0].1);
        assert_eq!(reply.result, OpResult::Ok);
        assert_eq!(reply.value, Bytes::from_static(b"bar"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stale_put_rejected() {
        let (server, transport) = make_server(ONE_RACK, 0, 0, None);

        server
            .receive(request(OpType::Put, "foo", "bar", 1), client_src(), 0)
            .await;
        transport.take();

        // the reply echoes the request value, but the store keeps "bar"
        server
            .receive(request(OpType::Put, "foo", "baz", 0), client_src(), 0)
            .await;
        let sent = transport.take();
        let reply = decoded_reply(&sent[0].1);
        assert_eq!(reply.result, OpResult::Ok);
        assert_eq!(reply.value, Bytes::from_static(b"baz"));

        server
            .receive(request(OpType::Get, "foo", "", 0), client_src(), 0)
            .await;
        let sent = transport.take();
        assert_eq!(
            decoded_reply(&sent[0].1).value,
            Bytes::from_static(b"bar")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_get_not_found() {
        let (server, transport) =
            make_server(ONE_RACK, 0, 0, Some("default_value = 'none'"));

        server
            .receive(request(OpType::Get, "missing", "", 0), client_src(), 0)
            .await;
        let sent = transport.take();
        let reply = decoded_reply(&sent[0].1);
        assert_eq!(reply.result, OpResult::NotFound);
        assert_eq!(reply.value, Bytes::from_static(b"none"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn del_removes_key() {
        let (server, transport) = make_server(ONE_RACK, 0, 0, None);

        server
            .receive(request(OpType::Put, "foo", "bar", 1), client_src(), 0)
            .await;
        server
            .receive(request(OpType::Del, "foo", "", 2), client_src(), 0)
            .await;
        transport.take();
        assert!(server.store().find_shared(b"foo").is_none());

        server
            .receive(request(OpType::Get, "foo", "", 0), client_src(), 0)
            .await;
        let sent = transport.take();
        assert_eq!(decoded_reply(&sent[0].1).result, OpResult::NotFound);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn chain_write_head_to_tail() {
        let (head, head_transport) = make_server(TWO_RACKS, 0, 0, None);
        let (tail, tail_transport) = make_server(TWO_RACKS, 1, 0, None);

        head.receive(request(OpType::Put, "foo", "bar", 1), client_src(), 0)
            .await;

        // head applied locally and forwarded as PUTFWD to (1, 0)
        assert_eq!(head.store().find_shared(b"foo").unwrap().ver, 1);
        let sent = head_transport.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, SentTo::Node(1, 0));
        match codec().decode(&sent[0].1).unwrap() {
            KvMessage::Request(fwd) => {
                assert_eq!(fwd.op.op_type, OpType::PutFwd);
                assert_eq!(fwd.op.value, Bytes::from_static(b"bar"));
            }
            other => panic!("expected forwarded request, got {:?}", other),
        }

        // tail applies the forward and answers the client
        tail.receive(sent[0].1.clone(), "10.0.0.1:12345".parse().unwrap(), 0)
            .await;
        assert_eq!(
            tail.store().find_shared(b"foo").unwrap().value,
            Bytes::from_static(b"bar")
        );
        let sent = tail_transport.take();
        assert_eq!(sent[0].0, SentTo::Addr(client_src()));
        let reply = decoded_reply(&sent[0].1);
        assert_eq!(reply.op_type, OpType::Put);
        assert_eq!(reply.result, OpResult::Ok);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn migration_request_acks_to_lb_once() {
        let topo = format!("{}lb 02:00:00:00:00:30|10.0.0.50|34567|5", ONE_RACK);
        let topology = Arc::new(RackTopology::from_str(&topo).unwrap());
        let transport = RecordingTransport::new();
        let server = Arc::new(
            KvServer::new_and_setup(
                0,
                1,
                topology,
                codec(),
                transport.clone(),
                1,
                None,
            )
            .unwrap(),
        );

        let mgr = codec()
            .encode(&KvMessage::MigrationRequest(MigrationRequest {
                keyhash: compute_keyhash(b"hot"),
                ver: 3,
                key: Bytes::from_static(b"hot"),
                value: Bytes::from_static(b"value"),
            }))
            .unwrap();
        server.receive(mgr, "10.0.0.1:12345".parse().unwrap(), 0).await;

        let sent = transport.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, SentTo::Lb);
        match codec().decode(&sent[0].1).unwrap() {
            KvMessage::MigrationAck(ack) => {
                assert_eq!(ack.keyhash, compute_keyhash(b"hot"));
                assert_eq!(ack.ver, 3);
                assert_eq!(ack.node_id, 1);
            }
            other => panic!("expected ack, got {:?}", other),
        }

        // a stale re-migration is silently dropped
        let stale = codec()
            .encode(&KvMessage::MigrationRequest(MigrationRequest {
                keyhash: compute_keyhash(b"hot"),
                ver: 2,
                key: Bytes::from_static(b"hot"),
                value: Bytes::from_static(b"older"),
            }))
            .unwrap();
        server
            .receive(stale, "10.0.0.1:12345".parse().unwrap(), 0)
            .await;
        assert!(transport.take().is_empty());
        assert_eq!(
            server.store().find_shared(b"hot").unwrap().value,
            Bytes::from_static(b"value")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn key_migration_fans_out_to_rack_peers() {
        let (server, transport) = make_server(ONE_RACK, 0, 0, None);

        server
            .receive(request(OpType::Put, "hot", "value", 7), client_src(), 0)
            .await;
        transport.take();

        let key_mgr = ControllerCodec::new()
            .encode(&ControllerMessage::KeyMigration {
                keyhash: compute_keyhash(b"hot"),
                key: Bytes::from_static(b"hot"),
            })
            .unwrap();
        server
            .receive(key_mgr, "10.0.0.200:45678".parse().unwrap(), 0)
            .await;

        let sent = transport.take();
        assert_eq!(sent.len(), 1); // one peer in a two-node rack
        assert_eq!(sent[0].0, SentTo::LocalNode(1));
        match codec().decode(&sent[0].1).unwrap() {
            KvMessage::MigrationRequest(mgr) => {
                assert_eq!(mgr.key, Bytes::from_static(b"hot"));
                assert_eq!(mgr.value, Bytes::from_static(b"value"));
                assert_eq!(mgr.ver, 7);
            }
            other => panic!("expected migration request, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn key_migration_resolves_unnamed_keys() {
        let (server, transport) = make_server(
            ONE_RACK,
            0,
            0,
            Some("kr_sample_rate = 1\nhk_threshold = 1"),
        );

        server
            .receive(request(OpType::Put, "hot", "value", 1), client_src(), 0)
            .await;
        transport.take();

        // keyhash-only migration; the reverse table supplies the key
        let key_mgr = ControllerCodec::new()
            .encode(&ControllerMessage::KeyMigration {
                keyhash: compute_keyhash(b"hot"),
                key: Bytes::new(),
            })
            .unwrap();
        server
            .receive(key_mgr, "10.0.0.200:45678".parse().unwrap(), 0)
            .await;

        let sent = transport.take();
        assert_eq!(sent.len(), 1);
        match codec().decode(&sent[0].1).unwrap() {
            KvMessage::MigrationRequest(mgr) => {
                assert_eq!(mgr.key, Bytes::from_static(b"hot"));
            }
            other => panic!("expected migration request, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn hot_key_reported_once_per_epoch() {
        let (server, transport) = make_server(ONE_RACK, 0, 0, None);

        // 3,200 GETs for one key: 32 samples at rate 100, hitting the
        // threshold exactly
        for _ in 0..3200 {
            server
                .receive(request(OpType::Get, "hot", "", 0), client_src(), 0)
                .await;
        }
        transport.take();

        server.report_hot_keys().await.unwrap();
        let sent = transport.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, SentTo::Controller(0));
        match ControllerCodec::new().decode(&sent[0].1).unwrap() {
            ControllerMessage::HotKeyReport { reports } => {
                assert_eq!(reports.len(), 1);
                assert_eq!(reports[0].keyhash, compute_keyhash(b"hot"));
                assert_eq!(reports[0].load, 32);
            }
            other => panic!("expected hk report, got {:?}", other),
        }

        // epoch state was cleared: nothing further to report
        server.report_hot_keys().await.unwrap();
        assert!(transport.take().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn hot_key_report_capped_and_sorted() {
        // sample every request, promote at count 1, report at most 3 keys
        let (server, transport) = make_server(
            ONE_RACK,
            0,
            0,
            Some("kr_sample_rate = 1\nhk_threshold = 1\nmax_hk_size = 3"),
        );

        for (key, hits) in
            [("k1", 2), ("k2", 9), ("k3", 4), ("k4", 7), ("k5", 1)]
        {
            for _ in 0..hits {
                server
                    .receive(request(OpType::Get, key, "", 0), client_src(), 0)
                    .await;
            }
        }
        transport.take();

        server.report_hot_keys().await.unwrap();
        let sent = transport.take();
        match ControllerCodec::new().decode(&sent[0].1).unwrap() {
            ControllerMessage::HotKeyReport { reports } => {
                let counts: Vec<u16> =
                    reports.iter().map(|r| r.load).collect();
                assert_eq!(counts, vec![9, 7, 4]); // capped, descending
                let mut hashes: Vec<u32> =
                    reports.iter().map(|r| r.keyhash).collect();
                hashes.dedup();
                assert_eq!(hashes.len(), 3); // no keyhash appears twice
            }
            other => panic!("expected hk report, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reset_request_acked_to_sender() {
        let (server, transport) = make_server(ONE_RACK, 0, 0, None);
        let ctrl_src: SocketAddr = "10.0.0.200:45678".parse().unwrap();

        let reset = ControllerCodec::new()
            .encode(&ControllerMessage::ResetRequest {
                num_nodes: 2,
                num_rkeys: 8,
            })
            .unwrap();
        server.receive(reset, ctrl_src, 0).await;

        let sent = transport.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, SentTo::Addr(ctrl_src));
        assert_eq!(
            ControllerCodec::new().decode(&sent[0].1).unwrap(),
            ControllerMessage::ResetReply { ack: CtrlAck::Ok }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn undecodable_frame_dropped() {
        let (server, transport) = make_server(ONE_RACK, 0, 0, None);
        server
            .receive(Bytes::from_static(b"\xde\xad\xbe\xef"), client_src(), 0)
            .await;
        assert!(transport.take().is_empty());
    }
}
