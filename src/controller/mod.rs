//! Controller core: cluster reset, hot-key report aggregation, and
//! controller-initiated key migration.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use bytes::Bytes;

use dashmap::DashMap;

use serde::Deserialize;

use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};

use crate::cluster::RackTopology;
use crate::transport::{DatagramApp, Transport, WorkerId};
use crate::utils::{KeyHash, PegasusError};
use crate::wire::{
    ControllerCodec, ControllerMessage, HotKeyEntry, NodeId, RackId,
};

/// Configuration parameters struct.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Replicated-key budget: how many distinct hot keys to keep migrated.
    pub num_rkeys: usize,

    /// Hot-key aggregation window in millisecs.
    pub hk_window_ms: u64,

    /// How long to wait for reset replies before proceeding.
    pub reset_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            num_rkeys: 32,
            hk_window_ms: 5000,
            reset_timeout_ms: 1000,
        }
    }
}

/// Aggregated load for one reported key hash.
#[derive(Debug, Clone, Copy)]
struct AggEntry {
    load: u64,
    /// Rack of the most recent reporter; migrations go to this rack's
    /// hash-owning node.
    rack_id: RackId,
}

/// The cluster controller.
pub struct Controller {
    /// Cluster topology.
    topology: Arc<RackTopology>,

    /// Configuration parameters struct.
    config: ControllerConfig,

    /// Controller wire codec.
    ctrl_codec: ControllerCodec,

    /// Datagram transport for all sends.
    transport: Arc<dyn Transport>,

    /// Hot-key loads accumulated over the current window.
    agg: DashMap<KeyHash, AggEntry>,

    /// Key hashes already instructed to replicate. Re-issuing a migration is
    /// harmless (application is version-guarded), so entries persist until
    /// the next reset.
    replicated: DashMap<KeyHash, ()>,

    /// Reset replies observed since the last broadcast.
    reset_acks: AtomicUsize,
}

impl Controller {
    pub fn new_and_setup(
        topology: Arc<RackTopology>,
        transport: Arc<dyn Transport>,
        config_str: Option<&str>,
    ) -> Result<Self, PegasusError> {
        let config = parsed_config!(config_str => ControllerConfig;
                                    num_rkeys, hk_window_ms,
                                    reset_timeout_ms)?;
        if config.hk_window_ms == 0 {
            return logged_err!(
                "invalid config.hk_window_ms '{}'",
                config.hk_window_ms
            );
        }

        Ok(Controller {
            topology,
            config,
            ctrl_codec: ControllerCodec::new(),
            transport,
            agg: DashMap::new(),
            replicated: DashMap::new(),
            reset_acks: AtomicUsize::new(0),
        })
    }

    /// Broadcasts RESET_REQ to every server, waits (bounded) for their
    /// replies, then fans the reset out to the router. Also drops all local
    /// aggregation state.
    pub async fn reset_cluster(&self) -> Result<(), PegasusError> {
        self.agg.clear();
        self.replicated.clear();
        self.reset_acks.store(0, Ordering::Relaxed);

        let frame = self.ctrl_codec.encode(&ControllerMessage::ResetRequest {
            num_nodes: self.topology.num_nodes_per_rack() as u16,
            num_rkeys: self.config.num_rkeys as u16,
        })?;

        let mut expected = 0;
        for rack_id in 0..self.topology.num_racks() as RackId {
            for node_id in 0..self.topology.num_nodes_per_rack() as NodeId {
                self.transport
                    .send_to_node(frame.clone(), rack_id, node_id)
                    .await?;
                expected += 1;
            }
        }

        let deadline = Instant::now()
            + Duration::from_millis(self.config.reset_timeout_ms);
        while self.reset_acks.load(Ordering::Relaxed) < expected {
            if Instant::now() >= deadline {
                pf_warn!(
                    "reset proceeding with {} of {} replies",
                    self.reset_acks.load(Ordering::Relaxed),
                    expected
                );
                break;
            }
            time::sleep(Duration::from_millis(5)).await;
        }

        if self.topology.has_lb() {
            self.transport.send_to_lb(frame).await?;
        }
        pf_info!("cluster reset complete");
        Ok(())
    }

    /// Spawns the periodic aggregation/migration task.
    pub fn spawn_aggregator(self: &Arc<Self>) -> JoinHandle<()> {
        let ctrl = self.clone();
        let window = Duration::from_millis(ctrl.config.hk_window_ms);
        tokio::spawn(async move {
            pf_debug!("hot-key aggregator spawned");
            let mut ticker = time::interval(window);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                if let Err(e) = ctrl.issue_migrations().await {
                    pf_error!("error issuing migrations: {}", e);
                }
            }
        })
    }

    /// Closes one aggregation window: picks the top hot keys within budget
    /// and instructs each one's owning server to replicate it in-rack.
    pub async fn issue_migrations(&self) -> Result<(), PegasusError> {
        let mut window: Vec<(KeyHash, AggEntry)> = self
            .agg
            .iter()
            .map(|e| (*e.key(), *e.value()))
            .collect();
        self.agg.clear();
        if window.is_empty() {
            return Ok(());
        }
        window.sort_by(|a, b| b.1.load.cmp(&a.1.load));

        let num_nodes = self.topology.num_nodes_per_rack();
        for (keyhash, entry) in window.into_iter().take(self.config.num_rkeys)
        {
            if self.replicated.contains_key(&keyhash) {
                continue;
            }
            // the owner resolves the key bytes from its reverse table
            let frame = self.ctrl_codec.encode(
                &ControllerMessage::KeyMigration {
                    keyhash,
                    key: Bytes::new(),
                },
            )?;
            let owner = (keyhash as usize % num_nodes) as NodeId;
            pf_info!(
                "migrating keyhash {} via owner ({}, {})",
                keyhash,
                entry.rack_id,
                owner
            );
            self.transport
                .send_to_node(frame, entry.rack_id, owner)
                .await?;
            self.replicated.insert(keyhash, ());
        }
        Ok(())
    }

    fn handle_hk_report(
        &self,
        reports: Vec<HotKeyEntry>,
        src: SocketAddr,
    ) -> Result<(), PegasusError> {
        let Some((rack_id, _)) = self.topology.locate(src) else {
            return logged_err!("hk report from unknown server {}", src);
        };
        for report in reports {
            self.agg
                .entry(report.keyhash)
                .and_modify(|e| {
                    e.load += report.load as u64;
                    e.rack_id = rack_id;
                })
                .or_insert(AggEntry {
                    load: report.load as u64,
                    rack_id,
                });
        }
        Ok(())
    }

    fn handle_ctrl_message(
        &self,
        msg: ControllerMessage,
        src: SocketAddr,
    ) -> Result<(), PegasusError> {
        match msg {
            ControllerMessage::HotKeyReport { reports } => {
                self.handle_hk_report(reports, src)
            }
            ControllerMessage::ResetReply { .. } => {
                self.reset_acks.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            _ => logged_err!("unexpected controller message type"),
        }
    }
}

#[async_trait]
impl DatagramApp for Controller {
    async fn receive(&self, frame: Bytes, src: SocketAddr, _tid: WorkerId) {
        match self.ctrl_codec.decode(&frame) {
            Ok(msg) => {
                if let Err(e) = self.handle_ctrl_message(msg, src) {
                    pf_error!("error handling ctrl message: {}", e);
                }
            }
            Err(e) => {
                pf_error!("unexpected message from {}: {}", src, e);
            }
        }
    }
}
