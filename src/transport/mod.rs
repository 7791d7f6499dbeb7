//! Datagram transport: the send/receive contract between applications and
//! the network, and its UDP implementation.
//!
//! Frames are complete datagrams. Sends are best-effort: a failed send is
//! logged and not retried (clients retry at their discretion).

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use bytes::Bytes;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::cluster::RackTopology;
use crate::utils::PegasusError;
use crate::wire::{NodeId, RackId};

/// Transport worker thread ID type.
pub type WorkerId = usize;

/// Largest datagram payload a worker will accept.
pub const MAX_FRAME_SIZE: usize = 65535;

/// Addressed send operations offered to applications.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends a frame to an explicit socket address.
    async fn send_to(
        &self,
        frame: Bytes,
        addr: SocketAddr,
    ) -> Result<(), PegasusError>;

    /// Sends a frame to server `(rack_id, node_id)`.
    async fn send_to_node(
        &self,
        frame: Bytes,
        rack_id: RackId,
        node_id: NodeId,
    ) -> Result<(), PegasusError>;

    /// Sends a frame to the endhost load balancer.
    async fn send_to_lb(&self, frame: Bytes) -> Result<(), PegasusError>;

    /// Sends a frame to the controller of the given rack.
    async fn send_to_controller(
        &self,
        frame: Bytes,
        rack_id: RackId,
    ) -> Result<(), PegasusError>;

    /// Sends a frame to a node in the caller's own rack.
    async fn send_to_local_node(
        &self,
        frame: Bytes,
        node_id: NodeId,
    ) -> Result<(), PegasusError>;
}

/// Upcall interface implemented by applications fed by transport workers.
#[async_trait]
pub trait DatagramApp: Send + Sync + 'static {
    /// Handles one received frame. Called on one of the transport's worker
    /// tasks; implementations use concurrent state internally.
    async fn receive(&self, frame: Bytes, src: SocketAddr, tid: WorkerId);
}

/// UDP datagram transport bound to one endpoint address.
pub struct UdpTransport {
    /// Cluster topology for addressed sends.
    topology: Arc<RackTopology>,

    /// Rack this endpoint lives in (used for local-node sends). Endpoints
    /// outside any rack (LB, clients) pass their own rack as 0.
    rack_id: RackId,

    /// The shared socket; workers receive and senders send concurrently.
    socket: Arc<UdpSocket>,

    /// Number of receive worker tasks to spawn.
    n_workers: usize,
}

impl UdpTransport {
    /// Binds the socket and creates the transport.
    pub async fn new_and_setup(
        topology: Arc<RackTopology>,
        bind_addr: SocketAddr,
        rack_id: RackId,
        n_workers: usize,
    ) -> Result<Self, PegasusError> {
        if n_workers == 0 {
            return logged_err!("invalid n_workers {}", n_workers);
        }
        let socket = UdpSocket::bind(bind_addr).await?;
        pf_info!("bound UDP transport on {}", socket.local_addr()?);

        Ok(UdpTransport {
            topology,
            rack_id,
            socket: Arc::new(socket),
            n_workers,
        })
    }

    /// The locally bound address (useful when binding to port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, PegasusError> {
        Ok(self.socket.local_addr()?)
    }

    /// Spawns the receive worker tasks, each invoking the application
    /// synchronously per frame. Returns their join handles.
    pub fn run_app_threads(
        &self,
        app: Arc<dyn DatagramApp>,
    ) -> Vec<JoinHandle<()>> {
        (0..self.n_workers)
            .map(|tid| {
                let socket = self.socket.clone();
                let app = app.clone();
                tokio::spawn(Self::worker_loop(socket, app, tid))
            })
            .collect()
    }

    /// Receive worker task function.
    async fn worker_loop(
        socket: Arc<UdpSocket>,
        app: Arc<dyn DatagramApp>,
        tid: WorkerId,
    ) {
        pf_debug!("transport worker {} spawned", tid);
        let mut buf = vec![0u8; MAX_FRAME_SIZE];

        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, src)) => {
                    let frame = Bytes::copy_from_slice(&buf[..len]);
                    app.receive(frame, src, tid).await;
                }
                Err(e) => {
                    pf_error!("worker {} failed to receive: {}", tid, e);
                }
            }
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_to(
        &self,
        frame: Bytes,
        addr: SocketAddr,
    ) -> Result<(), PegasusError> {
        if let Err(e) = self.socket.send_to(&frame, addr).await {
            // UDP is best-effort: log, do not retry
            pf_warn!("failed to send {} bytes to {}: {}", frame.len(), addr, e);
        }
        Ok(())
    }

    async fn send_to_node(
        &self,
        frame: Bytes,
        rack_id: RackId,
        node_id: NodeId,
    ) -> Result<(), PegasusError> {
        let addr = self.topology.node_addr(rack_id, node_id)?.socket_addr();
        self.send_to(frame, addr).await
    }

    async fn send_to_lb(&self, frame: Bytes) -> Result<(), PegasusError> {
        let addr = self.topology.lb_addr()?.socket_addr();
        self.send_to(frame, addr).await
    }

    async fn send_to_controller(
        &self,
        frame: Bytes,
        rack_id: RackId,
    ) -> Result<(), PegasusError> {
        let addr = self.topology.controller_addr(rack_id)?.socket_addr();
        self.send_to(frame, addr).await
    }

    async fn send_to_local_node(
        &self,
        frame: Bytes,
        node_id: NodeId,
    ) -> Result<(), PegasusError> {
        self.send_to_node(frame, self.rack_id, node_id).await
    }
}
