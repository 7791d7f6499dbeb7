//! Public interface to the Pegasus-KV core library, linked by the server,
//! router, controller, and client executables.

#![allow(clippy::uninlined_format_args)]

#[macro_use]
mod utils;

mod client;
mod cluster;
mod controller;
mod router;
mod server;
mod transport;
mod wire;

pub use client::{ClientConfig, KvClient};
pub use cluster::{NodeAddress, RackTopology, MAX_NUM_NODES};
pub use controller::{Controller, ControllerConfig};
pub use router::{
    EndhostLb, LoadBalancer, PacketRouter, RouterAction, RouterConfig,
    PORT_ZERO,
};
pub use server::{KvServer, ServerConfig, Store, ValueRecord};
pub use transport::{
    DatagramApp, Transport, UdpTransport, WorkerId, MAX_FRAME_SIZE,
};
pub use utils::{
    compute_keyhash, djb2_hash, logger_init, me_prefix, KeyHash,
    PegasusError, KEYHASH_MASK, ME,
};
pub use wire::{
    ClientId, ControllerCodec, ControllerMessage, CtrlAck, HotKeyEntry,
    KvCodec, KvMessage, KvReply, KvRequest, LoadVal, MigrationAck,
    MigrationRequest, NetcacheCodec, NodeId, Operation, OpResult, OpType,
    PegasusCodec, RackId, ReqId, Ver, CONTROLLER, KEY_SIZE, NETCACHE,
    PACKET_BASE_SIZE, PEGASUS, STATIC, VALUE_SIZE,
};
