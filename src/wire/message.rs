//! KV message model shared by all codecs and both ends of the wire.

use bytes::Bytes;

use crate::utils::KeyHash;

/// Client ID type (indexes the topology's client list).
pub type ClientId = u32;

/// Client request ID type.
pub type ReqId = u32;

/// Version tag type; the sole per-key conflict resolver.
pub type Ver = u32;

/// Outstanding-load type as carried in reply headers.
pub type LoadVal = u16;

/// Node ID within a rack.
pub type NodeId = u8;

/// Rack ID within the cluster.
pub type RackId = u8;

/// KV operation type.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum OpType {
    #[default]
    Get,
    Put,
    Del,
    /// Internal: a PUT being propagated along the replication chain.
    PutFwd,
}

impl OpType {
    /// Payload octet encoding (shared by the Pegasus and Netcache payloads).
    pub(crate) fn to_octet(self) -> u8 {
        match self {
            OpType::Get => 0,
            OpType::Put => 1,
            OpType::Del => 2,
            OpType::PutFwd => 7,
        }
    }

    pub(crate) fn from_octet(v: u8) -> Option<Self> {
        match v {
            0 => Some(OpType::Get),
            1 => Some(OpType::Put),
            2 => Some(OpType::Del),
            7 => Some(OpType::PutFwd),
            _ => None,
        }
    }

    /// Does a request of this type carry a value field?
    pub(crate) fn has_value(self) -> bool {
        matches!(self, OpType::Put | OpType::PutFwd)
    }
}

/// Result code in replies.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum OpResult {
    #[default]
    Ok,
    NotFound,
}

impl OpResult {
    pub(crate) fn to_octet(self) -> u8 {
        match self {
            OpResult::Ok => 0,
            OpResult::NotFound => 1,
        }
    }

    pub(crate) fn from_octet(v: u8) -> Option<Self> {
        match v {
            0 => Some(OpResult::Ok),
            1 => Some(OpResult::NotFound),
            _ => None,
        }
    }
}

/// A single KV operation as carried inside a request.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct Operation {
    pub op_type: OpType,
    pub keyhash: KeyHash,
    pub ver: Ver,
    pub key: Bytes,
    pub value: Bytes,
}

/// Client (or chain-forwarded) request.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct KvRequest {
    pub client_id: ClientId,
    pub req_id: ReqId,
    pub req_time: u32,
    /// Hash-selected destination node within the rack.
    pub node_id: NodeId,
    pub op: Operation,
}

/// Reply back to the client.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct KvReply {
    pub client_id: ClientId,
    pub req_id: ReqId,
    pub req_time: u32,
    /// Responding server's node ID within its rack.
    pub node_id: NodeId,
    pub op_type: OpType,
    pub keyhash: KeyHash,
    pub ver: Ver,
    /// Epoch-window load of the responding server (0 if not reported).
    pub load: LoadVal,
    pub key: Bytes,
    pub value: Bytes,
    pub result: OpResult,
}

/// Hot-key value propagation from the owning server to its rack peers.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct MigrationRequest {
    pub keyhash: KeyHash,
    pub ver: Ver,
    pub key: Bytes,
    pub value: Bytes,
}

/// Acknowledgment of an accepted migration, sent to the load balancer.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct MigrationAck {
    pub keyhash: KeyHash,
    pub ver: Ver,
    pub node_id: NodeId,
}

/// Any message on the KV wire.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum KvMessage {
    Request(KvRequest),
    Reply(KvReply),
    MigrationRequest(MigrationRequest),
    MigrationAck(MigrationAck),
}
