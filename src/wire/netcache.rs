//! Netcache wire codec.
//!
//! Fixed-size key and cached-value fields live in the header so the fabric
//! can answer reads itself:
//!
//! ```text
//! identifier (16) + op_type (8) + key (48) + value (32) + message payload
//! ```
//!
//! A `CACHE_HIT` frame is synthesized by the fabric from a READ request: the
//! decoder turns it into a successful read reply carrying the header's
//! cached-value field. This wire format transmits no key hash; the decoder
//! computes it so hot-key sampling behaves identically under either codec.

use bytes::Bytes;

use crate::utils::{compute_keyhash, PegasusError};
use crate::wire::buffer::{FrameReader, FrameWriter};
use crate::wire::message::{
    KvMessage, KvReply, KvRequest, Operation, OpResult, OpType,
};

/// Netcache frame identifier.
pub const NETCACHE: u16 = 0x5039;

/// Fixed header key field size.
pub const KEY_SIZE: usize = 6;
/// Fixed header cached-value field size.
pub const VALUE_SIZE: usize = 4;

const OP_READ: u8 = 0x1;
const OP_WRITE: u8 = 0x2;
const OP_REP_R: u8 = 0x3;
const OP_REP_W: u8 = 0x4;
const OP_CACHE_HIT: u8 = 0x5;

const PACKET_BASE_SIZE: usize = 2 + 1 + KEY_SIZE + VALUE_SIZE;
const REQUEST_BASE_SIZE: usize = PACKET_BASE_SIZE + 4 + 4 + 4 + 1 + 2;
const REPLY_BASE_SIZE: usize = PACKET_BASE_SIZE + 4 + 4 + 4 + 1 + 1 + 2;

/// The Netcache codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetcacheCodec;

impl NetcacheCodec {
    pub fn new() -> Self {
        NetcacheCodec
    }

    /// Decodes one frame.
    pub fn decode(&self, buf: &[u8]) -> Result<KvMessage, PegasusError> {
        let mut r = FrameReader::new(buf);

        let identifier = r.read_u16_be()?;
        if identifier != NETCACHE {
            return Err(PegasusError(format!(
                "identifier 0x{:04x} does not match netcache",
                identifier
            )));
        }
        let wire_op = r.read_u8()?;
        r.skip(KEY_SIZE)?;
        let cached_value = r.read_bytes(VALUE_SIZE)?;

        match wire_op {
            OP_READ | OP_WRITE => {
                let client_id = r.read_u32_le()?;
                let req_id = r.read_u32_le()?;
                let req_time = r.read_u32_le()?;
                let op_octet = r.read_u8()?;
                let op_type = OpType::from_octet(op_octet).ok_or_else(|| {
                    PegasusError(format!("unknown op octet {}", op_octet))
                })?;
                let key_len = r.read_u16_le()? as usize;
                let key = r.read_bytes(key_len)?;
                let value = if op_type == OpType::Put {
                    let value_len = r.read_u16_le()? as usize;
                    r.read_bytes(value_len)?
                } else {
                    Bytes::new()
                };
                let keyhash = compute_keyhash(&key);
                Ok(KvMessage::Request(KvRequest {
                    client_id,
                    req_id,
                    req_time,
                    node_id: 0, // netcache routes by the fabric, not node id
                    op: Operation {
                        op_type,
                        keyhash,
                        ver: 0,
                        key,
                        value,
                    },
                }))
            }

            OP_REP_R | OP_REP_W => {
                let client_id = r.read_u32_le()?;
                let req_id = r.read_u32_le()?;
                let req_time = r.read_u32_le()?;
                let op_octet = r.read_u8()?;
                let op_type = OpType::from_octet(op_octet).ok_or_else(|| {
                    PegasusError(format!("unknown op octet {}", op_octet))
                })?;
                let result_octet = r.read_u8()?;
                let result =
                    OpResult::from_octet(result_octet).ok_or_else(|| {
                        PegasusError(format!(
                            "unknown result octet {}",
                            result_octet
                        ))
                    })?;
                let value_len = r.read_u16_le()? as usize;
                let value = r.read_bytes(value_len)?;
                Ok(KvMessage::Reply(KvReply {
                    client_id,
                    req_id,
                    req_time,
                    op_type,
                    value,
                    result,
                    ..Default::default()
                }))
            }

            OP_CACHE_HIT => {
                // request bounced back by the fabric with the cached value
                // filled in; synthesize the read reply the client expects
                let client_id = r.read_u32_le()?;
                let req_id = r.read_u32_le()?;
                let req_time = r.read_u32_le()?;
                Ok(KvMessage::Reply(KvReply {
                    client_id,
                    req_id,
                    req_time,
                    op_type: OpType::Get,
                    value: cached_value,
                    result: OpResult::Ok,
                    ..Default::default()
                }))
            }

            _ => Err(PegasusError(format!("unknown op type {}", wire_op))),
        }
    }

    /// Encodes one frame. Keys longer than `KEY_SIZE` and reply values longer
    /// than `VALUE_SIZE` cannot be expressed in the header and fail encoding;
    /// migration messages are not part of this wire format.
    pub fn encode(&self, msg: &KvMessage) -> Result<Bytes, PegasusError> {
        match msg {
            KvMessage::Request(req) => {
                let wire_op = match req.op.op_type {
                    OpType::Get => OP_READ,
                    OpType::Put | OpType::Del => OP_WRITE,
                    OpType::PutFwd => {
                        return Err(PegasusError(
                            "netcache cannot frame a chain forward".into(),
                        ));
                    }
                };
                let mut w = FrameWriter::with_capacity(
                    REQUEST_BASE_SIZE + req.op.key.len() + 2 + req.op.value.len(),
                );
                w.put_u16_be(NETCACHE);
                w.put_u8(wire_op);
                w.put_padded(&req.op.key, KEY_SIZE)?;
                w.put_padded(b"", VALUE_SIZE)?;
                w.put_u32_le(req.client_id);
                w.put_u32_le(req.req_id);
                w.put_u32_le(req.req_time);
                w.put_u8(req.op.op_type.to_octet());
                w.put_u16_le(req.op.key.len() as u16);
                w.put_bytes(&req.op.key);
                if req.op.op_type == OpType::Put {
                    w.put_u16_le(req.op.value.len() as u16);
                    w.put_bytes(&req.op.value);
                }
                Ok(w.freeze())
            }

            KvMessage::Reply(reply) => {
                let wire_op = if reply.op_type == OpType::Get {
                    OP_REP_R
                } else {
                    OP_REP_W
                };
                let mut w = FrameWriter::with_capacity(
                    REPLY_BASE_SIZE + reply.value.len(),
                );
                w.put_u16_be(NETCACHE);
                w.put_u8(wire_op);
                w.put_padded(&reply.key, KEY_SIZE)?;
                w.put_padded(&reply.value, VALUE_SIZE)?;
                w.put_u32_le(reply.client_id);
                w.put_u32_le(reply.req_id);
                w.put_u32_le(reply.req_time);
                w.put_u8(reply.op_type.to_octet());
                w.put_u8(reply.result.to_octet());
                w.put_u16_le(reply.value.len() as u16);
                w.put_bytes(&reply.value);
                Ok(w.freeze())
            }

            _ => Err(PegasusError(
                "message type not expressible in netcache format".into(),
            )),
        }
    }
}
