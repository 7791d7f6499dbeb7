//! Pegasus/Static wire codec.
//!
//! Carries the 20-byte common header consumed by the in-network router:
//!
//! ```text
//! identifier (16) + op_type (8) + key_hash (32) + node_a (8) + node_b (8) +
//! load_a (16) + ver (32) + bitmap (32) + hdr_req_id (8) + message payload
//! ```
//!
//! `key_hash`, `load_a`, and `ver` are big-endian; payload integers are
//! little-endian, matching what deployed peers parse. `node_b`, `bitmap`,
//! and `hdr_req_id` are fabric-managed: written as zero and ignored on
//! decode.

use bytes::Bytes;

use crate::utils::{compute_keyhash, PegasusError};
use crate::wire::buffer::{FrameReader, FrameWriter};
use crate::wire::message::{
    KvMessage, KvReply, KvRequest, MigrationAck, MigrationRequest, Operation,
    OpResult, OpType,
};

/// Identifier for switch-enabled mode.
pub const PEGASUS: u16 = 0x4750;
/// Identifier for switch-bypass (static) mode.
pub const STATIC: u16 = 0x1573;

pub(crate) const OP_GET: u8 = 0x0;
pub(crate) const OP_PUT: u8 = 0x1;
pub(crate) const OP_DEL: u8 = 0x2;
pub(crate) const OP_REP_R: u8 = 0x3;
pub(crate) const OP_REP_W: u8 = 0x4;
pub(crate) const OP_MGR_REQ: u8 = 0x5;
pub(crate) const OP_MGR_ACK: u8 = 0x6;
pub(crate) const OP_PUT_FWD: u8 = 0x7;

/// Common header size.
pub const PACKET_BASE_SIZE: usize = 2 + 1 + 4 + 1 + 1 + 2 + 4 + 4 + 1;
const REQUEST_BASE_SIZE: usize = PACKET_BASE_SIZE + 4 + 4 + 4 + 1 + 2;
const REPLY_BASE_SIZE: usize = PACKET_BASE_SIZE + 4 + 4 + 4 + 1 + 1 + 2;
const MGR_REQ_BASE_SIZE: usize = PACKET_BASE_SIZE + 2 + 2;

/// The Pegasus/Static codec. Construct with `switch_enabled = true` to frame
/// with the `PEGASUS` identifier (packets steered by the fabric), `false` for
/// the `STATIC` bypass identifier.
#[derive(Debug, Clone, Copy)]
pub struct PegasusCodec {
    switch_enabled: bool,
}

impl PegasusCodec {
    pub fn new(switch_enabled: bool) -> Self {
        PegasusCodec { switch_enabled }
    }

    fn identifier(&self) -> u16 {
        if self.switch_enabled {
            PEGASUS
        } else {
            STATIC
        }
    }

    /// Decodes one frame. Fails on identifier mismatch, unknown op, or any
    /// out-of-bounds field.
    pub fn decode(&self, buf: &[u8]) -> Result<KvMessage, PegasusError> {
        let mut r = FrameReader::new(buf);

        let identifier = r.read_u16_be()?;
        if identifier != self.identifier() {
            return Err(PegasusError(format!(
                "identifier 0x{:04x} does not match codec 0x{:04x}",
                identifier,
                self.identifier()
            )));
        }
        let wire_op = r.read_u8()?;
        let keyhash = r.read_u32_be()?;
        let node_a = r.read_u8()?;
        r.skip(1)?; // node_b
        let load_a = r.read_u16_be()?;
        let ver = r.read_u32_be()?;
        r.skip(4 + 1)?; // bitmap + hdr_req_id

        match wire_op {
            OP_GET | OP_PUT | OP_DEL | OP_PUT_FWD => {
                let client_id = r.read_u32_le()?;
                let req_id = r.read_u32_le()?;
                let req_time = r.read_u32_le()?;
                r.skip(1)?; // payload op_type echo; the header's governs
                let op_type = match wire_op {
                    OP_GET => OpType::Get,
                    OP_PUT => OpType::Put,
                    OP_DEL => OpType::Del,
                    _ => OpType::PutFwd,
                };
                let key_len = r.read_u16_le()? as usize;
                let key = r.read_bytes(key_len)?;
                let value = if op_type.has_value() {
                    let value_len = r.read_u16_le()? as usize;
                    r.read_bytes(value_len)?
                } else {
                    Bytes::new()
                };
                Ok(KvMessage::Request(KvRequest {
                    client_id,
                    req_id,
                    req_time,
                    node_id: node_a,
                    op: Operation {
                        op_type,
                        keyhash,
                        ver,
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
                    PegasusError(format!("unknown reply op octet {}", op_octet))
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
                    node_id: node_a,
                    op_type,
                    keyhash,
                    ver,
                    load: load_a,
                    key: Bytes::new(), // not transmitted by this codec
                    value,
                    result,
                }))
            }

            OP_MGR_REQ => {
                let key_len = r.read_u16_le()? as usize;
                let key = r.read_bytes(key_len)?;
                let value_len = r.read_u16_le()? as usize;
                let value = r.read_bytes(value_len)?;
                Ok(KvMessage::MigrationRequest(MigrationRequest {
                    keyhash,
                    ver,
                    key,
                    value,
                }))
            }

            OP_MGR_ACK => Ok(KvMessage::MigrationAck(MigrationAck {
                keyhash,
                ver,
                node_id: node_a,
            })),

            _ => Err(PegasusError(format!("unknown op type {}", wire_op))),
        }
    }

    /// Encodes one frame. The request key hash is computed here and masked to
    /// 31 bits; the decoder end trusts it.
    pub fn encode(&self, msg: &KvMessage) -> Result<Bytes, PegasusError> {
        match msg {
            KvMessage::Request(req) => {
                let mut w = FrameWriter::with_capacity(
                    REQUEST_BASE_SIZE + req.op.key.len() + 2 + req.op.value.len(),
                );
                let wire_op = match req.op.op_type {
                    OpType::Get => OP_GET,
                    OpType::Put => OP_PUT,
                    OpType::Del => OP_DEL,
                    OpType::PutFwd => OP_PUT_FWD,
                };
                self.put_header(
                    &mut w,
                    wire_op,
                    compute_keyhash(&req.op.key),
                    req.node_id,
                    0,
                    req.op.ver,
                );
                w.put_u32_le(req.client_id);
                w.put_u32_le(req.req_id);
                w.put_u32_le(req.req_time);
                w.put_u8(req.op.op_type.to_octet());
                w.put_u16_le(req.op.key.len() as u16);
                w.put_bytes(&req.op.key);
                if req.op.op_type.has_value() {
                    w.put_u16_le(req.op.value.len() as u16);
                    w.put_bytes(&req.op.value);
                }
                Ok(w.freeze())
            }

            KvMessage::Reply(reply) => {
                let mut w = FrameWriter::with_capacity(
                    REPLY_BASE_SIZE + reply.value.len(),
                );
                let wire_op = if reply.op_type == OpType::Get {
                    OP_REP_R
                } else {
                    OP_REP_W
                };
                self.put_header(
                    &mut w,
                    wire_op,
                    reply.keyhash,
                    reply.node_id,
                    reply.load,
                    reply.ver,
                );
                w.put_u32_le(reply.client_id);
                w.put_u32_le(reply.req_id);
                w.put_u32_le(reply.req_time);
                w.put_u8(reply.op_type.to_octet());
                w.put_u8(reply.result.to_octet());
                w.put_u16_le(reply.value.len() as u16);
                w.put_bytes(&reply.value);
                Ok(w.freeze())
            }

            KvMessage::MigrationRequest(mgr) => {
                let mut w = FrameWriter::with_capacity(
                    MGR_REQ_BASE_SIZE + mgr.key.len() + mgr.value.len(),
                );
                self.put_header(&mut w, OP_MGR_REQ, mgr.keyhash, 0, 0, mgr.ver);
                w.put_u16_le(mgr.key.len() as u16);
                w.put_bytes(&mgr.key);
                w.put_u16_le(mgr.value.len() as u16);
                w.put_bytes(&mgr.value);
                Ok(w.freeze())
            }

            KvMessage::MigrationAck(ack) => {
                let mut w = FrameWriter::with_capacity(PACKET_BASE_SIZE);
                self.put_header(
                    &mut w,
                    OP_MGR_ACK,
                    ack.keyhash,
                    ack.node_id,
                    0,
                    ack.ver,
                );
                Ok(w.freeze())
            }
        }
    }

    fn put_header(
        &self,
        w: &mut FrameWriter,
        wire_op: u8,
        keyhash: u32,
        node_a: u8,
        load_a: u16,
        ver: u32,
    ) {
        w.put_u16_be(self.identifier());
        w.put_u8(wire_op);
        w.put_u32_be(keyhash);
        w.put_u8(node_a);
        w.put_u8(0); // node_b
        w.put_u16_be(load_a);
        w.put_u32_be(ver);
        w.put_u32_be(0); // bitmap
        w.put_u8(0); // hdr_req_id
    }
}
