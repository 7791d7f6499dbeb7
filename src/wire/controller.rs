//! Controller wire codec.
//!
//! ```text
//! identifier (16) + type (8) + message
//! ```
//!
//! One opcode vocabulary serves both the codec-based controller protocol and
//! the router fast path: the router parses `RESET_REQ` for its `num_nodes`
//! field and never sends a reply.

use bytes::Bytes;

use crate::utils::{KeyHash, PegasusError};
use crate::wire::buffer::{FrameReader, FrameWriter};
use crate::wire::message::LoadVal;

/// Controller frame identifier.
pub const CONTROLLER: u16 = 0xDEAC;

const TYPE_RESET_REQ: u8 = 0;
const TYPE_RESET_REPLY: u8 = 1;
const TYPE_HK_REPORT: u8 = 2;
const TYPE_KEY_MGR: u8 = 3;

const ACK_OK: u8 = 0;
const ACK_FAILED: u8 = 1;

const PACKET_BASE_SIZE: usize = 2 + 1;
const RESET_REQ_SIZE: usize = PACKET_BASE_SIZE + 2 + 2;
const RESET_REPLY_SIZE: usize = PACKET_BASE_SIZE + 1;
const HK_REPORT_BASE_SIZE: usize = PACKET_BASE_SIZE + 2;
const HK_ENTRY_SIZE: usize = 4 + 2;
const KEY_MGR_BASE_SIZE: usize = PACKET_BASE_SIZE + 4 + 2;

/// Reset handshake ack code.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CtrlAck {
    Ok,
    Failed,
}

/// One hot-key entry in a report.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct HotKeyEntry {
    pub keyhash: KeyHash,
    pub load: LoadVal,
}

/// Any message on the controller wire.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ControllerMessage {
    /// Reset all servers / the router to a cluster of `num_nodes` nodes per
    /// rack with a replicated-key budget of `num_rkeys`.
    ResetRequest { num_nodes: u16, num_rkeys: u16 },

    /// Server acknowledgment of a reset.
    ResetReply { ack: CtrlAck },

    /// Periodic hot-key report from one server.
    HotKeyReport { reports: Vec<HotKeyEntry> },

    /// Instruct the owning server to replicate a key within its rack. The
    /// key may be empty, in which case the owner resolves it from its
    /// reverse keyhash table.
    KeyMigration { keyhash: KeyHash, key: Bytes },
}

/// The controller codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerCodec;

impl ControllerCodec {
    pub fn new() -> Self {
        ControllerCodec
    }

    /// Decodes one frame.
    pub fn decode(
        &self,
        buf: &[u8],
    ) -> Result<ControllerMessage, PegasusError> {
        let mut r = FrameReader::new(buf);

        let identifier = r.read_u16_be()?;
        if identifier != CONTROLLER {
            return Err(PegasusError(format!(
                "identifier 0x{:04x} does not match controller",
                identifier
            )));
        }

        match r.read_u8()? {
            TYPE_RESET_REQ => {
                let num_nodes = r.read_u16_be()?;
                let num_rkeys = r.read_u16_be()?;
                Ok(ControllerMessage::ResetRequest {
                    num_nodes,
                    num_rkeys,
                })
            }

            TYPE_RESET_REPLY => {
                let ack = match r.read_u8()? {
                    ACK_OK => CtrlAck::Ok,
                    ACK_FAILED => CtrlAck::Failed,
                    other => {
                        return Err(PegasusError(format!(
                            "unknown ack code {}",
                            other
                        )));
                    }
                };
                Ok(ControllerMessage::ResetReply { ack })
            }

            TYPE_HK_REPORT => {
                let nkeys = r.read_u16_be()? as usize;
                let mut reports = Vec::with_capacity(nkeys.min(
                    r.remaining() / HK_ENTRY_SIZE + 1,
                ));
                for _ in 0..nkeys {
                    let keyhash = r.read_u32_be()?;
                    let load = r.read_u16_be()?;
                    reports.push(HotKeyEntry { keyhash, load });
                }
                Ok(ControllerMessage::HotKeyReport { reports })
            }

            TYPE_KEY_MGR => {
                let keyhash = r.read_u32_be()?;
                let key_len = r.read_u16_le()? as usize;
                let key = r.read_bytes(key_len)?;
                Ok(ControllerMessage::KeyMigration { keyhash, key })
            }

            other => {
                Err(PegasusError(format!("unknown message type {}", other)))
            }
        }
    }

    /// Encodes one frame.
    pub fn encode(
        &self,
        msg: &ControllerMessage,
    ) -> Result<Bytes, PegasusError> {
        match msg {
            ControllerMessage::ResetRequest {
                num_nodes,
                num_rkeys,
            } => {
                let mut w = FrameWriter::with_capacity(RESET_REQ_SIZE);
                w.put_u16_be(CONTROLLER);
                w.put_u8(TYPE_RESET_REQ);
                w.put_u16_be(*num_nodes);
                w.put_u16_be(*num_rkeys);
                Ok(w.freeze())
            }

            ControllerMessage::ResetReply { ack } => {
                let mut w = FrameWriter::with_capacity(RESET_REPLY_SIZE);
                w.put_u16_be(CONTROLLER);
                w.put_u8(TYPE_RESET_REPLY);
                w.put_u8(match ack {
                    CtrlAck::Ok => ACK_OK,
                    CtrlAck::Failed => ACK_FAILED,
                });
                Ok(w.freeze())
            }

            ControllerMessage::HotKeyReport { reports } => {
                if reports.len() > u16::MAX as usize {
                    return Err(PegasusError(format!(
                        "hot-key report of {} entries too large",
                        reports.len()
                    )));
                }
                let mut w = FrameWriter::with_capacity(
                    HK_REPORT_BASE_SIZE + reports.len() * HK_ENTRY_SIZE,
                );
                w.put_u16_be(CONTROLLER);
                w.put_u8(TYPE_HK_REPORT);
                w.put_u16_be(reports.len() as u16);
                for entry in reports {
                    w.put_u32_be(entry.keyhash);
                    w.put_u16_be(entry.load);
                }
                Ok(w.freeze())
            }

            ControllerMessage::KeyMigration { keyhash, key } => {
                let mut w =
                    FrameWriter::with_capacity(KEY_MGR_BASE_SIZE + key.len());
                w.put_u16_be(CONTROLLER);
                w.put_u8(TYPE_KEY_MGR);
                w.put_u32_be(*keyhash);
                w.put_u16_le(key.len() as u16);
                w.put_bytes(key);
                Ok(w.freeze())
            }
        }
    }
}

#[cfg(test)]
mod controller_tests {
    use super::*;

    #[test]
    fn reset_roundtrips() -> Result<(), PegasusError> {
        let codec = ControllerCodec::new();
        let req = ControllerMessage::ResetRequest {
            num_nodes: 4,
            num_rkeys: 16,
        };
        assert_eq!(codec.decode(&codec.encode(&req)?)?, req);

        for ack in [CtrlAck::Ok, CtrlAck::Failed] {
            let reply = ControllerMessage::ResetReply { ack };
            assert_eq!(codec.decode(&codec.encode(&reply)?)?, reply);
        }
        Ok(())
    }

    #[test]
    fn hk_report_roundtrip() -> Result<(), PegasusError> {
        let codec = ControllerCodec::new();
        let msg = ControllerMessage::HotKeyReport {
            reports: vec![
                HotKeyEntry {
                    keyhash: 0x0102_0304,
                    load: 99,
                },
                HotKeyEntry {
                    keyhash: 7,
                    load: 32,
                },
            ],
        };
        let frame = codec.encode(&msg)?;
        // nkeys and per-entry fields are big-endian
        assert_eq!(&frame[3..5], &2u16.to_be_bytes());
        assert_eq!(&frame[5..9], &0x0102_0304u32.to_be_bytes());
        assert_eq!(&frame[9..11], &99u16.to_be_bytes());
        assert_eq!(codec.decode(&frame)?, msg);
        Ok(())
    }

    #[test]
    fn key_migration_roundtrip() -> Result<(), PegasusError> {
        let codec = ControllerCodec::new();
        let msg = ControllerMessage::KeyMigration {
            keyhash: 0x7fff_ffff,
            key: Bytes::from_static(b"hotkey"),
        };
        assert_eq!(codec.decode(&codec.encode(&msg)?)?, msg);

        // empty key is legal: the owner resolves it locally
        let unnamed = ControllerMessage::KeyMigration {
            keyhash: 42,
            key: Bytes::new(),
        };
        assert_eq!(codec.decode(&codec.encode(&unnamed)?)?, unnamed);
        Ok(())
    }

    #[test]
    fn truncated_frames_error() -> Result<(), PegasusError> {
        let codec = ControllerCodec::new();
        let msg = ControllerMessage::HotKeyReport {
            reports: vec![HotKeyEntry {
                keyhash: 1,
                load: 2,
            }],
        };
        let frame = codec.encode(&msg)?;
        for len in 0..frame.len() {
            assert!(codec.decode(&frame[..len]).is_err());
        }
        Ok(())
    }

    #[test]
    fn foreign_identifier_rejected() {
        let codec = ControllerCodec::new();
        // a pegasus KV frame must not decode as a controller message
        assert!(codec.decode(&[0x47, 0x50, 0, 0, 0, 0, 0]).is_err());
    }
}
