//! Wire codecs: bit-exact framing for the Pegasus/Static, Netcache, and
//! Controller formats, plus the shared message model.

mod buffer;
mod controller;
mod message;
mod netcache;
mod pegasus;

use bytes::Bytes;

use crate::utils::PegasusError;

pub use controller::{
    ControllerCodec, ControllerMessage, CtrlAck, HotKeyEntry, CONTROLLER,
};
pub use message::{
    ClientId, KvMessage, KvReply, KvRequest, LoadVal, MigrationAck,
    MigrationRequest, NodeId, Operation, OpResult, OpType, RackId, ReqId, Ver,
};
pub use netcache::{NetcacheCodec, KEY_SIZE, NETCACHE, VALUE_SIZE};
pub use pegasus::{PegasusCodec, PACKET_BASE_SIZE, PEGASUS, STATIC};

/// KV codec selected by configuration at construction.
#[derive(Debug, Clone, Copy)]
pub enum KvCodec {
    Pegasus(PegasusCodec),
    Netcache(NetcacheCodec),
}

impl KvCodec {
    /// Constructs the codec named in configuration: "pegasus" (switch-enabled
    /// framing), "static" (bypass framing), or "netcache".
    pub fn from_name(name: &str) -> Result<Self, PegasusError> {
        match name {
            "pegasus" => Ok(KvCodec::Pegasus(PegasusCodec::new(true))),
            "static" => Ok(KvCodec::Pegasus(PegasusCodec::new(false))),
            "netcache" => Ok(KvCodec::Netcache(NetcacheCodec::new())),
            _ => Err(PegasusError(format!("unrecognized codec '{}'", name))),
        }
    }

    pub fn decode(&self, buf: &[u8]) -> Result<KvMessage, PegasusError> {
        match self {
            KvCodec::Pegasus(c) => c.decode(buf),
            KvCodec::Netcache(c) => c.decode(buf),
        }
    }

    pub fn encode(&self, msg: &KvMessage) -> Result<Bytes, PegasusError> {
        match self {
            KvCodec::Pegasus(c) => c.encode(msg),
            KvCodec::Netcache(c) => c.encode(msg),
        }
    }
}

#[cfg(test)]
mod codec_select_tests {
    use super::*;

    #[test]
    fn codec_names() {
        assert!(matches!(
            KvCodec::from_name("pegasus"),
            Ok(KvCodec::Pegasus(_))
        ));
        assert!(matches!(
            KvCodec::from_name("static"),
            Ok(KvCodec::Pegasus(_))
        ));
        assert!(matches!(
            KvCodec::from_name("netcache"),
            Ok(KvCodec::Netcache(_))
        ));
        assert!(KvCodec::from_name("protobuf").is_err());
    }
}
