//! Bounds-checked frame reader/writer over raw datagram buffers.
//!
//! Every field extraction validates remaining length, so a truncated or
//! malicious frame surfaces as a decode error instead of a slice panic.
//! Extracted keys/values are materialized as owned `Bytes`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::utils::PegasusError;

/// Sequential reader over a received frame.
pub(crate) struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        FrameReader { buf, pos: 0 }
    }

    /// Number of unread bytes left in the frame.
    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PegasusError> {
        if self.remaining() < n {
            return Err(PegasusError(format!(
                "frame truncated: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, PegasusError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn read_u16_be(&mut self) -> Result<u16, PegasusError> {
        let s = self.take(2)?;
        Ok(u16::from_be_bytes([s[0], s[1]]))
    }

    pub(crate) fn read_u16_le(&mut self) -> Result<u16, PegasusError> {
        let s = self.take(2)?;
        Ok(u16::from_le_bytes([s[0], s[1]]))
    }

    pub(crate) fn read_u32_be(&mut self) -> Result<u32, PegasusError> {
        let s = self.take(4)?;
        Ok(u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
    }

    pub(crate) fn read_u32_le(&mut self) -> Result<u32, PegasusError> {
        let s = self.take(4)?;
        Ok(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
    }

    /// Reads `n` bytes as an owned copy.
    pub(crate) fn read_bytes(&mut self, n: usize) -> Result<Bytes, PegasusError> {
        Ok(Bytes::copy_from_slice(self.take(n)?))
    }

    /// Skips `n` bytes of fabric-managed fields.
    pub(crate) fn skip(&mut self, n: usize) -> Result<(), PegasusError> {
        self.take(n).map(|_| ())
    }
}

/// Sequential writer building an outgoing frame.
pub(crate) struct FrameWriter {
    buf: BytesMut,
}

impl FrameWriter {
    pub(crate) fn with_capacity(cap: usize) -> Self {
        FrameWriter {
            buf: BytesMut::with_capacity(cap),
        }
    }

    pub(crate) fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub(crate) fn put_u16_be(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub(crate) fn put_u16_le(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    pub(crate) fn put_u32_be(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub(crate) fn put_u32_le(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    pub(crate) fn put_bytes(&mut self, v: &[u8]) {
        self.buf.put_slice(v);
    }

    /// Appends `v` into a fixed-size field, zero-padded to `size`. Errors if
    /// `v` does not fit.
    pub(crate) fn put_padded(
        &mut self,
        v: &[u8],
        size: usize,
    ) -> Result<(), PegasusError> {
        if v.len() > size {
            return Err(PegasusError(format!(
                "field of {} bytes exceeds fixed size {}",
                v.len(),
                size
            )));
        }
        self.buf.put_slice(v);
        self.buf.put_bytes(0, size - v.len());
        Ok(())
    }

    pub(crate) fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}
