//! Argument encodings for update records.
//!
//! All integers are big-endian. Sequence arguments carry a 2-byte unsigned
//! element count, so they hold at most 65535 elements.

use crate::error::{CacheError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Largest element count a length-prefixed argument can carry.
pub const MAX_SEQUENCE_LEN: usize = u16::MAX as usize;

/// Cursor over a serialized update stream.
///
/// Every read failure is reported as [`CacheError::CorruptLog`] carrying the
/// offset at which the read started.
pub struct ArgReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ArgReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Byte offset of the next read.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Take the next `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(CacheError::corrupt(
                self.pos,
                format!("truncated: need {} bytes, {} remaining", n, self.remaining()),
            ));
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    /// Build a corruption error at the current offset.
    pub fn corrupt(&self, reason: impl Into<String>) -> CacheError {
        CacheError::corrupt(self.pos, reason)
    }
}

/// A value that can be carried as an update argument.
pub trait UpdateArg: Sized {
    /// Number of bytes [`encode`](UpdateArg::encode) will write. May overestimate.
    fn encoded_len(&self) -> usize;

    fn encode(&self, out: &mut Vec<u8>) -> Result<()>;

    fn decode(reader: &mut ArgReader<'_>) -> Result<Self>;
}

fn write_count(len: usize, out: &mut Vec<u8>) -> Result<()> {
    if len > MAX_SEQUENCE_LEN {
        return Err(CacheError::ArgumentTooLarge {
            len,
            max: MAX_SEQUENCE_LEN,
        });
    }
    out.extend_from_slice(&(len as u16).to_be_bytes());
    Ok(())
}

impl UpdateArg for () {
    fn encoded_len(&self) -> usize {
        0
    }

    fn encode(&self, _out: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }

    fn decode(_reader: &mut ArgReader<'_>) -> Result<Self> {
        Ok(())
    }
}

impl UpdateArg for i32 {
    fn encoded_len(&self) -> usize {
        4
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&self.to_be_bytes());
        Ok(())
    }

    fn decode(reader: &mut ArgReader<'_>) -> Result<Self> {
        reader.read_i32()
    }
}

impl UpdateArg for i64 {
    fn encoded_len(&self) -> usize {
        8
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&self.to_be_bytes());
        Ok(())
    }

    fn decode(reader: &mut ArgReader<'_>) -> Result<Self> {
        reader.read_i64()
    }
}

impl UpdateArg for Vec<u8> {
    fn encoded_len(&self) -> usize {
        2 + self.len()
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        write_count(self.len(), out)?;
        out.extend_from_slice(self);
        Ok(())
    }

    fn decode(reader: &mut ArgReader<'_>) -> Result<Self> {
        let len = reader.read_u16()? as usize;
        Ok(reader.take(len)?.to_vec())
    }
}

impl UpdateArg for Vec<i32> {
    fn encoded_len(&self) -> usize {
        2 + self.len() * 4
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        write_count(self.len(), out)?;
        for value in self {
            out.extend_from_slice(&value.to_be_bytes());
        }
        Ok(())
    }

    fn decode(reader: &mut ArgReader<'_>) -> Result<Self> {
        let len = reader.read_u16()? as usize;
        (0..len).map(|_| reader.read_i32()).collect()
    }
}

impl UpdateArg for Vec<i64> {
    fn encoded_len(&self) -> usize {
        2 + self.len() * 8
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        write_count(self.len(), out)?;
        for value in self {
            out.extend_from_slice(&value.to_be_bytes());
        }
        Ok(())
    }

    fn decode(reader: &mut ArgReader<'_>) -> Result<Self> {
        let len = reader.read_u16()? as usize;
        (0..len).map(|_| reader.read_i64()).collect()
    }
}

/// Argument carried as MessagePack behind a 4-byte length prefix.
///
/// The slow path, for update kinds whose argument has no fixed layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Serialized<T>(pub T);

impl<T: Serialize + DeserializeOwned> UpdateArg for Serialized<T> {
    fn encoded_len(&self) -> usize {
        // Sizing requires an encode pass; fall back to the header on failure
        // and let `encode` surface the error.
        4 + rmp_serde::to_vec(&self.0).map(|v| v.len()).unwrap_or(0)
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        let bytes = rmp_serde::to_vec(&self.0)?;
        let len = u32::try_from(bytes.len()).map_err(|_| CacheError::ArgumentTooLarge {
            len: bytes.len(),
            max: u32::MAX as usize,
        })?;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&bytes);
        Ok(())
    }

    fn decode(reader: &mut ArgReader<'_>) -> Result<Self> {
        let start = reader.position();
        let len = reader.read_u32()? as usize;
        let bytes = reader.take(len)?;
        rmp_serde::from_slice(bytes)
            .map(Serialized)
            .map_err(|e| CacheError::corrupt(start, format!("undecodable argument: {}", e)))
    }
}
