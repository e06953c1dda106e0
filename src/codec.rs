//! Deterministic little-endian binary codec.
//!
//! Every variable-size on-disk structure (TOC, WAL entries, track
//! segments) is written through [`ByteWriter`] and read back through
//! [`ByteReader`]. Layout rules:
//!
//! ```text
//! scalar:  fixed width, little-endian
//! string:  u32 byte length + UTF-8 bytes        (bound: 16 MiB)
//! blob:    u32 byte length + bytes              (bound: 256 MiB)
//! array:   u32 element count + elements         (bound: 10 M)
//! option:  1-byte presence tag (0 | 1) + body
//! variant: 1-byte tag + body
//! float:   IEEE-754 little-endian
//! ```
//!
//! Bounds are enforced on decode and the offending bound is named in
//! the error.

use crate::error::{Result, WaxError};

/// Longest accepted string payload.
pub const MAX_STRING_BYTES: u64 = 16 * 1024 * 1024;
/// Longest accepted blob payload.
pub const MAX_BLOB_BYTES: u64 = 256 * 1024 * 1024;
/// Largest accepted array element count.
pub const MAX_ARRAY_ITEMS: u64 = 10_000_000;

/// Append-only encoder producing the canonical byte layout.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    #[must_use]
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Raw bytes without a length prefix (fixed-size fields).
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_str(&mut self, value: &str) {
        debug_assert!(value.len() as u64 <= MAX_STRING_BYTES);
        self.put_u32(value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
    }

    pub fn put_blob(&mut self, value: &[u8]) {
        debug_assert!(value.len() as u64 <= MAX_BLOB_BYTES);
        self.put_u32(value.len() as u32);
        self.buf.extend_from_slice(value);
    }

    pub fn put_array_len(&mut self, count: usize) {
        debug_assert!(count as u64 <= MAX_ARRAY_ITEMS);
        self.put_u32(count as u32);
    }

    /// Presence tag followed by the body produced by `body` when present.
    pub fn put_option<T>(&mut self, value: Option<&T>, body: impl FnOnce(&mut Self, &T)) {
        match value {
            Some(inner) => {
                self.put_u8(1);
                body(self, inner);
            }
            None => self.put_u8(0),
        }
    }

    pub fn put_variant_tag(&mut self, tag: u8) {
        self.put_u8(tag);
    }
}

/// Cursor-based decoder matching [`ByteWriter`]'s layout.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, len: usize, context: &'static str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(WaxError::DecodeTruncated { context })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn u8(&mut self, context: &'static str) -> Result<u8> {
        Ok(self.take(1, context)?[0])
    }

    pub fn u16(&mut self, context: &'static str) -> Result<u16> {
        let bytes = self.take(2, context)?;
        Ok(u16::from_le_bytes(bytes.try_into().expect("2 bytes")))
    }

    pub fn u32(&mut self, context: &'static str) -> Result<u32> {
        let bytes = self.take(4, context)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("4 bytes")))
    }

    pub fn u64(&mut self, context: &'static str) -> Result<u64> {
        let bytes = self.take(8, context)?;
        Ok(u64::from_le_bytes(bytes.try_into().expect("8 bytes")))
    }

    pub fn i64(&mut self, context: &'static str) -> Result<i64> {
        let bytes = self.take(8, context)?;
        Ok(i64::from_le_bytes(bytes.try_into().expect("8 bytes")))
    }

    pub fn f32(&mut self, context: &'static str) -> Result<f32> {
        let bytes = self.take(4, context)?;
        Ok(f32::from_le_bytes(bytes.try_into().expect("4 bytes")))
    }

    /// Fixed-width field, e.g. a 32-byte digest.
    pub fn array<const N: usize>(&mut self, context: &'static str) -> Result<[u8; N]> {
        let bytes = self.take(N, context)?;
        Ok(bytes.try_into().expect("fixed width"))
    }

    pub fn str(&mut self, context: &'static str) -> Result<String> {
        let len = u64::from(self.u32(context)?);
        if len > MAX_STRING_BYTES {
            return Err(WaxError::DecodeBound {
                what: "string bytes",
                limit: MAX_STRING_BYTES,
                actual: len,
            });
        }
        let bytes = self.take(len as usize, context)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WaxError::DecodeInvalid {
            context,
            reason: "string is not valid UTF-8".into(),
        })
    }

    pub fn blob(&mut self, context: &'static str) -> Result<Vec<u8>> {
        let len = u64::from(self.u32(context)?);
        if len > MAX_BLOB_BYTES {
            return Err(WaxError::DecodeBound {
                what: "blob bytes",
                limit: MAX_BLOB_BYTES,
                actual: len,
            });
        }
        Ok(self.take(len as usize, context)?.to_vec())
    }

    pub fn array_len(&mut self, context: &'static str) -> Result<usize> {
        let count = u64::from(self.u32(context)?);
        if count > MAX_ARRAY_ITEMS {
            return Err(WaxError::DecodeBound {
                what: "array items",
                limit: MAX_ARRAY_ITEMS,
                actual: count,
            });
        }
        Ok(count as usize)
    }

    pub fn option<T>(
        &mut self,
        context: &'static str,
        body: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<Option<T>> {
        match self.u8(context)? {
            0 => Ok(None),
            1 => Ok(Some(body(self)?)),
            tag => Err(WaxError::DecodeInvalid {
                context,
                reason: format!("invalid option tag {tag}").into(),
            }),
        }
    }

    pub fn variant_tag(&mut self, context: &'static str) -> Result<u8> {
        self.u8(context)
    }

    /// Rejects trailing bytes after a complete decode.
    pub fn expect_end(&self, context: &'static str) -> Result<()> {
        if self.remaining() == 0 {
            Ok(())
        } else {
            Err(WaxError::DecodeInvalid {
                context,
                reason: "unexpected trailing bytes".into(),
            })
        }
    }
}
