//! Big-endian primitives shared by every record layout.
//!
//! Writing goes straight into a [`BytesMut`] through [`BufMut`]; reading goes
//! through [`WireReader`], which checks the remaining length before every
//! access so a truncated buffer surfaces as [`ProtocolError::ShortRead`]
//! instead of a panic.

use bytes::BufMut;

use crate::error::{ProtocolError, Result};

/// Width of fixed-size name fields (callsigns, icons, descriptions).
pub const NAME_LEN: usize = 64;

/// Width of scope sub-range names.
pub const RANGE_NAME_LEN: usize = 32;

/// Maximum byte length of a variable-length text field.
pub const MAX_TEXT_LEN: usize = 4096;

/// Largest prefix of `s` that fits in `max` bytes without splitting a character.
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Write `s` into a zero-padded field of exactly `width` bytes, truncating silently.
pub fn put_name<B: BufMut>(buf: &mut B, s: &str, width: usize) {
    let s = truncate_utf8(s, width);
    buf.put_slice(s.as_bytes());
    buf.put_bytes(0, width - s.len());
}

/// Write a `u32` byte count followed by the bytes of `s`, truncated to [`MAX_TEXT_LEN`].
pub fn put_text<B: BufMut>(buf: &mut B, s: &str) {
    let s = truncate_utf8(s, MAX_TEXT_LEN);
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

/// Encoded size of a text field holding `s`.
pub fn text_len(s: &str) -> usize {
    4 + truncate_utf8(s, MAX_TEXT_LEN).len()
}

pub fn put_bool<B: BufMut>(buf: &mut B, value: bool) {
    buf.put_u8(u8::from(value));
}

/// Bounds-checked cursor over an encoded record.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

macro_rules! read_be {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self) -> Result<$ty> {
            const N: usize = std::mem::size_of::<$ty>();
            let bytes = self.take(N)?;
            let mut raw = [0u8; N];
            raw.copy_from_slice(bytes);
            Ok(<$ty>::from_be_bytes(raw))
        }
    };
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Fail with `ShortRead` unless at least `n` more bytes are available.
    pub fn ensure(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(ProtocolError::ShortRead {
                needed: self.pos + n,
                available: self.buf.len(),
            });
        }
        Ok(())
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn i8(&mut self) -> Result<i8> {
        Ok(self.take(1)?[0] as i8)
    }

    pub fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    read_be!(u16, u16);
    read_be!(i16, i16);
    read_be!(u32, u32);
    read_be!(i32, i32);
    read_be!(u64, u64);
    read_be!(i64, i64);
    read_be!(f32, f32);
    read_be!(f64, f64);

    pub fn f64x3(&mut self) -> Result<[f64; 3]> {
        Ok([self.f64()?, self.f64()?, self.f64()?])
    }

    /// Read a zero-padded fixed-width name, stopping at the first NUL.
    pub fn name(&mut self, width: usize) -> Result<String> {
        let raw = self.take(width)?;
        let end = raw.iter().position(|b| *b == 0).unwrap_or(width);
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    /// Read a `u32`-prefixed text field.
    pub fn text(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let raw = self.take(len)?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }
}
