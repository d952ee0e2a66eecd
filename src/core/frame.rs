//! Control-channel frame: one message on the TCP stream.
//!
//! ```text
//! [Code(1)] [Length(4)] [Payload(N)]
//! ```
//!
//! The length is always the sender's claim, so a reader that does not
//! recognise `code` can still skip exactly `N` bytes and stay in sync.

use bytes::{BufMut, Bytes, BytesMut};

/// Bytes before the payload.
pub const FRAME_HEADER_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub code: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(code: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            code,
            payload: payload.into(),
        }
    }

    /// A frame with no payload, as used by most requests.
    pub fn empty(code: u8) -> Self {
        Self {
            code,
            payload: Bytes::new(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }

    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u8(self.code);
        dst.put_u32(self.payload.len() as u32);
        dst.put_slice(&self.payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let frame = Frame::new(4, vec![0xAA, 0xBB]);
        let mut buf = BytesMut::new();
        frame.write_to(&mut buf);
        assert_eq!(&buf[..], &[4, 0, 0, 0, 2, 0xAA, 0xBB]);
        assert_eq!(buf.len(), frame.encoded_len());
    }

    #[test]
    fn test_empty_frame_is_header_only() {
        let mut buf = BytesMut::new();
        Frame::empty(7).write_to(&mut buf);
        assert_eq!(&buf[..], &[7, 0, 0, 0, 0]);
    }
}
