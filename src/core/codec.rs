use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_FRAME_SIZE;
use crate::core::frame::{Frame, FRAME_HEADER_LEN};
use crate::error::{ProtocolError, Result};

/// Tokio codec framing control messages over the TCP byte stream.
///
/// Decoding only yields complete frames, and splits them off the read buffer
/// without copying the payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(ProtocolError::OversizedFrame(len));
        }

        let total = FRAME_HEADER_LEN + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let code = src[0];
        src.advance(FRAME_HEADER_LEN);
        let payload = src.split_to(len).freeze();
        Ok(Some(Frame { code, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.payload.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::OversizedFrame(frame.payload.len()));
        }
        frame.write_to(dst);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_frame_waits() {
        let mut codec = FrameCodec;
        let mut bytes = BytesMut::new();
        Frame::new(8, vec![1, 2, 3, 4]).write_to(&mut bytes);
        let mut buf = BytesMut::from(&bytes[..7]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 7);

        buf.extend_from_slice(&bytes[7..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.code, 8);
        assert_eq!(&frame.payload[..], &[1, 2, 3, 4]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unknown_code_is_consumed_exactly() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        codec.encode(Frame::new(250, vec![9; 33]), &mut buf).unwrap();
        codec.encode(Frame::empty(6), &mut buf).unwrap();

        let unknown = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(unknown.code, 250);
        assert_eq!(unknown.payload.len(), 33);

        let next = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(next, Frame::empty(6));
    }

    #[test]
    fn test_oversized_claim_is_rejected() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[3]);
        buf.extend_from_slice(&(MAX_FRAME_SIZE as u32 + 1).to_be_bytes());
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::OversizedFrame(_))
        ));
    }
}
