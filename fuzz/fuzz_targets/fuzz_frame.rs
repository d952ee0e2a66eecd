#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;
use trackwire::core::codec::FrameCodec;
use trackwire::protocol::ControlMessage;

fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);
    while let Ok(Some(frame)) = FrameCodec.decode(&mut buf) {
        let _ = ControlMessage::from_request_frame(&frame);
        let _ = ControlMessage::from_reply_frame(&frame);
    }
});
