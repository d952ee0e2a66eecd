//! Typed control-channel messages.
//!
//! Requests, responses and pushes share one code space. A code means a
//! request when the client sends it and a response or push when the server
//! does, so decoding takes the direction into account.

use bytes::{Bytes, BytesMut};

use crate::core::frame::Frame;
use crate::core::record::{
    decode, CategoryData, Event, Header, Record, ScenarioHeader, TimeHeader, WireRecord,
};
use crate::core::wire::WireReader;
use crate::error::{ProtocolError, Result};
use crate::protocol::negotiation::TransportParams;

/// One-byte code leading every control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageCode {
    Time = 1,
    Scenario = 2,
    Headers = 3,
    Header = 4,
    DataMode = 5,
    Keepalive = 6,
    Disconnect = 7,
    Event = 8,
    Category = 9,
}

impl MessageCode {
    pub fn from_u8(value: u8) -> Result<Self> {
        Ok(match value {
            1 => MessageCode::Time,
            2 => MessageCode::Scenario,
            3 => MessageCode::Headers,
            4 => MessageCode::Header,
            5 => MessageCode::DataMode,
            6 => MessageCode::Keepalive,
            7 => MessageCode::Disconnect,
            8 => MessageCode::Event,
            9 => MessageCode::Category,
            other => return Err(ProtocolError::UnknownCode(other)),
        })
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageCode::Time => "TIME",
            MessageCode::Scenario => "SCENARIO",
            MessageCode::Headers => "HEADERS",
            MessageCode::Header => "HEADER",
            MessageCode::DataMode => "DATA_MODE",
            MessageCode::Keepalive => "KEEPALIVE",
            MessageCode::Disconnect => "DISCONNECT",
            MessageCode::Event => "EVENT",
            MessageCode::Category => "CATEGORY",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    // Client to server
    TimeRequest,
    ScenarioRequest,
    HeadersRequest,
    HeaderRequest(u64),
    DataModeRequest,
    /// Sent by the client and echoed back by the server.
    Keepalive,
    Disconnect,

    // Server to client
    Time(TimeHeader),
    Scenario(ScenarioHeader),
    /// Announces how many `Header` frames follow.
    HeaderCount(u32),
    /// A requested header (`None` when the id is unknown) or a pushed one.
    Header(Option<Header>),
    DataMode(TransportParams),
    Event(Event),
    Category(CategoryData),
}

impl ControlMessage {
    pub fn code(&self) -> MessageCode {
        match self {
            ControlMessage::TimeRequest | ControlMessage::Time(_) => MessageCode::Time,
            ControlMessage::ScenarioRequest | ControlMessage::Scenario(_) => MessageCode::Scenario,
            ControlMessage::HeadersRequest | ControlMessage::HeaderCount(_) => MessageCode::Headers,
            ControlMessage::HeaderRequest(_) | ControlMessage::Header(_) => MessageCode::Header,
            ControlMessage::DataModeRequest | ControlMessage::DataMode(_) => MessageCode::DataMode,
            ControlMessage::Keepalive => MessageCode::Keepalive,
            ControlMessage::Disconnect => MessageCode::Disconnect,
            ControlMessage::Event(_) => MessageCode::Event,
            ControlMessage::Category(_) => MessageCode::Category,
        }
    }

    pub fn to_frame(&self) -> Frame {
        let code = self.code().as_u8();
        match self {
            ControlMessage::TimeRequest
            | ControlMessage::ScenarioRequest
            | ControlMessage::HeadersRequest
            | ControlMessage::DataModeRequest
            | ControlMessage::Keepalive
            | ControlMessage::Disconnect
            | ControlMessage::Header(None) => Frame::empty(code),
            ControlMessage::HeaderRequest(id) => Frame::new(code, Bytes::copy_from_slice(&id.to_be_bytes())),
            ControlMessage::HeaderCount(n) => Frame::new(code, Bytes::copy_from_slice(&n.to_be_bytes())),
            ControlMessage::Time(t) => Frame::new(code, record_bytes(t)),
            ControlMessage::Scenario(s) => Frame::new(code, record_bytes(s)),
            ControlMessage::Header(Some(h)) => Frame::new(code, h.encode()),
            ControlMessage::Event(e) => Frame::new(code, record_bytes(e)),
            ControlMessage::Category(c) => Frame::new(code, record_bytes(c)),
            ControlMessage::DataMode(params) => {
                let mut buf = BytesMut::with_capacity(TransportParams::ENCODED_LEN);
                params.encode_into(&mut buf);
                Frame::new(code, buf.freeze())
            }
        }
    }

    /// Decode a frame sent by a client.
    pub fn from_request_frame(frame: &Frame) -> Result<Self> {
        Ok(match MessageCode::from_u8(frame.code)? {
            MessageCode::Time => ControlMessage::TimeRequest,
            MessageCode::Scenario => ControlMessage::ScenarioRequest,
            MessageCode::Headers => ControlMessage::HeadersRequest,
            MessageCode::Header => ControlMessage::HeaderRequest(WireReader::new(&frame.payload).u64()?),
            MessageCode::DataMode => ControlMessage::DataModeRequest,
            MessageCode::Keepalive => ControlMessage::Keepalive,
            MessageCode::Disconnect => ControlMessage::Disconnect,
            code @ (MessageCode::Event | MessageCode::Category) => {
                return Err(ProtocolError::UnexpectedMessage {
                    expected: "request",
                    actual: code.name(),
                })
            }
        })
    }

    /// Decode a frame sent by the server.
    pub fn from_reply_frame(frame: &Frame) -> Result<Self> {
        let payload = &frame.payload[..];
        Ok(match MessageCode::from_u8(frame.code)? {
            MessageCode::Time => match decode(payload)? {
                Record::TimeHeader(t) => ControlMessage::Time(t),
                other => return Err(mismatch("time header", &other)),
            },
            MessageCode::Scenario => match decode(payload)? {
                Record::ScenarioHeader(s) => ControlMessage::Scenario(s),
                other => return Err(mismatch("scenario header", &other)),
            },
            MessageCode::Headers => ControlMessage::HeaderCount(WireReader::new(payload).u32()?),
            MessageCode::Header if payload.is_empty() => ControlMessage::Header(None),
            MessageCode::Header => ControlMessage::Header(Some(Header::decode(payload)?)),
            MessageCode::DataMode => ControlMessage::DataMode(TransportParams::decode(payload)?),
            MessageCode::Keepalive => ControlMessage::Keepalive,
            MessageCode::Disconnect => ControlMessage::Disconnect,
            MessageCode::Event => match decode(payload)? {
                Record::Event(e) => ControlMessage::Event(e),
                other => return Err(mismatch("event", &other)),
            },
            MessageCode::Category => match decode(payload)? {
                Record::CategoryData(c) => ControlMessage::Category(c),
                other => return Err(mismatch("category data", &other)),
            },
        })
    }
}

fn record_bytes<R: WireRecord>(record: &R) -> Bytes {
    let mut buf = BytesMut::with_capacity(record.encoded_len());
    record.encode_into(&mut buf);
    buf.freeze()
}

fn mismatch(expected: &'static str, actual: &Record) -> ProtocolError {
    ProtocolError::UnexpectedMessage {
        expected,
        actual: actual.record_type().name(),
    }
}
