//! Connection negotiation.
//!
//! Right after accept the server writes, in order and as one batch:
//!
//! ```text
//! DATA_MODE(transport params) TIME(time header) SCENARIO(scenario header)
//! HEADERS(count) HEADER(h1) ... HEADER(hN)
//! ```
//!
//! The client reads the same sequence back and fails on a version mismatch,
//! an out-of-order frame, or a header count that does not add up. A failed
//! negotiation never closes the socket; that is the caller's call.

use bytes::{BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, instrument, warn};

use crate::config::{TransportConfig, UdpKind, PROTOCOL_VERSION};
use crate::core::codec::FrameCodec;
use crate::core::frame::Frame;
use crate::core::record::{Header, ScenarioHeader, TimeHeader};
use crate::core::wire::{put_name, WireReader, NAME_LEN};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::ControlMessage;
use crate::storage::HeaderContainer;

/// Where and how UDP data will arrive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportParams {
    pub version: u16,
    pub kind: UdpKind,
    pub ttl: u8,
    pub port: u16,
    /// Multicast group, broadcast address, or the server host for unicast.
    pub address: String,
}

impl TransportParams {
    pub const ENCODED_LEN: usize = 2 + 1 + 1 + 2 + NAME_LEN;

    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            kind: config.kind,
            ttl: config.ttl,
            port: config.port,
            address: config.address.clone(),
        }
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(Self::ENCODED_LEN);
        buf.put_u16(self.version);
        buf.put_u8(self.kind.as_u8());
        buf.put_u8(self.ttl);
        buf.put_u16(self.port);
        put_name(buf, &self.address, NAME_LEN);
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        Ok(Self {
            version: r.u16()?,
            kind: UdpKind::from_u8(r.u8()?)?,
            ttl: r.u8()?,
            port: r.u16()?,
            address: r.name(NAME_LEN)?,
        })
    }
}

/// Server state frozen at the moment a negotiation begins.
///
/// Capturing before the first write means a header inserted while the batch
/// is in flight is never half-announced: it reaches this client as a push.
#[derive(Debug, Clone)]
pub struct NegotiationSnapshot {
    pub transport: TransportParams,
    pub time: TimeHeader,
    pub scenario: ScenarioHeader,
    pub headers: Vec<Header>,
}

impl NegotiationSnapshot {
    pub fn capture(
        transport: TransportParams,
        time: &TimeHeader,
        scenario: &ScenarioHeader,
        container: &HeaderContainer,
    ) -> Result<Self> {
        Ok(Self {
            transport,
            time: *time,
            scenario: scenario.clone(),
            headers: container.snapshot()?,
        })
    }

    /// The negotiation sequence, in wire order.
    pub fn frames(&self) -> Vec<Frame> {
        let mut frames = Vec::with_capacity(4 + self.headers.len());
        frames.push(ControlMessage::DataMode(self.transport.clone()).to_frame());
        frames.push(ControlMessage::Time(self.time).to_frame());
        frames.push(ControlMessage::Scenario(self.scenario.clone()).to_frame());
        frames.push(ControlMessage::HeaderCount(self.headers.len() as u32).to_frame());
        frames.extend(
            self.headers
                .iter()
                .map(|h| ControlMessage::Header(Some(h.clone())).to_frame()),
        );
        frames
    }
}

/// What the client learns from negotiation.
#[derive(Debug, Clone)]
pub struct Negotiated {
    pub transport: TransportParams,
    pub time: TimeHeader,
    pub scenario: ScenarioHeader,
    pub headers: Vec<Header>,
}

/// Send the negotiation sequence, flushing once at the end.
#[instrument(skip_all, fields(headers = snapshot.headers.len()))]
pub async fn server_negotiate<T>(
    framed: &mut Framed<T, FrameCodec>,
    snapshot: &NegotiationSnapshot,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    for frame in snapshot.frames() {
        framed.feed(frame).await?;
    }
    framed.flush().await?;
    debug!("Negotiation sent");
    Ok(())
}

/// Read the negotiation sequence sent by [`server_negotiate`].
#[instrument(skip_all)]
pub async fn client_negotiate<T>(framed: &mut Framed<T, FrameCodec>) -> Result<Negotiated>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let transport = match next_reply(framed).await? {
        ControlMessage::DataMode(params) => params,
        other => return Err(out_of_order("DATA_MODE", &other)),
    };
    if transport.version != PROTOCOL_VERSION {
        warn!(
            server = transport.version,
            local = PROTOCOL_VERSION,
            "Protocol version mismatch"
        );
        return Err(ProtocolError::UnsupportedVersion(transport.version));
    }

    let time = match next_reply(framed).await? {
        ControlMessage::Time(t) => t,
        other => return Err(out_of_order("TIME", &other)),
    };
    let scenario = match next_reply(framed).await? {
        ControlMessage::Scenario(s) => s,
        other => return Err(out_of_order("SCENARIO", &other)),
    };
    let count = match next_reply(framed).await? {
        ControlMessage::HeaderCount(n) => n as usize,
        other => return Err(out_of_order("HEADERS", &other)),
    };

    let headers = read_headers(framed, count).await?;
    debug!(headers = headers.len(), "Negotiation complete");
    Ok(Negotiated {
        transport,
        time,
        scenario,
        headers,
    })
}

/// Read exactly `count` HEADER frames, as follow a HEADERS announcement.
pub(crate) async fn read_headers<T>(
    framed: &mut Framed<T, FrameCodec>,
    count: usize,
) -> Result<Vec<Header>>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    // The count comes off the wire; cap the preallocation.
    let mut headers = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        match next_reply(framed).await? {
            ControlMessage::Header(Some(h)) => headers.push(h),
            ControlMessage::Header(None) => {
                return Err(ProtocolError::HandshakeError(
                    constants::ERR_HEADER_COUNT_MISMATCH.into(),
                ))
            }
            other => return Err(out_of_order("HEADER", &other)),
        }
    }
    Ok(headers)
}

async fn next_reply<T>(framed: &mut Framed<T, FrameCodec>) -> Result<ControlMessage>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    match framed.next().await {
        Some(frame) => ControlMessage::from_reply_frame(&frame?),
        None => Err(ProtocolError::HandshakeError(
            constants::ERR_NEGOTIATION_INCOMPLETE.into(),
        )),
    }
}

fn out_of_order(expected: &'static str, actual: &ControlMessage) -> ProtocolError {
    ProtocolError::UnexpectedMessage {
        expected,
        actual: actual.code().name(),
    }
}
