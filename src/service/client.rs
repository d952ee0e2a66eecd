//! Track client: negotiates with a server, issues control-channel requests
//! and receives pushes and UDP data.
//!
//! Requests and pushes share the control stream. A push that arrives while a
//! response is awaited is queued and later returned by
//! [`TrackClient::recv_push`], never dropped.

use std::collections::VecDeque;
use std::net::Ipv4Addr;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, warn};

use crate::config::{ClientConfig, NetworkConfig, UdpKind};
use crate::core::codec::FrameCodec;
use crate::core::record::{decode, Header, Record, ScenarioHeader, TimeHeader};
use crate::error::{ProtocolError, Result};
use crate::protocol::message::ControlMessage;
use crate::protocol::negotiation::{client_negotiate, read_headers, TransportParams};
use crate::service::datagram::{bind_receiver, MAX_DATAGRAM};
use crate::utils::timeout::{poll_ready, with_timeout_error};

pub struct TrackClient {
    config: ClientConfig,
    framed: Framed<TcpStream, FrameCodec>,
    data_socket: Option<UdpSocket>,
    transport: TransportParams,
    time: TimeHeader,
    scenario: ScenarioHeader,
    headers: Vec<Header>,
    pending: VecDeque<ControlMessage>,
}

impl TrackClient {
    /// Connect, negotiate, and bind the UDP data socket announced by the server.
    #[instrument(skip(config), fields(address = %config.client.address))]
    pub async fn connect(config: &NetworkConfig) -> Result<Self> {
        let mut client = Self::connect_control(&config.client).await?;
        let socket = bind_receiver(&client.transport, config.transport.interface).await?;
        client.data_socket = Some(socket);
        Ok(client)
    }

    /// Connect and negotiate without binding a data socket.
    ///
    /// Useful when only the control channel matters, or when several clients
    /// share a host and cannot all bind the data port.
    pub async fn connect_control(config: &ClientConfig) -> Result<Self> {
        let stream = with_timeout_error(
            async { TcpStream::connect(&config.address).await.map_err(ProtocolError::from) },
            config.connection_timeout,
        )
        .await?;
        stream.set_nodelay(true)?;
        let mut framed = Framed::new(stream, FrameCodec);

        let negotiated =
            with_timeout_error(client_negotiate(&mut framed), config.connection_timeout).await?;
        info!(
            headers = negotiated.headers.len(),
            data_port = negotiated.transport.port,
            kind = ?negotiated.transport.kind,
            "Connected to track server"
        );

        Ok(Self {
            config: config.clone(),
            framed,
            data_socket: None,
            transport: negotiated.transport,
            time: negotiated.time,
            scenario: negotiated.scenario,
            headers: negotiated.headers,
            pending: VecDeque::new(),
        })
    }

    /// Headers received during negotiation.
    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// Most recent time header seen.
    pub fn time(&self) -> &TimeHeader {
        &self.time
    }

    pub fn scenario(&self) -> &ScenarioHeader {
        &self.scenario
    }

    pub fn transport(&self) -> &TransportParams {
        &self.transport
    }

    pub fn pending_pushes(&self) -> usize {
        self.pending.len()
    }

    pub async fn request_time(&mut self) -> Result<TimeHeader> {
        match self.request(ControlMessage::TimeRequest).await? {
            ControlMessage::Time(t) => {
                self.time = t;
                Ok(t)
            }
            other => Err(unexpected("TIME", &other)),
        }
    }

    pub async fn request_scenario(&mut self) -> Result<ScenarioHeader> {
        match self.request(ControlMessage::ScenarioRequest).await? {
            ControlMessage::Scenario(s) => {
                self.scenario = s.clone();
                Ok(s)
            }
            other => Err(unexpected("SCENARIO", &other)),
        }
    }

    /// Fetch the server's full header inventory.
    pub async fn request_headers(&mut self) -> Result<Vec<Header>> {
        let count = match self.request(ControlMessage::HeadersRequest).await? {
            ControlMessage::HeaderCount(n) => n as usize,
            other => return Err(unexpected("HEADERS", &other)),
        };
        // The server writes the count and the headers as one batch.
        with_timeout_error(read_headers(&mut self.framed, count), self.config.response_timeout).await
    }

    /// Fetch one header; `None` when the server does not know the id.
    pub async fn request_header(&mut self, id: u64) -> Result<Option<Header>> {
        match self.request(ControlMessage::HeaderRequest(id)).await? {
            ControlMessage::Header(h) => Ok(h),
            other => Err(unexpected("HEADER", &other)),
        }
    }

    pub async fn request_data_mode(&mut self) -> Result<TransportParams> {
        match self.request(ControlMessage::DataModeRequest).await? {
            ControlMessage::DataMode(p) => {
                self.transport = p.clone();
                Ok(p)
            }
            other => Err(unexpected("DATA_MODE", &other)),
        }
    }

    pub async fn keepalive(&mut self) -> Result<()> {
        self.request(ControlMessage::Keepalive).await.map(|_| ())
    }

    /// Send `request` and wait for its response, queueing pushes met on the way.
    async fn request(&mut self, request: ControlMessage) -> Result<ControlMessage> {
        self.framed.send(request.to_frame()).await?;
        let timeout = self.config.response_timeout;
        let framed = &mut self.framed;
        let pending = &mut self.pending;
        with_timeout_error(
            async move {
                loop {
                    let reply = next_reply(framed).await?;
                    if is_response_to(&request, &reply) {
                        return Ok(reply);
                    }
                    if reply == ControlMessage::Disconnect {
                        return Err(ProtocolError::ConnectionClosed);
                    }
                    debug!(code = reply.code().name(), "Queued push while awaiting response");
                    pending.push_back(reply);
                }
            },
            timeout,
        )
        .await
    }

    /// Next push from the server: an event, a header, category data, or a
    /// new time or scenario.
    ///
    /// Fails with [`ProtocolError::Timeout`] when nothing arrives within the
    /// response timeout, and with [`ProtocolError::ConnectionClosed`] when
    /// the server says goodbye.
    pub async fn recv_push(&mut self) -> Result<ControlMessage> {
        if let Some(push) = self.pending.pop_front() {
            return Ok(self.observe(push));
        }
        let reply =
            with_timeout_error(next_reply(&mut self.framed), self.config.response_timeout).await?;
        if reply == ControlMessage::Disconnect {
            return Err(ProtocolError::ConnectionClosed);
        }
        Ok(self.observe(reply))
    }

    /// A push that is already waiting, without blocking.
    pub async fn try_recv_push(&mut self) -> Result<Option<ControlMessage>> {
        if let Some(push) = self.pending.pop_front() {
            return Ok(Some(self.observe(push)));
        }
        match poll_ready(next_reply(&mut self.framed)).await {
            None => Ok(None),
            Some(Err(e)) => Err(e),
            Some(Ok(ControlMessage::Disconnect)) => Err(ProtocolError::ConnectionClosed),
            Some(Ok(reply)) => Ok(Some(self.observe(reply))),
        }
    }

    fn observe(&mut self, push: ControlMessage) -> ControlMessage {
        match &push {
            ControlMessage::Time(t) => self.time = *t,
            ControlMessage::Scenario(s) => self.scenario = s.clone(),
            _ => {}
        }
        push
    }

    /// Receive and decode one UDP data record.
    pub async fn recv_data(&mut self) -> Result<Record> {
        let Some(socket) = &self.data_socket else {
            return Err(ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "client has no data socket",
            )));
        };
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let n = with_timeout_error(
            async {
                socket
                    .recv_from(&mut buf)
                    .await
                    .map(|(n, _)| n)
                    .map_err(ProtocolError::from)
            },
            self.config.data_timeout,
        )
        .await?;
        decode(&buf[..n])
    }

    /// Address of the bound data socket, if any.
    pub fn data_port(&self) -> Option<u16> {
        self.data_socket
            .as_ref()
            .and_then(|s| s.local_addr().ok())
            .map(|a| a.port())
    }

    /// Tell the server goodbye and close the connection.
    pub async fn disconnect(mut self) -> Result<()> {
        if let Err(e) = self.framed.send(ControlMessage::Disconnect.to_frame()).await {
            warn!(error = %e, "Disconnect notice failed");
            return Err(e);
        }
        if self.transport.kind == UdpKind::Multicast {
            if let (Some(socket), Ok(group)) = (
                &self.data_socket,
                self.transport.address.parse::<Ipv4Addr>(),
            ) {
                if let Err(e) = socket.leave_multicast_v4(group, Ipv4Addr::UNSPECIFIED) {
                    warn!(%group, error = %e, "Leaving multicast group failed");
                }
            }
        }
        debug!("Disconnected");
        Ok(())
    }
}

/// Next decodable message from the server.
///
/// Frames with an unknown code or a bad payload were consumed whole by the
/// codec, so they are logged and skipped.
async fn next_reply(framed: &mut Framed<TcpStream, FrameCodec>) -> Result<ControlMessage> {
    loop {
        let frame = match framed.next().await {
            Some(frame) => frame?,
            None => return Err(ProtocolError::ConnectionClosed),
        };
        match ControlMessage::from_reply_frame(&frame) {
            Ok(message) => return Ok(message),
            Err(e) => debug!(code = frame.code, error = %e, "Skipped undecodable frame"),
        }
    }
}

/// Whether `reply` answers `request` rather than being a push.
fn is_response_to(request: &ControlMessage, reply: &ControlMessage) -> bool {
    match (request, reply) {
        (ControlMessage::TimeRequest, ControlMessage::Time(_))
        | (ControlMessage::ScenarioRequest, ControlMessage::Scenario(_))
        | (ControlMessage::HeadersRequest, ControlMessage::HeaderCount(_))
        | (ControlMessage::DataModeRequest, ControlMessage::DataMode(_))
        | (ControlMessage::Keepalive, ControlMessage::Keepalive)
        | (ControlMessage::HeaderRequest(_), ControlMessage::Header(None)) => true,
        (ControlMessage::HeaderRequest(id), ControlMessage::Header(Some(h))) => h.id() == *id,
        _ => false,
    }
}

fn unexpected(expected: &'static str, actual: &ControlMessage) -> ProtocolError {
    ProtocolError::UnexpectedMessage {
        expected,
        actual: actual.code().name(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::core::frame::Frame;
    use crate::core::record::{Event, PlatformHeader};
    use crate::protocol::message::MessageCode;
    use crate::protocol::negotiation::{server_negotiate, NegotiationSnapshot};
    use tokio::net::TcpListener;

    #[test]
    fn test_header_push_for_other_id_is_not_a_response() {
        let request = ControlMessage::HeaderRequest(5);
        let push = ControlMessage::Header(Some(PlatformHeader::new(6, "OTHER").into()));
        let answer = ControlMessage::Header(Some(PlatformHeader::new(5, "MINE").into()));
        assert!(!is_response_to(&request, &push));
        assert!(is_response_to(&request, &answer));
        assert!(is_response_to(&request, &ControlMessage::Header(None)));
    }

    #[test]
    fn test_events_are_never_responses() {
        let event = ControlMessage::Event(Event::expire(1, 0.0));
        for request in [
            ControlMessage::TimeRequest,
            ControlMessage::HeadersRequest,
            ControlMessage::Keepalive,
        ] {
            assert!(!is_response_to(&request, &event));
        }
    }

    #[tokio::test]
    async fn test_request_skips_undecodable_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ClientConfig {
            address: listener.local_addr().unwrap().to_string(),
            ..ClientConfig::default()
        };

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, FrameCodec);
            let snapshot = NegotiationSnapshot {
                transport: TransportParams::from_config(&TransportConfig::default()),
                time: TimeHeader::default(),
                scenario: ScenarioHeader::default(),
                headers: Vec::new(),
            };
            server_negotiate(&mut framed, &snapshot).await.unwrap();

            let request = framed.next().await.unwrap().unwrap();
            assert_eq!(request.code, MessageCode::Time.as_u8());
            let reply = TimeHeader {
                time: 42.0,
                ..TimeHeader::default()
            };
            framed.feed(Frame::new(250, vec![1u8; 12])).await.unwrap();
            framed
                .feed(Frame::new(MessageCode::Event.as_u8(), vec![0xFFu8; 3]))
                .await
                .unwrap();
            framed.feed(ControlMessage::Time(reply).to_frame()).await.unwrap();
            framed.flush().await.unwrap();
            // Hold the connection until the client hangs up.
            let _ = framed.next().await;
        });

        let mut client = TrackClient::connect_control(&config).await.unwrap();
        let time = client.request_time().await.unwrap();
        assert_eq!(time.time, 42.0);
        assert_eq!(client.pending_pushes(), 0);
        drop(client);
        server.await.unwrap();
    }
}
