//! Server discovery beacon.
//!
//! A client sends a solicitation to a well-known multicast group; every
//! listening server answers with the address of its control channel.
//!
//! ```text
//! Solicitation: ["TWDQ"(4)] [Version(2)]
//! Reply:        ["TWDR"(4)] [Version(2)] [Port(2)] [Address(64)]
//! ```
//!
//! An empty or unspecified reply address means "the address this reply came from".

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::net::UdpSocket;
use tracing::{debug, instrument, trace, warn};

use crate::config::{DiscoveryConfig, PROTOCOL_VERSION};
use crate::core::wire::{put_name, WireReader, NAME_LEN};
use crate::error::{constants, ProtocolError, Result};
use crate::utils::timeout::poll_ready;

pub const SOLICIT_MAGIC: [u8; 4] = *b"TWDQ";
pub const REPLY_MAGIC: [u8; 4] = *b"TWDR";
pub const SOLICIT_LEN: usize = 6;
pub const REPLY_LEN: usize = 4 + 2 + 2 + NAME_LEN;

pub fn encode_solicitation() -> Bytes {
    let mut buf = BytesMut::with_capacity(SOLICIT_LEN);
    buf.put_slice(&SOLICIT_MAGIC);
    buf.put_u16(PROTOCOL_VERSION);
    buf.freeze()
}

/// Whether `buf` is a solicitation this server should answer.
pub fn is_solicitation(buf: &[u8]) -> bool {
    let mut r = WireReader::new(buf);
    matches!(r.take(4), Ok(magic) if magic == SOLICIT_MAGIC)
        && matches!(r.u16(), Ok(PROTOCOL_VERSION))
}

pub fn encode_reply(address: &str, port: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(REPLY_LEN);
    buf.put_slice(&REPLY_MAGIC);
    buf.put_u16(PROTOCOL_VERSION);
    buf.put_u16(port);
    put_name(&mut buf, address, NAME_LEN);
    buf.freeze()
}

/// Parse a reply received from `from` into the server's control address.
pub fn decode_reply(buf: &[u8], from: SocketAddr) -> Result<SocketAddr> {
    let mut r = WireReader::new(buf);
    if r.take(4)? != REPLY_MAGIC {
        return Err(ProtocolError::UnexpectedMessage {
            expected: "discovery reply",
            actual: "unknown datagram",
        });
    }
    let version = r.u16()?;
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    let port = r.u16()?;
    let address = r.name(NAME_LEN)?;
    let ip = match address.parse::<IpAddr>() {
        Ok(ip) if !ip.is_unspecified() => ip,
        _ => from.ip(),
    };
    Ok(SocketAddr::new(ip, port))
}

/// Answers discovery solicitations from the server poll loop.
#[derive(Debug)]
pub struct DiscoveryResponder {
    socket: UdpSocket,
    reply: Bytes,
}

impl DiscoveryResponder {
    /// Listen for solicitations on `config.port`, joined to `config.group`.
    ///
    /// `control` is the server's TCP address; its IP goes into the reply
    /// unless it is unspecified.
    pub async fn bind(config: &DiscoveryConfig, control: SocketAddr) -> Result<Self> {
        let socket =
            UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port)).await?;
        if let Err(e) = socket.join_multicast_v4(config.group, Ipv4Addr::UNSPECIFIED) {
            // Still reachable by unicast solicitations.
            warn!(group = %config.group, error = %e, "Discovery could not join multicast group");
        }
        let address = if control.ip().is_unspecified() {
            String::new()
        } else {
            control.ip().to_string()
        };
        debug!(port = config.port, group = %config.group, "Discovery responder listening");
        Ok(Self {
            socket,
            reply: encode_reply(&address, control.port()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Answer every solicitation already waiting, without blocking.
    ///
    /// Returns the number of replies sent.
    pub async fn poll(&self) -> Result<usize> {
        let mut buf = [0u8; 64];
        let mut answered = 0;
        while let Some(received) = poll_ready(self.socket.recv_from(&mut buf)).await {
            let (n, from) = received?;
            if !is_solicitation(&buf[..n]) {
                trace!(%from, len = n, "Ignored non-solicitation datagram");
                continue;
            }
            self.socket.send_to(&self.reply, from).await?;
            debug!(%from, "Answered discovery request");
            answered += 1;
        }
        Ok(answered)
    }
}

/// Solicit the configured multicast group and return the first server found.
pub async fn discover_server(config: &DiscoveryConfig, timeout: Duration) -> Result<SocketAddr> {
    let target = SocketAddr::V4(SocketAddrV4::new(config.group, config.port));
    solicit(target, config.ttl, timeout).await
}

/// Send one solicitation to `target` and wait up to `timeout` for a reply.
#[instrument(skip(timeout))]
pub async fn solicit(target: SocketAddr, ttl: u8, timeout: Duration) -> Result<SocketAddr> {
    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_multicast_ttl_v4(u32::from(ttl))?;
    socket.send_to(&encode_solicitation(), target).await?;

    let wait = async {
        let mut buf = [0u8; REPLY_LEN + 16];
        loop {
            let (n, from) = socket.recv_from(&mut buf).await?;
            match decode_reply(&buf[..n], from) {
                Ok(server) => return Ok::<_, ProtocolError>(server),
                Err(e) => debug!(%from, error = %e, "Ignored discovery datagram"),
            }
        }
    };
    match tokio::time::timeout(timeout, wait).await {
        Ok(found) => found,
        Err(_) => {
            warn!(%target, "{}", constants::ERR_DISCOVERY_NO_REPLY);
            Err(ProtocolError::Timeout)
        }
    }
}
