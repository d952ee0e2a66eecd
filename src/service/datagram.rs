//! UDP data channel sockets.
//!
//! The server sends from an ephemeral port: to a multicast group, to a
//! broadcast address, or to each client's host in turn for unicast. Clients
//! listen on the port announced during negotiation.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::config::{TransportConfig, UdpKind};
use crate::error::{ProtocolError, Result};
use crate::protocol::negotiation::TransportParams;

/// Largest datagram a receiver accepts.
pub const MAX_DATAGRAM: usize = 64 * 1024;

fn parse_v4(field: &'static str, address: &str) -> Result<Ipv4Addr> {
    address
        .parse::<Ipv4Addr>()
        .map_err(|_| ProtocolError::ConfigError(format!("Invalid {field} address: '{address}'")))
}

/// Bind the server's sending socket.
///
/// Returns the socket and, for broadcast and multicast, the fixed destination.
pub async fn bind_sender(config: &TransportConfig) -> Result<(UdpSocket, Option<SocketAddr>)> {
    let local = SocketAddrV4::new(config.interface.unwrap_or(Ipv4Addr::UNSPECIFIED), 0);
    let socket = UdpSocket::bind(local).await?;

    let target = match config.kind {
        UdpKind::Unicast => None,
        UdpKind::Broadcast => {
            socket.set_broadcast(true)?;
            let addr = parse_v4("broadcast", &config.address)?;
            Some(SocketAddr::V4(SocketAddrV4::new(addr, config.port)))
        }
        UdpKind::Multicast => {
            socket.set_multicast_ttl_v4(u32::from(config.ttl))?;
            socket.set_multicast_loop_v4(true)?;
            let group = parse_v4("multicast", &config.address)?;
            Some(SocketAddr::V4(SocketAddrV4::new(group, config.port)))
        }
    };

    debug!(kind = ?config.kind, ?target, "Bound UDP data sender");
    Ok((socket, target))
}

/// Bind a client's receiving socket for the announced transport.
pub async fn bind_receiver(
    params: &TransportParams,
    interface: Option<Ipv4Addr>,
) -> Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, params.port)).await?;
    match params.kind {
        UdpKind::Unicast => {}
        UdpKind::Broadcast => socket.set_broadcast(true)?,
        UdpKind::Multicast => {
            let group = parse_v4("multicast", &params.address)?;
            let iface = interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
            if let Err(e) = socket.join_multicast_v4(group, iface) {
                warn!(%group, error = %e, "Failed to join multicast group");
                return Err(e.into());
            }
        }
    }
    debug!(port = params.port, kind = ?params.kind, "Bound UDP data receiver");
    Ok(socket)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::PROTOCOL_VERSION;

    #[tokio::test]
    async fn test_unicast_sender_has_no_fixed_target() {
        let config = TransportConfig {
            kind: UdpKind::Unicast,
            ..TransportConfig::default()
        };
        let (_socket, target) = bind_sender(&config).await.unwrap();
        assert!(target.is_none());
    }

    #[tokio::test]
    async fn test_bad_broadcast_address_is_config_error() {
        let config = TransportConfig {
            kind: UdpKind::Broadcast,
            address: "not-an-ip".into(),
            ..TransportConfig::default()
        };
        assert!(matches!(
            bind_sender(&config).await,
            Err(ProtocolError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_unicast_receiver_gets_datagram() {
        let scratch = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = scratch.local_addr().unwrap().port();
        drop(scratch);

        let params = TransportParams {
            version: PROTOCOL_VERSION,
            kind: UdpKind::Unicast,
            ttl: 1,
            port,
            address: "127.0.0.1".into(),
        };
        let receiver = bind_receiver(&params, None).await.unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"ping", ("127.0.0.1", port)).await.unwrap();

        let mut buf = [0u8; 16];
        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
    }
}
