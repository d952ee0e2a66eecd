//! Shared loopback harness for the server/client integration tests.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio::task::JoinHandle;
use trackwire::config::{ContainerConfig, NetworkConfig, UdpKind};
use trackwire::service::{TrackClient, TrackServer};

/// A server bound to loopback with a unicast data channel and a scratch container.
pub struct Harness {
    pub server: TrackServer,
    pub config: NetworkConfig,
    _dir: TempDir,
}

/// An unused UDP port on loopback. Racy, but good enough for tests.
pub fn free_udp_port() -> u16 {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

pub async fn start_server() -> Harness {
    start_server_with(|_| {}).await
}

pub async fn start_server_with<F>(mutator: F) -> Harness
where
    F: FnOnce(&mut NetworkConfig),
{
    let dir = tempfile::tempdir().unwrap();
    let mut config = NetworkConfig::default_with_overrides(|c| {
        c.server.address = "127.0.0.1:0".to_string();
        c.server.accept_wait = Duration::from_millis(10);
        c.server.io_timeout = Duration::from_secs(1);
        c.transport.kind = UdpKind::Unicast;
        c.transport.address = String::new();
        c.transport.port = free_udp_port();
        c.container = ContainerConfig {
            path: dir.path().join("headers.dat"),
            save: false,
            restore: false,
        };
        c.client.response_timeout = Duration::from_secs(2);
        c.client.connection_timeout = Duration::from_secs(2);
        c.client.data_timeout = Duration::from_secs(2);
    });
    mutator(&mut config);

    let server = TrackServer::bind(&config).await.unwrap();
    config.client.address = server.local_addr().unwrap().to_string();
    Harness {
        server,
        config,
        _dir: dir,
    }
}

/// Run server poll passes at time `now` until `task` finishes, then return its output.
pub async fn serve_until<T>(server: &mut TrackServer, now: f64, task: JoinHandle<T>) -> T {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !task.is_finished() {
        assert!(Instant::now() < deadline, "client task never finished");
        server.poll(now).await.unwrap();
    }
    task.await.unwrap()
}

/// Poll until `done` holds for the server.
pub async fn serve_until_state<P>(server: &mut TrackServer, now: f64, mut done: P)
where
    P: FnMut(&TrackServer) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done(server) {
        assert!(Instant::now() < deadline, "server never reached the expected state");
        server.poll(now).await.unwrap();
    }
}

/// Connect a control-only client, driving the server through negotiation.
pub async fn connect_control(harness: &mut Harness) -> TrackClient {
    let config = harness.config.client.clone();
    let task = tokio::spawn(async move { TrackClient::connect_control(&config).await });
    serve_until(&mut harness.server, 0.0, task).await.unwrap()
}

/// Connect a client that also binds the UDP data port.
pub async fn connect_full(harness: &mut Harness) -> TrackClient {
    let config = harness.config.clone();
    let task = tokio::spawn(async move { TrackClient::connect(&config).await });
    serve_until(&mut harness.server, 0.0, task).await.unwrap()
}
