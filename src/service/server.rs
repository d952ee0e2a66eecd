//! Track server: a single-threaded poll loop over the control listener, the
//! live clients, the UDP data channel and the object store.
//!
//! Each [`TrackServer::poll`] pass runs, in order:
//! 1. answer pending discovery solicitations
//! 2. accept at most one connection (bounded wait) and negotiate it
//! 3. answer every request already waiting on a live connection
//! 4. expel vagrant connections
//! 5. compact after explicit removals, and run the expiration sweep when due
//!
//! Nothing blocks indefinitely: reads use readiness checks, writes are bounded
//! by the configured I/O timeout. A write that times out stays queued on the
//! connection and is flushed on a later pass. A connection that is lost on
//! read or write is moved to the vagrant list and only closed by the next
//! expel step.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, warn};

use crate::config::{NetworkConfig, UdpKind};
use crate::core::codec::FrameCodec;
use crate::core::frame::Frame;
use crate::core::record::{
    encode, CategoryData, DataRecord, Event, GenericData, Header, Record, ScenarioHeader,
    ScopeData, TimeHeader,
};
use crate::error::{ProtocolError, Result};
use crate::protocol::message::ControlMessage;
use crate::protocol::negotiation::{server_negotiate, NegotiationSnapshot, TransportParams};
use crate::protocol::session::SessionState;
use crate::service::datagram::bind_sender;
use crate::service::discovery::DiscoveryResponder;
use crate::service::lifecycle::ObjectLifecycle;
use crate::storage::HeaderContainer;
use crate::utils::metrics::{global_metrics, Timer};
use crate::utils::timeout::{poll_ready, with_timeout_error};

/// Requests answered per connection in one pass, so one chatty client
/// cannot starve the rest of the loop.
const MAX_REQUESTS_PER_PASS: usize = 64;

/// Unflushed bytes a connection may hold before its reader counts as gone.
const MAX_WRITE_BACKLOG: usize = 64 * 1024 * 1024;

struct Connection {
    id: u64,
    peer: SocketAddr,
    framed: Framed<TcpStream, FrameCodec>,
    state: SessionState,
    negotiated: bool,
}

impl Connection {
    fn transition(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            debug!(client = self.id, from = %self.state, to = %next, "Unexpected session transition");
        }
        self.state = next;
    }

    /// Queue `frames` as one batch and flush once.
    ///
    /// The whole batch is queued before anything is written, so a flush that
    /// times out leaves complete frames behind and the stream stays in sync.
    async fn send_batch(&mut self, frames: Vec<Frame>, io_timeout: Duration) -> Result<()> {
        let buf = self.framed.write_buffer_mut();
        let mut bytes = 0;
        for frame in &frames {
            frame.write_to(buf);
            bytes += frame.encoded_len();
        }
        if buf.len() > MAX_WRITE_BACKLOG {
            return Err(ProtocolError::ConnectionClosed);
        }
        global_metrics().tcp_records_sent(frames.len() as u64, bytes as u64);
        self.flush(io_timeout).await
    }

    async fn flush(&mut self, io_timeout: Duration) -> Result<()> {
        with_timeout_error(self.framed.flush(), io_timeout).await
    }

    fn backlog(&self) -> usize {
        self.framed.write_buffer().len()
    }

    /// Send a batch, parking the connection only when the peer is gone.
    ///
    /// A transient failure leaves the batch queued for a later pass.
    async fn deliver(&mut self, frames: Vec<Frame>, io_timeout: Duration) -> bool {
        match self.send_batch(frames, io_timeout).await {
            Ok(()) => true,
            Err(e) => self.handle_write_error(e),
        }
    }

    /// Retry the flush of anything a timed-out write left queued.
    async fn flush_backlog(&mut self, io_timeout: Duration) -> bool {
        if self.backlog() == 0 {
            return true;
        }
        match self.flush(io_timeout).await {
            Ok(()) => {
                debug!(client = self.id, "Flushed queued writes");
                true
            }
            Err(e) => self.handle_write_error(e),
        }
    }

    fn handle_write_error(&mut self, e: ProtocolError) -> bool {
        if e.is_transient() {
            debug!(client = self.id, queued = self.backlog(), error = %e, "Write deferred");
            return true;
        }
        if !e.is_connection_loss() {
            global_metrics().protocol_error();
        }
        warn!(client = self.id, peer = %self.peer, error = %e, "Write failed");
        self.transition(SessionState::Vagrant);
        false
    }
}

/// What one [`TrackServer::poll`] pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollSummary {
    pub discovery_replies: usize,
    pub accepted: bool,
    pub requests: usize,
    pub expelled: usize,
    pub expired: usize,
}

pub struct TrackServer {
    config: NetworkConfig,
    listener: TcpListener,
    data_socket: UdpSocket,
    data_target: Option<SocketAddr>,
    transport: TransportParams,
    discovery: Option<DiscoveryResponder>,
    container: HeaderContainer,
    lifecycle: ObjectLifecycle,
    time: TimeHeader,
    scenario: ScenarioHeader,
    clients: Vec<Connection>,
    vagrants: Vec<Connection>,
    next_client_id: u64,
    compaction_due: bool,
}

impl TrackServer {
    /// Bind the control listener and data socket and open the header container.
    ///
    /// Headers reloaded from a restored container are linked right away and
    /// take the `now` of the first [`poll`](Self::poll) as their last-seen time.
    #[instrument(skip(config), fields(address = %config.server.address))]
    pub async fn bind(config: &NetworkConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.server.address).await?;
        let local = listener.local_addr()?;
        let (data_socket, data_target) = bind_sender(&config.transport).await?;

        let discovery = if config.discovery.enabled {
            Some(DiscoveryResponder::bind(&config.discovery, local).await?)
        } else {
            None
        };

        let container = HeaderContainer::open(&config.container)?;
        let mut lifecycle = ObjectLifecycle::new(
            config.server.expire_limit,
            config.server.expire_check_interval,
        );
        container.traverse(|header| lifecycle.track_restored(header))?;

        info!(
            %local,
            kind = ?config.transport.kind,
            data_port = config.transport.port,
            restored = container.len(),
            "Track server listening"
        );

        Ok(Self {
            config: config.clone(),
            listener,
            data_socket,
            data_target,
            transport: TransportParams::from_config(&config.transport),
            discovery,
            container,
            lifecycle,
            time: TimeHeader::default(),
            scenario: ScenarioHeader::default(),
            clients: Vec::new(),
            vagrants: Vec::new(),
            next_client_id: 1,
            compaction_due: false,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn discovery_addr(&self) -> Option<SocketAddr> {
        self.discovery.as_ref().and_then(|d| d.local_addr().ok())
    }

    /// Wait up to the configured accept wait for a new connection.
    pub async fn accept_pending(&self) -> Result<Option<(TcpStream, SocketAddr)>> {
        match tokio::time::timeout(self.config.server.accept_wait, self.listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                global_metrics().connection_accepted();
                debug!(%peer, "Accepted connection");
                Ok(Some((stream, peer)))
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Accept failed");
                Err(e.into())
            }
            Err(_) => Ok(None),
        }
    }

    /// Negotiate an accepted connection and add it to the live clients.
    ///
    /// The header inventory is captured before the first byte is written. On
    /// failure the connection is parked as a vagrant and the error returned.
    #[instrument(skip(self, stream))]
    pub async fn negotiate(&mut self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let id = self.next_client_id;
        self.next_client_id += 1;

        let mut conn = Connection {
            id,
            peer,
            framed: Framed::new(stream, FrameCodec),
            state: SessionState::Accepted,
            negotiated: false,
        };

        if self.clients.len() >= self.config.server.max_clients {
            warn!(client = id, max = self.config.server.max_clients, "Client limit reached, refusing");
            conn.transition(SessionState::Terminated);
            self.vagrants.push(conn);
            return Err(ProtocolError::HandshakeError("client limit reached".into()));
        }

        conn.transition(SessionState::Negotiating);
        let snapshot = NegotiationSnapshot::capture(
            self.transport.clone(),
            &self.time,
            &self.scenario,
            &self.container,
        )?;

        let _timer = Timer::start("negotiation");
        let result = with_timeout_error(
            server_negotiate(&mut conn.framed, &snapshot),
            self.config.server.io_timeout,
        )
        .await;

        match result {
            Ok(()) => {
                global_metrics().negotiation(true);
                conn.negotiated = true;
                conn.transition(SessionState::Active);
                info!(client = id, %peer, headers = snapshot.headers.len(), "Client negotiated");
                self.clients.push(conn);
                Ok(())
            }
            Err(e) => {
                global_metrics().negotiation(false);
                warn!(client = id, %peer, error = %e, "Negotiation failed");
                conn.transition(SessionState::Vagrant);
                self.vagrants.push(conn);
                Err(e)
            }
        }
    }

    /// Run one pass of the poll loop at time `now` (seconds).
    pub async fn poll(&mut self, now: f64) -> Result<PollSummary> {
        let mut summary = PollSummary::default();

        let stamped = self.lifecycle.stamp_restored(now);
        if stamped > 0 {
            debug!(stamped, now, "Restored objects stamped");
        }

        if let Some(discovery) = &self.discovery {
            match discovery.poll().await {
                Ok(n) => summary.discovery_replies = n,
                Err(e) => debug!(error = %e, "Discovery poll failed"),
            }
        }

        // Accept failures are transient; the next pass tries again.
        if let Ok(Some((stream, peer))) = self.accept_pending().await {
            summary.accepted = true;
            // A failed negotiation is already logged and parked.
            let _ = self.negotiate(stream, peer).await;
        }

        summary.requests = self.service_requests().await;
        summary.expelled = self.expel_vagrants();

        if self.compaction_due {
            self.container.compact()?;
            self.compaction_due = false;
        }
        if self.lifecycle.check_due(now) {
            let events = self.lifecycle.sweep(&mut self.container, now)?;
            summary.expired = events.len();
            if !events.is_empty() {
                let frames = events.into_iter().map(|e| ControlMessage::Event(e).to_frame()).collect();
                self.push_all(frames).await;
            }
        }

        Ok(summary)
    }

    /// Answer every request already waiting on each live connection.
    async fn service_requests(&mut self) -> usize {
        let io_timeout = self.config.server.io_timeout;
        let mut served = 0;

        for conn in self.clients.iter_mut() {
            if !conn.flush_backlog(io_timeout).await {
                continue;
            }
            for _ in 0..MAX_REQUESTS_PER_PASS {
                let frame = match poll_ready(conn.framed.next()).await {
                    None => break,
                    Some(Some(Ok(frame))) => frame,
                    Some(None) => {
                        debug!(client = conn.id, peer = %conn.peer, "Client closed connection");
                        conn.transition(SessionState::Vagrant);
                        break;
                    }
                    Some(Some(Err(e))) => {
                        global_metrics().protocol_error();
                        warn!(client = conn.id, error = %e, "Control channel read failed");
                        conn.transition(SessionState::Vagrant);
                        break;
                    }
                };

                let request = match ControlMessage::from_request_frame(&frame) {
                    Ok(request) => request,
                    Err(e) => {
                        // The frame was consumed whole, so the stream is still in sync.
                        global_metrics().protocol_error();
                        debug!(client = conn.id, code = frame.code, error = %e, "Ignored request");
                        continue;
                    }
                };

                let reply = match request {
                    ControlMessage::Disconnect => {
                        info!(client = conn.id, "Client disconnected");
                        conn.transition(SessionState::Terminated);
                        break;
                    }
                    ControlMessage::TimeRequest => vec![ControlMessage::Time(self.time).to_frame()],
                    ControlMessage::ScenarioRequest => {
                        vec![ControlMessage::Scenario(self.scenario.clone()).to_frame()]
                    }
                    ControlMessage::DataModeRequest => {
                        vec![ControlMessage::DataMode(self.transport.clone()).to_frame()]
                    }
                    ControlMessage::Keepalive => vec![ControlMessage::Keepalive.to_frame()],
                    ControlMessage::HeaderRequest(id) => match self.container.retrieve(id) {
                        Ok(header) => vec![ControlMessage::Header(header).to_frame()],
                        Err(e) => {
                            warn!(id, error = %e, "Header lookup failed");
                            vec![ControlMessage::Header(None).to_frame()]
                        }
                    },
                    ControlMessage::HeadersRequest => match self.container.snapshot() {
                        Ok(headers) => {
                            let mut frames = Vec::with_capacity(headers.len() + 1);
                            frames.push(ControlMessage::HeaderCount(headers.len() as u32).to_frame());
                            frames.extend(
                                headers
                                    .into_iter()
                                    .map(|h| ControlMessage::Header(Some(h)).to_frame()),
                            );
                            frames
                        }
                        Err(e) => {
                            warn!(error = %e, "Header inventory read failed");
                            vec![ControlMessage::HeaderCount(0).to_frame()]
                        }
                    },
                    other => {
                        debug!(client = conn.id, code = other.code().name(), "Ignored non-request");
                        continue;
                    }
                };

                if !conn.deliver(reply, io_timeout).await {
                    break;
                }
                served += 1;
                global_metrics().request_served();
            }
        }

        self.park_dead_clients();
        served
    }

    /// Move clients that are no longer active onto the vagrant list.
    fn park_dead_clients(&mut self) {
        let (live, dead): (Vec<_>, Vec<_>) = std::mem::take(&mut self.clients)
            .into_iter()
            .partition(|c| c.state == SessionState::Active);
        self.clients = live;
        self.vagrants.extend(dead);
    }

    /// Close and forget every vagrant connection. Returns how many were closed.
    pub fn expel_vagrants(&mut self) -> usize {
        let expelled = self.vagrants.len();
        for mut conn in self.vagrants.drain(..) {
            conn.transition(SessionState::Terminated);
            global_metrics().vagrant_expelled(conn.negotiated);
            debug!(client = conn.id, peer = %conn.peer, "Expelled connection");
        }
        expelled
    }

    /// Send `frames` to every live client. A lost client turns vagrant.
    async fn push_all(&mut self, frames: Vec<Frame>) {
        let io_timeout = self.config.server.io_timeout;
        for conn in self.clients.iter_mut() {
            conn.deliver(frames.clone(), io_timeout).await;
        }
        self.park_dead_clients();
    }

    async fn send_datagram(&self, record: &Record) -> Result<()> {
        let bytes = encode(record);
        match (self.transport.kind, self.data_target) {
            (UdpKind::Unicast, _) | (_, None) => {
                for conn in &self.clients {
                    let target = SocketAddr::new(conn.peer.ip(), self.transport.port);
                    match self.data_socket.send_to(&bytes, target).await {
                        Ok(_) => global_metrics().udp_datagram_sent(bytes.len() as u64),
                        Err(e) => debug!(client = conn.id, %target, error = %e, "Datagram send failed"),
                    }
                }
            }
            (_, Some(target)) => {
                self.data_socket.send_to(&bytes, target).await?;
                global_metrics().udp_datagram_sent(bytes.len() as u64);
            }
        }
        Ok(())
    }

    /// Store a new object header and push it to live clients.
    ///
    /// A duplicate id is rejected with [`ProtocolError::DuplicateId`] and
    /// nothing changes.
    pub async fn insert_header(&mut self, header: Header, now: f64) -> Result<()> {
        if !self.container.insert(&header)? {
            return Err(ProtocolError::DuplicateId(header.id()));
        }
        self.lifecycle.track(&header, now);
        debug!(id = header.id(), kind = header.record_type().name(), "Inserted header");
        self.push_all(vec![ControlMessage::Header(Some(header)).to_frame()]).await;
        Ok(())
    }

    /// Replace (or insert) an object header and push it. Returns true when
    /// the id was already present.
    pub async fn update_header(&mut self, header: Header, now: f64) -> Result<bool> {
        let present = self.container.update(&header)?;
        self.lifecycle.track(&header, now);
        self.push_all(vec![ControlMessage::Header(Some(header)).to_frame()]).await;
        Ok(present)
    }

    /// Remove an object and its dependents, pushing an EXPIRE event for each.
    ///
    /// Returns the number of objects removed. The container is compacted on
    /// the next poll pass.
    pub async fn remove_object(&mut self, id: u64, now: f64) -> Result<usize> {
        let events = self.lifecycle.remove(&mut self.container, id, now)?;
        let removed = events.len();
        self.compaction_due = true;
        let frames = events.into_iter().map(|e| ControlMessage::Event(e).to_frame()).collect();
        self.push_all(frames).await;
        Ok(removed)
    }

    /// Send a position update over UDP and refresh the object's liveness.
    pub async fn send_data(&mut self, data: DataRecord, now: f64) -> Result<()> {
        self.lifecycle.touch(data.id(), now);
        self.send_datagram(&data.into()).await
    }

    /// Push an event. Header fields the event carries are patched in the
    /// container first; an EXPIRE state event removes the object.
    pub async fn send_event(&mut self, event: Event, now: f64) -> Result<()> {
        if event.is_expire() {
            self.remove_object(event.id, now).await?;
            return Ok(());
        }
        if let Some(mut header) = self.container.retrieve(event.id)? {
            if header.apply_event(&event.value) {
                self.container.update(&header)?;
            }
            self.lifecycle.touch(event.id, now);
        }
        self.push_all(vec![ControlMessage::Event(event).to_frame()]).await;
        Ok(())
    }

    pub async fn send_generic(&mut self, data: GenericData, now: f64) -> Result<()> {
        self.lifecycle.touch(data.id, now);
        self.send_datagram(&Record::GenericData(data)).await
    }

    pub async fn send_scope(&mut self, data: ScopeData, now: f64) -> Result<()> {
        self.lifecycle.touch(data.id, now);
        self.send_datagram(&Record::ScopeData(data)).await
    }

    /// Category data is pushed over the control channel.
    pub async fn send_category(&mut self, data: CategoryData, now: f64) -> Result<()> {
        self.lifecycle.touch(data.id, now);
        self.push_all(vec![ControlMessage::Category(data).to_frame()]).await;
        Ok(())
    }

    pub async fn set_time(&mut self, time: TimeHeader) {
        self.time = time;
        self.push_all(vec![ControlMessage::Time(time).to_frame()]).await;
    }

    pub async fn set_scenario(&mut self, scenario: ScenarioHeader) {
        self.scenario = scenario.clone();
        self.push_all(vec![ControlMessage::Scenario(scenario).to_frame()]).await;
    }

    pub fn time(&self) -> &TimeHeader {
        &self.time
    }

    pub fn scenario(&self) -> &ScenarioHeader {
        &self.scenario
    }

    pub fn container(&self) -> &HeaderContainer {
        &self.container
    }

    pub fn lifecycle(&self) -> &ObjectLifecycle {
        &self.lifecycle
    }

    pub fn lifecycle_mut(&mut self) -> &mut ObjectLifecycle {
        &mut self.lifecycle
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn vagrant_count(&self) -> usize {
        self.vagrants.len()
    }

    /// Tell every client goodbye, drop all connections and close the container.
    pub async fn shutdown(mut self) -> Result<()> {
        self.push_all(vec![ControlMessage::Disconnect.to_frame()]).await;
        for conn in self.clients.iter_mut() {
            conn.transition(SessionState::Terminated);
        }
        self.park_dead_clients();
        self.expel_vagrants();
        global_metrics().log_metrics();
        info!("Track server shut down");
        self.container.close()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;

    async fn connection_pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (stream, remote) = listener.accept().await.unwrap();
        let conn = Connection {
            id: 1,
            peer: remote,
            framed: Framed::new(stream, FrameCodec),
            state: SessionState::Active,
            negotiated: true,
        };
        (conn, peer)
    }

    #[tokio::test]
    async fn test_write_timeout_keeps_batch_queued() {
        let (mut conn, peer) = connection_pair().await;
        let payload = Bytes::from(vec![0x5A; 1 << 20]);
        let frames: Vec<Frame> = (0..32u8).map(|i| Frame::new(i, payload.clone())).collect();

        // Nobody reads yet, so 32 MiB cannot drain within the timeout.
        assert!(conn.deliver(frames, Duration::from_millis(20)).await);
        assert_eq!(conn.state, SessionState::Active);
        assert!(conn.backlog() > 0);

        let reader = tokio::spawn(async move {
            let mut framed = Framed::new(peer, FrameCodec);
            let mut codes = Vec::new();
            while codes.len() < 32 {
                let frame = framed.next().await.unwrap().unwrap();
                assert_eq!(frame.payload.len(), 1 << 20);
                codes.push(frame.code);
            }
            codes
        });
        while conn.backlog() > 0 {
            assert!(conn.flush_backlog(Duration::from_millis(50)).await);
        }
        assert_eq!(reader.await.unwrap(), (0..32u8).collect::<Vec<_>>());
        assert_eq!(conn.state, SessionState::Active);
    }

    #[tokio::test]
    async fn test_lost_peer_parks_connection() {
        let (mut conn, peer) = connection_pair().await;
        drop(peer);

        // The first write can still land in the socket buffer; the reset
        // shows up on a later one.
        let mut alive = true;
        for _ in 0..50 {
            alive = conn.deliver(vec![Frame::empty(6)], Duration::from_secs(1)).await;
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!alive);
        assert_eq!(conn.state, SessionState::Vagrant);
    }
}
