//! # Track Service
//!
//! The server and client built on the codec, the header container and the
//! session protocol.
//!
//! ## Components
//! - **Server**: single-threaded poll loop over accept, negotiation, requests,
//!   vagrant expulsion and expiration
//! - **Client**: negotiation, request/response with queued pushes, UDP data
//! - **Lifecycle**: last-seen tracking, expiration and cascading removal
//! - **Datagram**: UDP data channel sockets (unicast, broadcast, multicast)
//! - **Discovery**: stateless "where is the server" beacon

pub mod client;
pub mod datagram;
pub mod discovery;
pub mod lifecycle;
pub mod server;

pub use client::TrackClient;
pub use lifecycle::ObjectLifecycle;
pub use server::TrackServer;
