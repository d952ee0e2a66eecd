//! # Session Protocol
//!
//! Control-channel messages, the per-connection state machine, and the
//! negotiation that moves a fresh connection into the active state.
//!
//! ## Components
//! - **Message**: typed requests, responses and pushes over [`crate::core::frame::Frame`]
//! - **Session**: server-side connection states
//! - **Negotiation**: transport parameters, time, scenario and header inventory
//!
//! ## Session Flow
//! 1. Server accepts a TCP connection
//! 2. Server captures a [`negotiation::NegotiationSnapshot`] and writes it as one batch
//! 3. Client reads transport parameters, time, scenario and exactly N headers
//! 4. Client issues requests; server answers them and pushes events, headers
//!    and category data on the same stream

pub mod message;
pub mod negotiation;
pub mod session;

pub use message::{ControlMessage, MessageCode};
pub use negotiation::{NegotiationSnapshot, Negotiated, TransportParams};
pub use session::SessionState;
