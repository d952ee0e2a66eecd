//! # Error Types
//!
//! Error handling for the track distribution protocol.
//!
//! This module defines every error variant that can occur while encoding records,
//! persisting headers, or running a control-channel session.
//!
//! ## Error Categories
//! - **Transient I/O**: would-block and timeouts; the poll loop retries on the next tick
//! - **Protocol**: short reads, unknown type tags, version mismatches
//! - **Storage**: missing or corrupt container files, duplicate ids
//! - **Configuration**: invalid or unreadable settings
//!
//! All errors implement `std::error::Error` for interoperability.
//!
//! ## Example Usage
//! ```rust
//! use trackwire::error::{ProtocolError, Result};
//! use tracing::{error, info};
//!
//! fn check_length(buf: &[u8]) -> Result<()> {
//!     if buf.len() < 10 {
//!         return Err(ProtocolError::ShortRead { needed: 10, available: buf.len() });
//!     }
//!     Ok(())
//! }
//!
//! match check_length(&[0u8; 4]) {
//!     Ok(()) => info!("envelope present"),
//!     Err(e) => error!(error = %e, "rejected buffer"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Negotiation errors
    pub const ERR_HEADER_COUNT_MISMATCH: &str = "Header count did not match the announced count";
    pub const ERR_NEGOTIATION_INCOMPLETE: &str = "Connection closed during negotiation";

    /// Storage errors
    pub const ERR_BAD_MAGIC: &str = "Container file has an unknown magic marker";
    pub const ERR_BAD_SLOT_SIZE: &str = "Container file slot size does not match";
    pub const ERR_SLOT_TRUNCATED: &str = "Container file ends inside a slot";
    pub const ERR_NOT_A_HEADER: &str = "Slot does not hold a header record";
    pub const ERR_RECORD_TOO_LARGE: &str = "Header record does not fit in a container slot";

    /// Discovery errors
    pub const ERR_DISCOVERY_NO_REPLY: &str = "No server answered the discovery request";
}

/// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Short read: needed {needed} bytes, {available} available")]
    ShortRead { needed: usize, available: usize },

    #[error("Unknown record type: {0}")]
    UnknownType(u16),

    #[error("Unknown message code: {0}")]
    UnknownCode(u8),

    #[error("Invalid value {value} for field {field}")]
    InvalidValue { field: &'static str, value: u64 },

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Negotiation failed: {0}")]
    HandshakeError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Object {0} already exists")]
    DuplicateId(u64),

    #[error("Object {0} not found")]
    NotFound(u64),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// Whether the error is transient and the operation may be retried on a later tick.
    pub fn is_transient(&self) -> bool {
        match self {
            ProtocolError::Timeout => true,
            ProtocolError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Whether the error means the peer is gone and the connection should be reclaimed.
    pub fn is_connection_loss(&self) -> bool {
        match self {
            ProtocolError::ConnectionClosed => true,
            ProtocolError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            // Any mid-session protocol error desynchronizes the stream.
            ProtocolError::ShortRead { .. }
            | ProtocolError::OversizedFrame(_)
            | ProtocolError::UnsupportedVersion(_) => true,
            _ => false,
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
