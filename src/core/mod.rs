//! # Wire Codec
//!
//! Big-endian binary encoding for the closed set of track records, plus the
//! framing used on the TCP control channel.
//!
//! This module performs no I/O: every function is a pure transform between
//! typed records and flat byte buffers, shared identically by client and server.
//!
//! ## Components
//! - **Wire**: bounds-checked big-endian primitives and fixed-width strings
//! - **Record**: record types and their layouts, `encode`/`decode`
//! - **Frame**: `[code][length][payload]` control-channel message
//! - **Codec**: Tokio codec for framing over byte streams
//!
//! ## Record Format
//! ```text
//! [Type(2)] [Id(8)] [Type-specific fields...]
//! ```
//!
//! UDP carries one record per datagram; TCP carries records inside frames.

pub mod codec;
pub mod frame;
pub mod record;
pub mod wire;

pub use record::{decode, decode_prefix, encode, Header, Record, RecordType};
