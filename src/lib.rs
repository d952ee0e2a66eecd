//! # trackwire
//!
//! Real-time track distribution: one server publishes platform, beam and gate
//! objects plus their annotations to many clients. Object descriptions travel
//! once over a reliable TCP control channel; high-rate updates travel over UDP
//! (unicast, broadcast or multicast).
//!
//! ## Layers
//! - [`core`]: big-endian wire codec and control-channel framing
//! - [`storage`]: file-backed header container with lazy deletion
//! - [`protocol`]: control messages, session states and negotiation
//! - [`service`]: server poll loop, client, discovery and object lifecycle
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging and metrics
//!
//! ## Example
//! ```no_run
//! use trackwire::config::NetworkConfig;
//! use trackwire::core::record::PlatformHeader;
//! use trackwire::service::server::TrackServer;
//!
//! # async fn run() -> trackwire::error::Result<()> {
//! let config = NetworkConfig::from_env()?;
//! trackwire::utils::logging::init_logging(&config.logging)?;
//! let mut server = TrackServer::bind(&config).await?;
//! let now = trackwire::utils::time::now_seconds();
//! server.insert_header(PlatformHeader::new(1, "EAGLE").into(), now).await?;
//! loop {
//!     server.poll(trackwire::utils::time::now_seconds()).await?;
//! }
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod storage;
pub mod utils;

pub use crate::core::record::{decode, encode, Header, Record, RecordType};
pub use crate::error::{ProtocolError, Result};
