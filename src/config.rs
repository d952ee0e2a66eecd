//! # Configuration Management
//!
//! Centralized configuration for the track distribution server and its clients.
//!
//! This module provides structured configuration for the control channel,
//! the UDP data channel, the header container, discovery, and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Operational Notes
//! - The accept wait is kept to tens of milliseconds so one poll pass never stalls
//! - Expiration is checked on a coarse interval (15 s) rather than every pass

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Current supported protocol version
pub const PROTOCOL_VERSION: u16 = 1;

/// Max allowed control frame payload (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Seconds without an update before an object expires
pub const DEFAULT_EXPIRE_LIMIT: f64 = 300.0;

/// Seconds between expiration sweeps
pub const EXPIRE_CHECK_INTERVAL: f64 = 15.0;

/// Default TCP control port
pub const DEFAULT_TCP_PORT: u16 = 5566;

/// Default UDP data port
pub const DEFAULT_UDP_PORT: u16 = 5567;

/// Default discovery port
pub const DEFAULT_DISCOVERY_PORT: u16 = 5568;

/// Default multicast group for data and discovery
pub const DEFAULT_MULTICAST_GROUP: &str = "239.1.2.3";

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// UDP data channel configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Header container configuration
    #[serde(default)]
    pub container: ContainerConfig,

    /// Discovery beacon configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("TRACKWIRE_SERVER_ADDRESS") {
            config.server.address = addr.clone();
            config.client.address = addr;
        }

        if let Ok(port) = std::env::var("TRACKWIRE_UDP_PORT") {
            if let Ok(val) = port.parse::<u16>() {
                config.transport.port = val;
            }
        }

        if let Ok(kind) = std::env::var("TRACKWIRE_UDP_KIND") {
            config.transport.kind = match kind.to_ascii_lowercase().as_str() {
                "unicast" => UdpKind::Unicast,
                "broadcast" => UdpKind::Broadcast,
                "multicast" => UdpKind::Multicast,
                other => {
                    return Err(ProtocolError::ConfigError(format!(
                        "Unknown UDP kind in TRACKWIRE_UDP_KIND: {other}"
                    )))
                }
            };
        }

        if let Ok(addr) = std::env::var("TRACKWIRE_UDP_ADDRESS") {
            config.transport.address = addr;
        }

        if let Ok(limit) = std::env::var("TRACKWIRE_EXPIRE_LIMIT_SECS") {
            if let Ok(val) = limit.parse::<f64>() {
                config.server.expire_limit = val;
            }
        }

        if let Ok(path) = std::env::var("TRACKWIRE_CONTAINER_PATH") {
            config.container.path = PathBuf::from(path);
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.container.validate());
        errors.extend(self.discovery.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// TCP control channel listen address (e.g., "0.0.0.0:5566")
    pub address: String,

    /// Longest a poll pass waits for a pending connection
    #[serde(with = "duration_serde")]
    pub accept_wait: Duration,

    /// Timeout applied to every control-channel write and negotiation
    #[serde(with = "duration_serde")]
    pub io_timeout: Duration,

    /// Maximum number of live clients
    pub max_clients: usize,

    /// Seconds without an update before an object expires
    pub expire_limit: f64,

    /// Seconds between expiration sweeps
    pub expire_check_interval: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: format!("0.0.0.0:{DEFAULT_TCP_PORT}"),
            accept_wait: timeout::ACCEPT_WAIT,
            io_timeout: timeout::DEFAULT_TIMEOUT,
            max_clients: 256,
            expire_limit: DEFAULT_EXPIRE_LIMIT,
            expire_check_interval: EXPIRE_CHECK_INTERVAL,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:5566')",
                self.address
            ));
        }

        if self.accept_wait.as_millis() > 1000 {
            errors.push("Accept wait too long (maximum: 1s)".to_string());
        }

        if self.io_timeout.as_millis() < 10 {
            errors.push("I/O timeout too short (minimum: 10ms)".to_string());
        } else if self.io_timeout.as_secs() > 300 {
            errors.push("I/O timeout too long (maximum: 300s)".to_string());
        }

        if self.max_clients == 0 {
            errors.push("Max clients must be greater than 0".to_string());
        }

        // Non-positive limits are replaced with the default at runtime, but flag them here.
        if self.expire_limit.is_nan() || self.expire_limit <= 0.0 {
            errors.push(format!(
                "Expire limit must be positive (got {}, default {DEFAULT_EXPIRE_LIMIT}s will be used)",
                self.expire_limit
            ));
        }

        if self.expire_check_interval.is_nan() || self.expire_check_interval <= 0.0 {
            errors.push("Expire check interval must be positive".to_string());
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Server control channel address
    pub address: String,

    /// Timeout for connection attempts and negotiation
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Timeout for waiting on a response to a request
    #[serde(with = "duration_serde")]
    pub response_timeout: Duration,

    /// Timeout for a single UDP receive
    #[serde(with = "duration_serde")]
    pub data_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{DEFAULT_TCP_PORT}"),
            connection_timeout: timeout::DEFAULT_TIMEOUT,
            response_timeout: Duration::from_secs(5),
            data_timeout: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Client address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid client address format: '{}' (expected format: '10.0.0.5:5566')",
                self.address
            ));
        }

        if self.connection_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        }

        if self.response_timeout.as_millis() < 100 {
            errors.push("Response timeout too short (minimum: 100ms)".to_string());
        }

        errors
    }
}

/// How data records are addressed on the UDP channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UdpKind {
    /// Sent to each connected client's address
    Unicast,
    /// Sent to a broadcast address
    Broadcast,
    /// Sent to a multicast group
    #[default]
    Multicast,
}

impl UdpKind {
    pub fn as_u8(self) -> u8 {
        match self {
            UdpKind::Unicast => 0,
            UdpKind::Broadcast => 1,
            UdpKind::Multicast => 2,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(UdpKind::Unicast),
            1 => Ok(UdpKind::Broadcast),
            2 => Ok(UdpKind::Multicast),
            other => Err(ProtocolError::InvalidValue {
                field: "udp kind",
                value: u64::from(other),
            }),
        }
    }
}

/// UDP data channel configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Unicast, broadcast or multicast delivery
    pub kind: UdpKind,

    /// UDP data port
    pub port: u16,

    /// Multicast group or broadcast address (ignored for unicast)
    pub address: String,

    /// Multicast TTL
    pub ttl: u8,

    /// Local interface to send/join on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<Ipv4Addr>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: UdpKind::Multicast,
            port: DEFAULT_UDP_PORT,
            address: DEFAULT_MULTICAST_GROUP.to_string(),
            ttl: 1,
            interface: None,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.kind != UdpKind::Unicast {
            match self.address.parse::<IpAddr>() {
                Ok(IpAddr::V4(addr)) => {
                    if self.kind == UdpKind::Multicast && !addr.is_multicast() {
                        errors.push(format!("'{addr}' is not a multicast group address"));
                    }
                }
                Ok(IpAddr::V6(_)) => {
                    errors.push("Only IPv4 UDP data addresses are supported".to_string())
                }
                Err(_) => errors.push(format!("Invalid UDP data address: '{}'", self.address)),
            }
        }

        if self.kind == UdpKind::Multicast && self.ttl == 0 {
            errors.push("Multicast TTL must be at least 1".to_string());
        }

        errors
    }
}

/// Header container configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContainerConfig {
    /// Backing file path
    pub path: PathBuf,

    /// Keep the backing file on clean shutdown
    pub save: bool,

    /// Attempt to reload an existing file at startup
    pub restore: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            path: std::env::temp_dir().join("trackwire-headers.dat"),
            save: false,
            restore: false,
        }
    }
}

impl ContainerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push("Container path cannot be empty".to_string());
        } else if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                errors.push(format!(
                    "Container directory does not exist: {}",
                    parent.display()
                ));
            }
        }

        if self.restore && !self.save {
            errors.push(
                "WARNING: restore is enabled but save is off; the file is deleted on shutdown"
                    .to_string(),
            );
        }

        errors
    }
}

/// Discovery beacon configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// Whether the server answers discovery requests
    pub enabled: bool,

    /// Multicast group solicitations are sent to
    pub group: Ipv4Addr,

    /// Discovery port
    pub port: u16,

    /// TTL for solicitations
    pub ttl: u8,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            group: Ipv4Addr::new(239, 1, 2, 3),
            port: DEFAULT_DISCOVERY_PORT,
            ttl: 1,
        }
    }
}

impl DiscoveryConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.enabled && !self.group.is_multicast() {
            errors.push(format!(
                "Discovery group '{}' is not a multicast address",
                self.group
            ));
        }
        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("trackwire"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
