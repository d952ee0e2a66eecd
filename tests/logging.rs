//! Subscriber installation. Lives in its own test binary because the global
//! subscriber can only be set once per process.

#![allow(clippy::unwrap_used)]

use trackwire::config::LoggingConfig;
use trackwire::utils::logging::init_logging;
use trackwire::ProtocolError;

#[test]
fn test_logger_installs_once() {
    let config = LoggingConfig {
        json_format: true,
        ..LoggingConfig::default()
    };
    init_logging(&config).unwrap();
    assert!(matches!(
        init_logging(&LoggingConfig::default()),
        Err(ProtocolError::ConfigError(_))
    ));
}
