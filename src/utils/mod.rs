//! # Utility Modules
//!
//! Supporting utilities for logging, metrics, and timing.
//!
//! ## Components
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Time**: Wall-clock seconds for the poll loop
//! - **Timeout**: Async timeout wrappers and readiness checks

pub mod logging;
pub mod metrics;
pub mod time;
pub mod timeout;
