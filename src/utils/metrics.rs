//! Observability and Metrics
//!
//! Counters for monitoring the server's sessions, traffic, and object lifecycle.
//!
//! Uses atomic counters so the poll loop and any negotiation tasks can record
//! without coordination.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Global metrics collector for protocol operations
#[derive(Debug)]
pub struct Metrics {
    /// Total connections accepted
    pub connections_total: AtomicU64,
    /// Currently live clients
    pub connections_active: AtomicU64,
    /// Negotiations completed
    pub negotiations_success: AtomicU64,
    /// Negotiations that failed
    pub negotiations_failed: AtomicU64,
    /// Requests answered on the control channel
    pub requests_served: AtomicU64,
    /// Records written to the control channel
    pub tcp_records_sent: AtomicU64,
    /// Datagrams written to the data channel
    pub udp_datagrams_sent: AtomicU64,
    /// Total bytes sent on both channels
    pub bytes_sent: AtomicU64,
    /// Dead connections reclaimed
    pub vagrants_expelled: AtomicU64,
    /// Objects removed by the expiration sweep
    pub objects_expired: AtomicU64,
    /// Container compactions
    pub compactions: AtomicU64,
    /// Protocol errors
    pub protocol_errors: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            negotiations_success: AtomicU64::new(0),
            negotiations_failed: AtomicU64::new(0),
            requests_served: AtomicU64::new(0),
            tcp_records_sent: AtomicU64::new(0),
            udp_datagrams_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            vagrants_expelled: AtomicU64::new(0),
            objects_expired: AtomicU64::new(0),
            compactions: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record an accepted connection
    pub fn connection_accepted(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a negotiation outcome; successful clients become active
    pub fn negotiation(&self, success: bool) {
        if success {
            self.negotiations_success.fetch_add(1, Ordering::Relaxed);
            self.connections_active.fetch_add(1, Ordering::Relaxed);
        } else {
            self.negotiations_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a dead connection being reclaimed
    pub fn vagrant_expelled(&self, was_active: bool) {
        self.vagrants_expelled.fetch_add(1, Ordering::Relaxed);
        if was_active {
            // Saturate rather than wrap if a caller double-counts.
            let _ = self
                .connections_active
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        }
    }

    pub fn request_served(&self) {
        self.requests_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tcp_records_sent(&self, count: u64, byte_count: u64) {
        self.tcp_records_sent.fetch_add(count, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn udp_datagram_sent(&self, byte_count: u64) {
        self.udp_datagrams_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn objects_expired(&self, count: u64) {
        self.objects_expired.fetch_add(count, Ordering::Relaxed);
    }

    pub fn compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            negotiations_success: self.negotiations_success.load(Ordering::Relaxed),
            negotiations_failed: self.negotiations_failed.load(Ordering::Relaxed),
            requests_served: self.requests_served.load(Ordering::Relaxed),
            tcp_records_sent: self.tcp_records_sent.load(Ordering::Relaxed),
            udp_datagrams_sent: self.udp_datagrams_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            vagrants_expelled: self.vagrants_expelled.load(Ordering::Relaxed),
            objects_expired: self.objects_expired.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            negotiations_success = snapshot.negotiations_success,
            negotiations_failed = snapshot.negotiations_failed,
            requests_served = snapshot.requests_served,
            tcp_records_sent = snapshot.tcp_records_sent,
            udp_datagrams_sent = snapshot.udp_datagrams_sent,
            bytes_sent = snapshot.bytes_sent,
            vagrants_expelled = snapshot.vagrants_expelled,
            objects_expired = snapshot.objects_expired,
            compactions = snapshot.compactions,
            protocol_errors = snapshot.protocol_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Server metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub negotiations_success: u64,
    pub negotiations_failed: u64,
    pub requests_served: u64,
    pub tcp_records_sent: u64,
    pub udp_datagrams_sent: u64,
    pub bytes_sent: u64,
    pub vagrants_expelled: u64,
    pub objects_expired: u64,
    pub compactions: u64,
    pub protocol_errors: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}
