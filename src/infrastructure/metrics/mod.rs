//! Prometheus Metrics Module
//!
//! Provides hub-wide metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - Active and total WebSocket connections
//! - Messages received from the bus and enqueued to clients
//! - Slow consumers evicted by the backpressure policy
//! - Process CPU, memory and file descriptors (Linux only)

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Connections currently registered with the hub
pub static ACTIVE_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new(
            "websocket_active_connections",
            "Number of active WebSocket connections",
        )
        .namespace("realtime"),
    )
    .expect("Failed to create ACTIVE_CONNECTIONS metric")
});

/// Connections ever registered
pub static TOTAL_CONNECTIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "websocket_total_connections",
            "Total number of WebSocket connections established",
        )
        .namespace("realtime"),
    )
    .expect("Failed to create TOTAL_CONNECTIONS metric")
});

/// Messages enqueued to client outbound queues
pub static MESSAGES_SENT: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "websocket_messages_sent_total",
            "Total number of messages sent to clients",
        )
        .namespace("realtime"),
    )
    .expect("Failed to create MESSAGES_SENT metric")
});

/// Events received from the bus
pub static MESSAGES_RECEIVED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "websocket_messages_received_total",
            "Total number of messages received from Redis Pub/Sub",
        )
        .namespace("realtime"),
    )
    .expect("Failed to create MESSAGES_RECEIVED metric")
});

/// Connections dropped because their outbound queue was full
pub static EVICTIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "websocket_evictions_total",
            "Total number of slow consumers evicted",
        )
        .namespace("realtime"),
    )
    .expect("Failed to create EVICTIONS metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(ACTIVE_CONNECTIONS.clone()))
        .expect("Failed to register ACTIVE_CONNECTIONS");
    registry
        .register(Box::new(TOTAL_CONNECTIONS.clone()))
        .expect("Failed to register TOTAL_CONNECTIONS");
    registry
        .register(Box::new(MESSAGES_SENT.clone()))
        .expect("Failed to register MESSAGES_SENT");
    registry
        .register(Box::new(MESSAGES_RECEIVED.clone()))
        .expect("Failed to register MESSAGES_RECEIVED");
    registry
        .register(Box::new(EVICTIONS.clone()))
        .expect("Failed to register EVICTIONS");

    // CPU, memory and file descriptor usage of this process
    #[cfg(target_os = "linux")]
    registry
        .register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))
        .expect("Failed to register process collector");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn connection_opened() {
    ACTIVE_CONNECTIONS.inc();
    TOTAL_CONNECTIONS.inc();
}

pub fn connection_closed() {
    ACTIVE_CONNECTIONS.dec();
}

pub fn message_received() {
    MESSAGES_RECEIVED.inc();
}

pub fn message_sent() {
    MESSAGES_SENT.inc();
}

pub fn client_evicted() {
    EVICTIONS.inc();
}
