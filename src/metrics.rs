//! Prometheus metrics collection for synckit-server.
//!
//! Exposes server health, operation throughput, and sync-state gauges on a
//! `/metrics` endpoint.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

lazy_static! {
    /// Global Prometheus registry for all metrics.
    pub static ref REGISTRY: Registry = Registry::new();

    // ========================================================================
    // Counters (monotonic increasing)
    // ========================================================================

    /// Total operations applied to the authoritative server state.
    pub static ref OPS_APPLIED: IntCounter = IntCounter::new(
        "synckit_ops_applied_total",
        "Total operations applied to server-side document state"
    ).unwrap();

    /// Total operations rejected for a permission failure.
    pub static ref OPS_UNAUTHORIZED: IntCounter = IntCounter::new(
        "synckit_ops_unauthorized_total",
        "Operations rejected by AuthGuard"
    ).unwrap();

    /// Total operations discarded for being malformed (non-structural).
    pub static ref OPS_MALFORMED: IntCounter = IntCounter::new(
        "synckit_ops_malformed_total",
        "Operations discarded as malformed"
    ).unwrap();

    /// Total connections closed for a structural protocol violation.
    pub static ref PROTOCOL_ERRORS: IntCounter = IntCounter::new(
        "synckit_protocol_errors_total",
        "Connections closed for structural protocol errors"
    ).unwrap();

    /// Total awareness updates discarded for a stale clock.
    pub static ref AWARENESS_STALE_DROPPED: IntCounter = IntCounter::new(
        "synckit_awareness_stale_dropped_total",
        "Awareness updates discarded for a stale clock"
    ).unwrap();

    // ========================================================================
    // Gauges (can increase/decrease)
    // ========================================================================

    /// Currently connected clients.
    pub static ref CONNECTED_CLIENTS: IntGauge = IntGauge::new(
        "synckit_connected_clients",
        "Currently connected clients"
    ).unwrap();

    /// Documents with at least one active subscriber.
    pub static ref ACTIVE_DOCUMENTS: IntGauge = IntGauge::new(
        "synckit_active_documents",
        "Documents with at least one active subscriber"
    ).unwrap();

    /// Total operations currently buffered across all offline queues.
    pub static ref OFFLINE_QUEUE_SIZE: IntGauge = IntGauge::new(
        "synckit_offline_queue_size",
        "Operations buffered in offline queues, summed across connections"
    ).unwrap();
}

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at server startup before any metrics are recorded.
pub fn init() {
    REGISTRY.register(Box::new(OPS_APPLIED.clone())).unwrap();
    REGISTRY.register(Box::new(OPS_UNAUTHORIZED.clone())).unwrap();
    REGISTRY.register(Box::new(OPS_MALFORMED.clone())).unwrap();
    REGISTRY.register(Box::new(PROTOCOL_ERRORS.clone())).unwrap();
    REGISTRY.register(Box::new(AWARENESS_STALE_DROPPED.clone())).unwrap();
    REGISTRY.register(Box::new(CONNECTED_CLIENTS.clone())).unwrap();
    REGISTRY.register(Box::new(ACTIVE_DOCUMENTS.clone())).unwrap();
    REGISTRY.register(Box::new(OFFLINE_QUEUE_SIZE.clone())).unwrap();
}

/// Gather all metrics and encode them in Prometheus text format.
///
/// Returns a string suitable for HTTP response on a `/metrics` endpoint.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Record a successfully-applied operation (called by [`crate::telemetry::SyncOpTimer`]
/// on drop).
pub fn record_operation(_kind: &str, _duration_secs: f64) {
    OPS_APPLIED.inc();
}

/// Record an operation that failed with `error_code`.
pub fn record_operation_error(error_code: &str) {
    match error_code {
        "unauthorized" => OPS_UNAUTHORIZED.inc(),
        "protocol_error" => PROTOCOL_ERRORS.inc(),
        _ => OPS_MALFORMED.inc(),
    }
}

/// Record the current offline-queue depth for one connection. Callers sum
/// deltas across connections; this gauge tracks the running total.
pub fn record_queue_depth(delta: i64) {
    OFFLINE_QUEUE_SIZE.add(delta);
}
