//! Prometheus metrics for chart-sync.
//!
//! Covers:
//! - Connection state and reconnects
//! - Session generations
//! - Message outcomes through dedup and dispatch
//! - Render coordinator outcomes and latency
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, a programming error that should crash at
//! startup. These panics only occur during static initialization.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_gauge, register_histogram, register_int_counter_vec, register_int_gauge, Encoder,
    Gauge, Histogram, IntCounterVec, IntGauge, TextEncoder,
};

/// WebSocket connection state (1 = connected, 0 = disconnected).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "csync_ws_connected",
        "WebSocket connection state (1=connected)"
    )
    .unwrap()
});

/// Reconnect attempts after abnormal closes.
pub static WS_RECONNECT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "csync_ws_reconnect_total",
        "Total WebSocket reconnection attempts",
        &["reason"]
    )
    .unwrap()
});

/// Current session generation.
pub static SESSION_GENERATION: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("csync_session_generation", "Current session generation").unwrap()
});

/// Inbound messages by kind and outcome
/// (applied/duplicate/malformed/stale/rejected/failed).
pub static MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "csync_messages_total",
        "Inbound messages by kind and outcome",
        &["kind", "outcome"]
    )
    .unwrap()
});

/// Items waiting in the dispatch queue.
pub static DISPATCH_QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "csync_dispatch_queue_depth",
        "Items waiting in the dispatch queue"
    )
    .unwrap()
});

/// Points in the current dataset.
pub static DATASET_POINTS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("csync_dataset_points", "Points in the current dataset").unwrap()
});

/// Render attempts by outcome (ok/error/panic/parked).
pub static RENDER_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "csync_render_total",
        "Render attempts by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Render duration in milliseconds.
pub static RENDER_DURATION_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "csync_render_duration_ms",
        "Render duration in milliseconds",
        vec![1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 250.0, 500.0, 1000.0]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    // =========================================================================
    // Connection
    // =========================================================================

    /// Record WebSocket connected.
    pub fn ws_connected() {
        WS_CONNECTED.set(1.0);
    }

    /// Record WebSocket disconnected.
    pub fn ws_disconnected() {
        WS_CONNECTED.set(0.0);
    }

    /// Record a reconnect attempt.
    pub fn ws_reconnect(reason: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn session_generation(generation: u64) {
        SESSION_GENERATION.set(i64::try_from(generation).unwrap_or(i64::MAX));
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Record the outcome of one inbound message.
    pub fn message(kind: &str, outcome: &str) {
        MESSAGES_TOTAL.with_label_values(&[kind, outcome]).inc();
    }

    pub fn queue_depth(depth: usize) {
        DISPATCH_QUEUE_DEPTH.set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    pub fn dataset_points(points: usize) {
        DATASET_POINTS.set(i64::try_from(points).unwrap_or(i64::MAX));
    }

    // =========================================================================
    // Render
    // =========================================================================

    /// Record a render outcome.
    pub fn render(outcome: &str) {
        RENDER_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn render_duration(duration_ms: f64) {
        RENDER_DURATION_MS.observe(duration_ms);
    }

    /// Render every registered metric in the text exposition format.
    pub fn gather_text() -> TelemetryResult<String> {
        let families = prometheus::gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}
