//! Prometheus metrics for tickstream.
//!
//! Covers:
//! - Connection state and reconnections
//! - Feed latency per symbol
//! - Message and parse failure counts
//! - HTTP fallback polling
//! - Connection quality band
//!
//! # Panics
//!
//! Metric registration panics if it fails. That only happens on a duplicate
//! metric name, during static initialization, never at runtime.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    register_int_counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, IntCounter,
    TextEncoder,
};
use tickstream_core::ConnectionStatus;

/// Quality band labels.
const QUALITY_BANDS: [&str; 4] = ["excellent", "good", "fair", "poor"];

/// Stream connection state (1 = connected, 0 = otherwise).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "tickstream_ws_connected",
        "Stream connection state (1=connected)"
    )
    .expect("register tickstream_ws_connected")
});

/// Connection state machine current state.
/// Labels: state (disconnected/connecting/connected/reconnecting/error)
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tickstream_ws_state",
        "Connection state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .expect("register tickstream_ws_state")
});

/// Total reconnections, by triggering reason.
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickstream_ws_reconnect_total",
        "Total stream reconnections",
        &["reason"]
    )
    .expect("register tickstream_ws_reconnect_total")
});

/// Delivery latency in milliseconds.
pub static FEED_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "tickstream_feed_latency_ms",
        "Market data delivery latency in milliseconds",
        &["symbol"],
        vec![1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0]
    )
    .expect("register tickstream_feed_latency_ms")
});

/// Market data messages delivered.
pub static MESSAGES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tickstream_messages_total",
        "Total market data messages delivered"
    )
    .expect("register tickstream_messages_total")
});

/// Inbound payloads rejected by the parser.
pub static PARSE_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tickstream_parse_failures_total",
        "Total inbound payloads rejected by the parser"
    )
    .expect("register tickstream_parse_failures_total")
});

/// HTTP fallback polls by outcome (ok/error).
pub static FALLBACK_POLLS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickstream_fallback_polls_total",
        "Total HTTP fallback polls",
        &["outcome"]
    )
    .expect("register tickstream_fallback_polls_total")
});

/// Current connection quality band (1 = active).
pub static CONNECTION_QUALITY: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tickstream_connection_quality",
        "Connection quality band (1=active, 0=inactive)",
        &["band"]
    )
    .expect("register tickstream_connection_quality")
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record the connection state. Only the active state is set to 1.
    pub fn ws_state_set(status: ConnectionStatus) {
        for s in ConnectionStatus::ALL {
            WS_STATE.with_label_values(&[s.as_str()]).set(0.0);
        }
        WS_STATE.with_label_values(&[status.as_str()]).set(1.0);
        WS_CONNECTED.set(if status.is_live() { 1.0 } else { 0.0 });
    }

    pub fn ws_reconnect(reason: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Record one delivered message and its latency.
    pub fn message_received(symbol: &str, latency_ms: f64) {
        MESSAGES_TOTAL.inc();
        FEED_LATENCY_MS
            .with_label_values(&[symbol])
            .observe(latency_ms);
    }

    /// Add parse failures observed since the last report.
    pub fn parse_failures(count: u64) {
        PARSE_FAILURES_TOTAL.inc_by(count);
    }

    pub fn fallback_poll(ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        FALLBACK_POLLS_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Set the active quality band. Unknown bands clear all.
    pub fn connection_quality(band: &str) {
        for b in QUALITY_BANDS {
            CONNECTION_QUALITY
                .with_label_values(&[b])
                .set(if b == band { 1.0 } else { 0.0 });
        }
    }

    /// Encode every registered metric in Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
