//! Prometheus metrics and structured logging for tickstream.
//!
//! - Prometheus metrics for connection state, feed latency, parse
//!   failures, fallback polling and connection quality
//! - Structured logging with tracing (JSON in production)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{init_logging, init_logging_with, DEFAULT_LOG_FILTER};
pub use metrics::Metrics;
