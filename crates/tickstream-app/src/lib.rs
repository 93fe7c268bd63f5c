//! tickstream application.
//!
//! Wires the stream connection manager to its surroundings:
//! - TOML configuration
//! - Prometheus metrics from connection events
//! - HTTP fallback polling while the stream is down
//! - Periodic connection quality reports

pub mod app;
pub mod config;
pub mod error;
pub mod fallback;

pub use app::{Application, RunSummary};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use fallback::{FallbackController, FallbackPoller, SymbolSource};
