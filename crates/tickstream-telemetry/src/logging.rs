//! Structured logging initialization.

use crate::error::{TelemetryError, TelemetryResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither `RUST_LOG` nor a configured level is set.
pub const DEFAULT_LOG_FILTER: &str = "info,tickstream=debug";

/// Initialize logging with the default filter.
pub fn init_logging() -> TelemetryResult<()> {
    init_logging_with(DEFAULT_LOG_FILTER)
}

/// Initialize structured logging.
///
/// `RUST_LOG` overrides `default_filter`. Output is JSON when
/// `RUST_ENV=production`, pretty otherwise. Fails if a global subscriber
/// is already installed.
pub fn init_logging_with(default_filter: &str) -> TelemetryResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;

    let is_production = std::env::var("RUST_ENV")
        .map(|v| v == "production")
        .unwrap_or(false);

    let result = if is_production {
        // JSON format for production
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()
    } else {
        // Pretty format for development
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_names(true),
            )
            .try_init()
    };

    result.map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // The first call may race with other tests; only the second must fail.
        let _ = init_logging();
        assert!(matches!(
            init_logging_with("debug"),
            Err(TelemetryError::LoggingInit(_))
        ));
    }
}
