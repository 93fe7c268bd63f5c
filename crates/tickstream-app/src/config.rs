//! Application configuration.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tickstream_core::normalize_symbol;
use tickstream_telemetry::DEFAULT_LOG_FILTER;
use tickstream_ws::backoff::MAX_JITTER_FACTOR;
use tickstream_ws::{BackoffConfig, ConnectionConfig, QualityConfig};

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "TICKSTREAM_CONFIG";

/// Config file used when neither the CLI nor the environment names one.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Streaming endpoint.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// Symbols subscribed on connect.
    #[serde(default)]
    pub symbols: Vec<String>,

    #[serde(default)]
    pub websocket: WsConfig,

    #[serde(default)]
    pub quality: QualityConfig,

    #[serde(default)]
    pub fallback: FallbackConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub printer: PrinterConfig,
}

fn default_ws_url() -> String {
    "ws://127.0.0.1:8080/stream".to_string()
}

/// Reconnection, heartbeat and timeout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Maximum consecutive reconnection attempts (0 = never reconnect).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Base delay for reconnection backoff (ms).
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    /// Backoff cap (ms).
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,

    #[serde(default = "default_jitter")]
    pub jitter: bool,

    /// Jitter as a fraction of the delay. At most 0.10.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,

    /// Idle time before a ping is sent (ms).
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Time allowed for a pong (ms).
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Latency samples kept for the rolling average.
    #[serde(default = "default_latency_window")]
    pub latency_window: usize,
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> bool {
    true
}

fn default_jitter_factor() -> f64 {
    0.05
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_latency_window() -> usize {
    100
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            jitter: default_jitter(),
            jitter_factor: default_jitter_factor(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            latency_window: default_latency_window(),
        }
    }
}

/// HTTP polling used while the stream is down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Snapshot endpoint. Queried with `?symbols=A,B`.
    #[serde(default = "default_fallback_url")]
    pub url: String,

    #[serde(default = "default_fallback_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_fallback_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_fallback_url() -> String {
    "http://127.0.0.1:8080/quotes".to_string()
}

fn default_fallback_interval_ms() -> u64 {
    30_000
}

fn default_fallback_request_timeout_ms() -> u64 {
    10_000
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_fallback_url(),
            interval_ms: default_fallback_interval_ms(),
            request_timeout_ms: default_fallback_request_timeout_ms(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Interval between connection quality reports (ms).
    #[serde(default = "default_quality_report_interval_ms")]
    pub quality_report_interval_ms: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

fn default_quality_report_interval_ms() -> u64 {
    60_000
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            quality_report_interval_ms: default_quality_report_interval_ms(),
        }
    }
}

/// Wire rendering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrinterConfig {
    #[serde(default = "default_price_precision")]
    pub price_precision: usize,
}

fn default_price_precision() -> usize {
    tickstream_feed::DEFAULT_PRICE_PRECISION
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            price_precision: default_price_precision(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            symbols: Vec::new(),
            websocket: WsConfig::default(),
            quality: QualityConfig::default(),
            fallback: FallbackConfig::default(),
            telemetry: TelemetryConfig::default(),
            printer: PrinterConfig::default(),
        }
    }
}

impl AppConfig {
    /// Config path: CLI argument > `TICKSTREAM_CONFIG` > `config/default.toml`.
    pub fn resolve_path(cli: Option<String>) -> String {
        cli.or_else(|| std::env::var(CONFIG_ENV_VAR).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Load configuration, falling back to defaults when the file is missing.
    pub fn load(path: &str) -> AppResult<Self> {
        let config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!(path = %path, "Config file not found, using defaults");
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        Self::from_toml(&content)
    }

    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Reject settings the connection manager cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(AppError::Config(format!(
                "ws_url must use ws:// or wss://, got {:?}",
                self.ws_url
            )));
        }

        for symbol in &self.symbols {
            normalize_symbol(symbol)
                .map_err(|e| AppError::Config(format!("Invalid symbol in config: {e}")))?;
        }

        let ws = &self.websocket;
        if ws.heartbeat_interval_ms == 0 || ws.heartbeat_timeout_ms == 0 {
            return Err(AppError::Config(
                "heartbeat interval and timeout must be positive".to_string(),
            ));
        }
        if ws.connect_timeout_ms == 0 {
            return Err(AppError::Config(
                "connect_timeout_ms must be positive".to_string(),
            ));
        }
        if ws.reconnect_base_delay_ms > ws.reconnect_max_delay_ms {
            return Err(AppError::Config(format!(
                "reconnect_base_delay_ms ({}) exceeds reconnect_max_delay_ms ({})",
                ws.reconnect_base_delay_ms, ws.reconnect_max_delay_ms
            )));
        }
        if !(0.0..=MAX_JITTER_FACTOR).contains(&ws.jitter_factor) {
            return Err(AppError::Config(format!(
                "jitter_factor must be within 0.0..={MAX_JITTER_FACTOR}, got {}",
                ws.jitter_factor
            )));
        }
        if ws.latency_window == 0 {
            return Err(AppError::Config(
                "latency_window must be positive".to_string(),
            ));
        }

        let q = &self.quality;
        if !(q.excellent_score >= q.good_score && q.good_score >= q.fair_score) {
            return Err(AppError::Config(
                "quality scores must satisfy excellent >= good >= fair".to_string(),
            ));
        }

        if self.fallback.enabled {
            if !(self.fallback.url.starts_with("http://")
                || self.fallback.url.starts_with("https://"))
            {
                return Err(AppError::Config(format!(
                    "fallback.url must use http:// or https://, got {:?}",
                    self.fallback.url
                )));
            }
            if self.fallback.interval_ms == 0 {
                return Err(AppError::Config(
                    "fallback.interval_ms must be positive".to_string(),
                ));
            }
        }

        if self.telemetry.quality_report_interval_ms == 0 {
            return Err(AppError::Config(
                "quality_report_interval_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Connection manager settings derived from this config.
    pub fn connection_config(&self) -> ConnectionConfig {
        let ws = &self.websocket;
        ConnectionConfig {
            url: self.ws_url.clone(),
            symbols: self.symbols.clone(),
            max_reconnect_attempts: ws.max_reconnect_attempts,
            backoff: BackoffConfig {
                base_delay_ms: ws.reconnect_base_delay_ms,
                max_delay_ms: ws.reconnect_max_delay_ms,
                jitter: ws.jitter,
                jitter_factor: ws.jitter_factor,
            },
            heartbeat_interval_ms: ws.heartbeat_interval_ms,
            heartbeat_timeout_ms: ws.heartbeat_timeout_ms,
            connect_timeout_ms: ws.connect_timeout_ms,
            latency_window: ws.latency_window,
            quality: self.quality.clone(),
            ..ConnectionConfig::default()
        }
    }
}
