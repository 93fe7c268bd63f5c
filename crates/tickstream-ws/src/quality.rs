//! Latency tracking and connection quality scoring.
//!
//! Pure functions over `LatencyMetrics` / `ConnectionMetrics`; the
//! connection manager owns the state and calls these on every message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tickstream_core::{now_ms, MarketDataMessage};

/// Default size of the rolling latency window.
pub const DEFAULT_MAX_SAMPLES: usize = 100;

/// Default maximum acceptable delivery latency.
pub const DEFAULT_MAX_LATENCY_MS: i64 = 200;

/// Rolling latency statistics.
///
/// `average` covers the retained window only; `min`/`max` are lifetime
/// extrema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyMetrics {
    pub current: f64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub samples: VecDeque<f64>,
}

/// Connection-level metrics owned by the connection manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    /// Time of the last successful connect (None until first connect).
    pub connection_time: Option<DateTime<Utc>>,
    /// Lifetime reconnection attempts.
    pub reconnect_count: u32,
    pub total_messages: u64,
    pub parse_failures: u64,
    pub latency: LatencyMetrics,
    /// Whether a session is currently live; uptime is zero otherwise.
    pub connected: bool,
}

impl ConnectionMetrics {
    /// Time since the last successful connect while connected.
    pub fn uptime(&self) -> Duration {
        self.uptime_at(Utc::now())
    }

    pub fn uptime_at(&self, now: DateTime<Utc>) -> Duration {
        match self.connection_time {
            Some(since) if self.connected => (now - since).to_std().unwrap_or(Duration::ZERO),
            _ => Duration::ZERO,
        }
    }
}

/// Append a latency sample and recompute statistics.
pub fn update_latency_metrics(
    current: &LatencyMetrics,
    sample: f64,
    max_samples: usize,
) -> LatencyMetrics {
    let sample = if sample.is_finite() { sample.max(0.0) } else { 0.0 };
    let first = current.samples.is_empty() && current.max == 0.0 && current.min == 0.0;

    let mut samples = current.samples.clone();
    samples.push_back(sample);
    while samples.len() > max_samples.max(1) {
        samples.pop_front();
    }

    let average = samples.iter().sum::<f64>() / samples.len() as f64;
    let (min, max) = if first {
        (sample, sample)
    } else {
        (current.min.min(sample), current.max.max(sample))
    };

    LatencyMetrics {
        current: sample,
        // Keep the documented ordering exact despite float summation error.
        average: average.clamp(min, max),
        min,
        max,
        samples,
    }
}

/// Connection quality band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl ConnectionQuality {
    pub const ALL: [ConnectionQuality; 4] = [Self::Excellent, Self::Good, Self::Fair, Self::Poor];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
        }
    }
}

impl std::fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quality scoring parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Latency thresholds (ms) and penalties, checked highest first.
    pub high_latency_ms: f64,
    pub high_latency_penalty: f64,
    pub elevated_latency_ms: f64,
    pub elevated_latency_penalty: f64,
    pub mild_latency_ms: f64,
    pub mild_latency_penalty: f64,
    /// Penalty per reconnect, and its cap.
    pub reconnect_penalty: f64,
    pub max_reconnect_penalty: f64,
    /// Uptime at which the uptime factor reaches 1.0.
    pub uptime_baseline_secs: u64,
    /// Band thresholds.
    pub excellent_score: f64,
    pub good_score: f64,
    pub fair_score: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            high_latency_ms: 200.0,
            high_latency_penalty: 30.0,
            elevated_latency_ms: 100.0,
            elevated_latency_penalty: 15.0,
            mild_latency_ms: 50.0,
            mild_latency_penalty: 5.0,
            reconnect_penalty: 10.0,
            max_reconnect_penalty: 40.0,
            uptime_baseline_secs: 24 * 60 * 60,
            excellent_score: 90.0,
            good_score: 75.0,
            fair_score: 50.0,
        }
    }
}

/// Raw quality score in `[0, 100]`.
pub fn connection_score(metrics: &ConnectionMetrics, uptime: Duration, config: &QualityConfig) -> f64 {
    let mut score = 100.0;

    let avg = metrics.latency.average;
    if avg > config.high_latency_ms {
        score -= config.high_latency_penalty;
    } else if avg > config.elevated_latency_ms {
        score -= config.elevated_latency_penalty;
    } else if avg > config.mild_latency_ms {
        score -= config.mild_latency_penalty;
    }

    score -= (metrics.reconnect_count as f64 * config.reconnect_penalty)
        .min(config.max_reconnect_penalty);

    let baseline = config.uptime_baseline_secs.max(1) as f64;
    let uptime_factor = (uptime.as_secs_f64() / baseline).min(1.0);
    score *= uptime_factor;

    score.clamp(0.0, 100.0)
}

/// Map a score to its band.
pub fn quality_band(score: f64, config: &QualityConfig) -> ConnectionQuality {
    if score >= config.excellent_score {
        ConnectionQuality::Excellent
    } else if score >= config.good_score {
        ConnectionQuality::Good
    } else if score >= config.fair_score {
        ConnectionQuality::Fair
    } else {
        ConnectionQuality::Poor
    }
}

/// Score connection health from latency, reconnects and uptime.
pub fn calculate_connection_quality(
    metrics: &ConnectionMetrics,
    config: &QualityConfig,
) -> ConnectionQuality {
    let score = connection_score(metrics, metrics.uptime(), config);
    quality_band(score, config)
}

/// Whether a message arrived within `max_latency_ms` of its source timestamp.
pub fn validate_latency(message: &MarketDataMessage, max_latency_ms: i64) -> bool {
    validate_latency_at(message, max_latency_ms, now_ms())
}

pub fn validate_latency_at(message: &MarketDataMessage, max_latency_ms: i64, now: i64) -> bool {
    now.saturating_sub(message.timestamp()) <= max_latency_ms
}
