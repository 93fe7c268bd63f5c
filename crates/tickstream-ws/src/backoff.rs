//! Reconnection backoff policy.
//!
//! Exponential backoff with a cap and optional uniform jitter, plus
//! retryable/fatal classification of connection errors.

use crate::error::WsError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound for the jitter factor.
pub const MAX_JITTER_FACTOR: f64 = 0.10;

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay for attempt 0.
    pub base_delay_ms: u64,
    /// Cap applied after exponential growth and after jitter.
    pub max_delay_ms: u64,
    /// Whether to randomize delays.
    pub jitter: bool,
    /// Jitter as a fraction of the delay (±). Clamped to `MAX_JITTER_FACTOR`.
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter: true,
            jitter_factor: 0.05,
        }
    }
}

impl BackoffConfig {
    /// Same config with jitter disabled.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }
}

/// Un-jittered delay: `min(base * 2^attempt, max)`.
pub fn base_delay(attempt: u32, config: &BackoffConfig) -> Duration {
    let exponent = attempt.min(32);
    let delay = config
        .base_delay_ms
        .saturating_mul(1u64 << exponent)
        .min(config.max_delay_ms);
    Duration::from_millis(delay)
}

/// Reconnection delay for `attempt` (0-based).
///
/// With jitter enabled the exponential delay is widened by a uniform
/// factor in `[-jitter_factor, +jitter_factor]`, then capped at
/// `max_delay_ms` again.
pub fn backoff_delay(attempt: u32, config: &BackoffConfig) -> Duration {
    let delay = base_delay(attempt, config);
    if !config.jitter {
        return delay;
    }

    let factor = config.jitter_factor.clamp(0.0, MAX_JITTER_FACTOR);
    if factor == 0.0 {
        return delay;
    }

    let millis = delay.as_millis() as f64;
    let jitter = rand::rng().random_range(-factor..=factor);
    let jittered = (millis * (1.0 + jitter)).round().max(0.0) as u64;
    Duration::from_millis(jittered.min(config.max_delay_ms))
}

/// Decide whether a failed or lost connection should be retried.
///
/// `attempt` is the number of reconnection attempts already made.
pub fn should_reconnect(error: &WsError, attempt: u32, max_attempts: u32) -> bool {
    if attempt >= max_attempts {
        return false;
    }
    !error.is_fatal()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BackoffConfig::default();
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 30_000);
        assert!(config.jitter);
    }

    #[test]
    fn test_exponential_growth_and_cap() {
        let config = BackoffConfig::default().without_jitter();
        assert_eq!(backoff_delay(0, &config), Duration::from_millis(1000));
        assert_eq!(backoff_delay(1, &config), Duration::from_millis(2000));
        assert_eq!(backoff_delay(2, &config), Duration::from_millis(4000));
        assert_eq!(backoff_delay(4, &config), Duration::from_millis(16_000));
        assert_eq!(backoff_delay(5, &config), Duration::from_millis(30_000));
        assert_eq!(backoff_delay(100, &config), Duration::from_millis(30_000));
    }

    #[test]
    fn test_delay_non_decreasing_without_jitter() {
        let config = BackoffConfig::default().without_jitter();
        let mut previous = Duration::ZERO;
        for attempt in 0..40 {
            let delay = backoff_delay(attempt, &config);
            assert!(delay >= previous, "attempt {attempt}");
            previous = delay;
        }
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let config = BackoffConfig::default();
        for attempt in 0..10 {
            let nominal = 1000f64 * 2f64.powi(attempt as i32);
            for _ in 0..200 {
                let delay = backoff_delay(attempt, &config).as_millis() as f64;
                if nominal <= config.max_delay_ms as f64 {
                    assert!(delay >= (nominal * 0.95).floor(), "attempt {attempt}: {delay}");
                    assert!(
                        delay <= (nominal * 1.05).ceil().min(config.max_delay_ms as f64),
                        "attempt {attempt}: {delay}"
                    );
                } else {
                    assert!(delay <= config.max_delay_ms as f64);
                }
            }
        }
    }

    #[test]
    fn test_jitter_factor_is_clamped() {
        let config = BackoffConfig {
            jitter_factor: 0.9,
            max_delay_ms: u64::MAX,
            ..Default::default()
        };
        for _ in 0..200 {
            let delay = backoff_delay(3, &config).as_millis() as f64;
            assert!((7200.0..=8800.0).contains(&delay), "{delay}");
        }
    }

    #[test]
    fn test_should_reconnect() {
        let transport = WsError::ConnectionFailed("refused".into());
        assert!(should_reconnect(&transport, 0, 5));
        assert!(should_reconnect(&transport, 4, 5));
        assert!(!should_reconnect(&transport, 5, 5));
        assert!(!should_reconnect(&transport, 0, 0));

        let auth = WsError::Unauthorized("403".into());
        assert!(!should_reconnect(&auth, 0, 5));
    }
}
