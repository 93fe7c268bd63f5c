//! Canonical market data types and connection status.

use crate::error::CoreError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Message tag used when the payload carries no explicit `type`.
pub const DEFAULT_MESSAGE_TYPE: &str = "tick";

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Transport connection status.
///
/// Exactly one value holds at any time; every transition is announced
/// to listeners as a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionStatus {
    /// All statuses, in declaration order.
    pub const ALL: [ConnectionStatus; 5] = [
        Self::Disconnected,
        Self::Connecting,
        Self::Connected,
        Self::Reconnecting,
        Self::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }

    /// Whether `connect()` may be started from this status.
    pub fn can_connect(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }

    /// Whether live streaming is active.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoreError::InvalidStatus(s.to_string()))
    }
}

/// Canonical market data record produced by the parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedMarketData {
    /// Message tag (e.g. "tick").
    #[serde(rename = "type")]
    pub message_type: String,
    /// Uppercase ticker symbol.
    pub symbol: String,
    /// Last trade price (finite, > 0).
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask: Option<f64>,
    /// Quoted spread; `ask - bid` when not supplied by the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spread: Option<f64>,
    /// Source timestamp in epoch milliseconds.
    pub timestamp: i64,
}

impl ParsedMarketData {
    /// Create a minimal tick record.
    pub fn tick(symbol: impl Into<String>, price: f64, timestamp: i64) -> Self {
        Self {
            message_type: DEFAULT_MESSAGE_TYPE.to_string(),
            symbol: symbol.into(),
            price,
            volume: None,
            bid: None,
            ask: None,
            spread: None,
            timestamp,
        }
    }

    /// Spread recomputed from bid/ask, if both sides are present.
    pub fn derived_spread(&self) -> Option<f64> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }
}

/// Market data message delivered to stream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDataMessage {
    #[serde(flatten)]
    pub data: ParsedMarketData,
    /// Observed delivery latency (`received_at - timestamp`, clamped at zero).
    pub latency_ms: f64,
    /// Local receive time in epoch milliseconds.
    pub received_at: i64,
}

impl MarketDataMessage {
    /// Wrap a parsed record, stamping latency against `received_at`.
    pub fn from_parsed(data: ParsedMarketData, received_at: i64) -> Self {
        let latency_ms = received_at.saturating_sub(data.timestamp).max(0) as f64;
        Self {
            data,
            latency_ms,
            received_at,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.data.symbol
    }

    pub fn price(&self) -> f64 {
        self.data.price
    }

    pub fn timestamp(&self) -> i64 {
        self.data.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_and_parse() {
        for status in ConnectionStatus::ALL {
            let parsed: ConnectionStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("ready".parse::<ConnectionStatus>().is_err());
    }

    #[test]
    fn test_status_can_connect() {
        assert!(ConnectionStatus::Disconnected.can_connect());
        assert!(ConnectionStatus::Error.can_connect());
        assert!(!ConnectionStatus::Connecting.can_connect());
        assert!(!ConnectionStatus::Connected.can_connect());
        assert!(!ConnectionStatus::Reconnecting.can_connect());
    }

    #[test]
    fn test_derived_spread() {
        let mut data = ParsedMarketData::tick("AAPL", 150.0, 1_700_000_000_000);
        assert_eq!(data.derived_spread(), None);
        data.bid = Some(149.5);
        data.ask = Some(150.5);
        assert_eq!(data.derived_spread(), Some(1.0));
    }

    #[test]
    fn test_message_latency_is_clamped() {
        let data = ParsedMarketData::tick("AAPL", 150.0, 1_000);
        let msg = MarketDataMessage::from_parsed(data.clone(), 1_050);
        assert_eq!(msg.latency_ms, 50.0);

        // Source clock ahead of local clock
        let msg = MarketDataMessage::from_parsed(data, 900);
        assert_eq!(msg.latency_ms, 0.0);
    }

    #[test]
    fn test_message_serializes_flat() {
        let data = ParsedMarketData::tick("AAPL", 150.0, 1_000);
        let msg = MarketDataMessage::from_parsed(data, 1_010);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "tick");
        assert_eq!(json["symbol"], "AAPL");
        assert_eq!(json["latency_ms"], 10.0);
        assert!(json.get("volume").is_none());
    }
}
