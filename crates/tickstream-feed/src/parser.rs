//! Message parsing for market data.
//!
//! Validates raw WebSocket payloads into canonical `ParsedMarketData`
//! records. Validation never short-circuits: every failing field is
//! reported with its path, error kind and the offending raw value.
//!
//! Accepted shape:
//! `{"type": "tick", "symbol": "AAPL", "price": 150.25, "volume": 1200,
//!   "bid": 150.2, "ask": 150.3, "spread": 0.1, "timestamp": 1700000000000}`
//!
//! Numeric fields may also arrive as strings (e.g. `"150.25"`), and the
//! timestamp may be an RFC 3339 string.

use chrono::DateTime;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tickstream_core::{ParsedMarketData, DEFAULT_MESSAGE_TYPE};
use tracing::debug;

/// Largest accepted timestamp (9999-12-31T23:59:59.999Z).
const MAX_TIMESTAMP_MS: i64 = 253_402_300_799_999;

/// Largest float that still represents every integer exactly.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Kind of field-level validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorKind {
    /// Payload is not valid JSON.
    InvalidJson,
    /// Payload is valid JSON but not an object.
    NotAnObject,
    /// Required field is absent or null.
    Missing,
    /// Field has the wrong JSON type (or an unparseable numeric string).
    InvalidType,
    /// String field is empty after trimming.
    Empty,
    /// Numeric field is NaN or infinite.
    NonFinite,
    /// Numeric field must be strictly positive.
    NonPositive,
    /// Numeric field must not be negative.
    Negative,
    /// Numeric field must be an integer.
    NotInteger,
    /// Ask below bid.
    CrossedQuote,
    /// Timestamp is not a usable epoch-millisecond value.
    InvalidTimestamp,
}

impl ParseErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid_json",
            Self::NotAnObject => "not_an_object",
            Self::Missing => "missing",
            Self::InvalidType => "invalid_type",
            Self::Empty => "empty",
            Self::NonFinite => "non_finite",
            Self::NonPositive => "non_positive",
            Self::Negative => "negative",
            Self::NotInteger => "not_integer",
            Self::CrossedQuote => "crossed_quote",
            Self::InvalidTimestamp => "invalid_timestamp",
        }
    }
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseError {
    /// Field path (e.g. "price").
    pub field: String,
    pub kind: ParseErrorKind,
    /// Offending raw value (`null` when missing).
    pub value: Value,
}

impl ParseError {
    fn new(field: &str, kind: ParseErrorKind, value: &Value) -> Self {
        Self {
            field: field.to_string(),
            kind,
            value: value.clone(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} (value: {})", self.field, self.kind, self.value)
    }
}

/// Snapshot of running parser statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParserStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    /// Error occurrences per kind across all failed parses.
    pub failures_by_kind: BTreeMap<ParseErrorKind, u64>,
}

impl ParserStats {
    /// Fraction of attempts that succeeded (1.0 when nothing was parsed yet).
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            return 1.0;
        }
        self.successes as f64 / self.attempts as f64
    }
}

/// Result of a single parse call.
#[derive(Debug, Clone)]
pub struct ParseResult {
    pub success: bool,
    pub data: Option<ParsedMarketData>,
    pub errors: Vec<ParseError>,
    /// Parser statistics after this call.
    pub stats: ParserStats,
}

impl ParseResult {
    /// Errors reported for one field.
    pub fn errors_for<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a ParseError> + 'a {
        self.errors.iter().filter(move |e| e.field == field)
    }

    /// Distinct fields that failed, in report order.
    pub fn failed_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::new();
        for error in &self.errors {
            if !fields.contains(&error.field.as_str()) {
                fields.push(&error.field);
            }
        }
        fields
    }
}

/// Message parser.
///
/// Holds running statistics; parsing takes `&self` so a single parser can
/// be shared across tasks.
#[derive(Debug, Default)]
pub struct MessageParser {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    failures_by_kind: Mutex<BTreeMap<ParseErrorKind, u64>>,
}

impl MessageParser {
    /// Create a new message parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw text frame.
    pub fn parse_str(&self, raw: &str) -> ParseResult {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => self.parse(&value),
            Err(e) => {
                debug!(error = %e, "Payload is not valid JSON");
                let errors = vec![ParseError::new(
                    "payload",
                    ParseErrorKind::InvalidJson,
                    &Value::String(raw.to_string()),
                )];
                self.finish(None, errors)
            }
        }
    }

    /// Validate and normalize a raw payload.
    pub fn parse(&self, raw: &Value) -> ParseResult {
        let Some(obj) = raw.as_object() else {
            let errors = vec![ParseError::new("payload", ParseErrorKind::NotAnObject, raw)];
            return self.finish(None, errors);
        };

        let mut errors = Vec::new();

        let message_type = parse_message_type(obj, &mut errors);
        let symbol = parse_symbol(obj, &mut errors);
        let price = parse_price(obj, &mut errors);
        let volume = parse_volume(obj, &mut errors);
        let (bid, ask, spread) = parse_quote(obj, &mut errors);
        let timestamp = parse_timestamp(obj, &mut errors);

        let data = match (symbol, price, timestamp) {
            (Some(symbol), Some(price), Some(timestamp)) if errors.is_empty() => {
                Some(ParsedMarketData {
                    message_type,
                    symbol,
                    price,
                    volume,
                    bid,
                    ask,
                    spread,
                    timestamp,
                })
            }
            _ => None,
        };

        self.finish(data, errors)
    }

    /// Get a snapshot of parser statistics.
    pub fn stats(&self) -> ParserStats {
        ParserStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            failures_by_kind: self.failures_by_kind.lock().clone(),
        }
    }

    /// Reset parser statistics.
    pub fn reset_stats(&self) {
        self.attempts.store(0, Ordering::Relaxed);
        self.successes.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.failures_by_kind.lock().clear();
    }

    fn finish(&self, data: Option<ParsedMarketData>, errors: Vec<ParseError>) -> ParseResult {
        self.attempts.fetch_add(1, Ordering::Relaxed);

        let success = data.is_some();
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
            let mut by_kind = self.failures_by_kind.lock();
            for error in &errors {
                *by_kind.entry(error.kind).or_insert(0) += 1;
            }
            debug!(
                error_count = errors.len(),
                fields = ?errors.iter().map(|e| e.field.as_str()).collect::<Vec<_>>(),
                "Market data rejected"
            );
        }

        ParseResult {
            success,
            data,
            errors,
            stats: self.stats(),
        }
    }
}

/// Field lookup treating JSON null as absent.
fn field<'a>(obj: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    obj.get(name).filter(|v| !v.is_null())
}

/// Interpret a JSON number or numeric string as f64.
fn as_number(value: &Value) -> Result<f64, ParseErrorKind> {
    let n = match value {
        Value::Number(n) => n.as_f64().ok_or(ParseErrorKind::InvalidType)?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ParseErrorKind::InvalidType)?,
        _ => return Err(ParseErrorKind::InvalidType),
    };
    if !n.is_finite() {
        return Err(ParseErrorKind::NonFinite);
    }
    Ok(n)
}

fn parse_message_type(obj: &Map<String, Value>, errors: &mut Vec<ParseError>) -> String {
    match field(obj, "type") {
        None => DEFAULT_MESSAGE_TYPE.to_string(),
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(v @ Value::String(_)) => {
            errors.push(ParseError::new("type", ParseErrorKind::Empty, v));
            DEFAULT_MESSAGE_TYPE.to_string()
        }
        Some(v) => {
            errors.push(ParseError::new("type", ParseErrorKind::InvalidType, v));
            DEFAULT_MESSAGE_TYPE.to_string()
        }
    }
}

fn parse_symbol(obj: &Map<String, Value>, errors: &mut Vec<ParseError>) -> Option<String> {
    match field(obj, "symbol") {
        None => {
            errors.push(ParseError::new("symbol", ParseErrorKind::Missing, &Value::Null));
            None
        }
        Some(Value::String(s)) => match tickstream_core::normalize_symbol(s) {
            Ok(symbol) => Some(symbol),
            Err(_) => {
                errors.push(ParseError::new(
                    "symbol",
                    ParseErrorKind::Empty,
                    &Value::String(s.clone()),
                ));
                None
            }
        },
        Some(v) => {
            errors.push(ParseError::new("symbol", ParseErrorKind::InvalidType, v));
            None
        }
    }
}

fn parse_price(obj: &Map<String, Value>, errors: &mut Vec<ParseError>) -> Option<f64> {
    let Some(raw) = field(obj, "price") else {
        errors.push(ParseError::new("price", ParseErrorKind::Missing, &Value::Null));
        return None;
    };
    match as_number(raw) {
        Ok(price) if price > 0.0 => Some(price),
        Ok(_) => {
            errors.push(ParseError::new("price", ParseErrorKind::NonPositive, raw));
            None
        }
        Err(kind) => {
            errors.push(ParseError::new("price", kind, raw));
            None
        }
    }
}

fn parse_volume(obj: &Map<String, Value>, errors: &mut Vec<ParseError>) -> Option<u64> {
    let raw = field(obj, "volume")?;

    if let Some(v) = raw.as_u64() {
        return Some(v);
    }

    let kind = match as_number(raw) {
        Ok(v) if v < 0.0 => ParseErrorKind::Negative,
        Ok(v) if v.fract() != 0.0 => ParseErrorKind::NotInteger,
        Ok(v) if v <= MAX_EXACT_INTEGER => return Some(v as u64),
        Ok(_) => ParseErrorKind::InvalidType,
        Err(kind) => kind,
    };
    errors.push(ParseError::new("volume", kind, raw));
    None
}

/// Parse bid/ask/spread. Returns (bid, ask, spread).
fn parse_quote(
    obj: &Map<String, Value>,
    errors: &mut Vec<ParseError>,
) -> (Option<f64>, Option<f64>, Option<f64>) {
    let mut side = |name: &str| -> Option<f64> {
        let raw = field(obj, name)?;
        match as_number(raw) {
            Ok(v) => Some(v),
            Err(kind) => {
                errors.push(ParseError::new(name, kind, raw));
                None
            }
        }
    };
    let bid = side("bid");
    let ask = side("ask");

    if let (Some(b), Some(a)) = (bid, ask) {
        if a < b {
            let raw = field(obj, "ask").cloned().unwrap_or(Value::Null);
            errors.push(ParseError::new("ask", ParseErrorKind::CrossedQuote, &raw));
        }
    }

    let spread = match field(obj, "spread") {
        Some(raw) => match as_number(raw) {
            Ok(v) if v >= 0.0 => Some(v),
            Ok(_) => {
                errors.push(ParseError::new("spread", ParseErrorKind::Negative, raw));
                None
            }
            Err(kind) => {
                errors.push(ParseError::new("spread", kind, raw));
                None
            }
        },
        None => match (bid, ask) {
            (Some(b), Some(a)) if a >= b => Some(a - b),
            _ => None,
        },
    };

    (bid, ask, spread)
}

fn parse_timestamp(obj: &Map<String, Value>, errors: &mut Vec<ParseError>) -> Option<i64> {
    let Some(raw) = field(obj, "timestamp") else {
        errors.push(ParseError::new("timestamp", ParseErrorKind::Missing, &Value::Null));
        return None;
    };

    let millis = match raw {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|v| v.fract() == 0.0 && v.abs() <= MAX_EXACT_INTEGER)
                .map(|v| v as i64)
        }),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.timestamp_millis())
            })
        }
        _ => None,
    };

    match millis {
        Some(ms) if (0..=MAX_TIMESTAMP_MS).contains(&ms) => Some(ms),
        _ => {
            errors.push(ParseError::new(
                "timestamp",
                ParseErrorKind::InvalidTimestamp,
                raw,
            ));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tickstream_core::now_ms;

    #[test]
    fn test_parse_minimal_tick_normalizes_symbol() {
        let parser = MessageParser::new();
        let now = now_ms();
        let result = parser.parse(&json!({"symbol": "aapl", "price": 150.0, "timestamp": now}));

        assert!(result.success, "errors: {:?}", result.errors);
        let data = result.data.unwrap();
        assert_eq!(data.symbol, "AAPL");
        assert_eq!(data.price, 150.0);
        assert_eq!(data.timestamp, now);
        assert_eq!(data.message_type, "tick");
        assert!(data.volume.is_none());
        assert!(data.spread.is_none());
    }

    #[test]
    fn test_parse_reports_all_required_failures() {
        let parser = MessageParser::new();
        let result = parser.parse(&json!({"symbol": "", "price": -1, "timestamp": now_ms()}));

        assert!(!result.success);
        assert!(result.data.is_none());
        assert_eq!(result.failed_fields(), vec!["symbol", "price"]);
        assert_eq!(
            result.errors_for("symbol").next().unwrap().kind,
            ParseErrorKind::Empty
        );
        let price_error = result.errors_for("price").next().unwrap();
        assert_eq!(price_error.kind, ParseErrorKind::NonPositive);
        assert_eq!(price_error.value, json!(-1));
    }

    #[test]
    fn test_parse_missing_fields() {
        let parser = MessageParser::new();
        let result = parser.parse(&json!({"volume": 10}));

        assert!(!result.success);
        assert_eq!(result.failed_fields(), vec!["symbol", "price", "timestamp"]);
        assert!(result
            .errors
            .iter()
            .all(|e| e.kind == ParseErrorKind::Missing && e.value.is_null()));
    }

    #[test]
    fn test_parse_derives_spread() {
        let parser = MessageParser::new();
        let result = parser.parse(&json!({
            "symbol": "MSFT",
            "price": 410.5,
            "bid": 410.25,
            "ask": 410.75,
            "timestamp": 1_700_000_000_000i64
        }));

        let data = result.data.unwrap();
        assert_eq!(data.spread, Some(0.5));
    }

    #[test]
    fn test_parse_keeps_supplied_spread() {
        let parser = MessageParser::new();
        let result = parser.parse(&json!({
            "symbol": "MSFT",
            "price": 410.5,
            "bid": 410.25,
            "ask": 410.75,
            "spread": 0.6,
            "timestamp": 1_700_000_000_000i64
        }));

        assert_eq!(result.data.unwrap().spread, Some(0.6));
    }

    #[test]
    fn test_parse_rejects_crossed_quote() {
        let parser = MessageParser::new();
        let result = parser.parse(&json!({
            "symbol": "MSFT",
            "price": 410.5,
            "bid": 411.0,
            "ask": 410.0,
            "timestamp": 1_700_000_000_000i64
        }));

        assert!(!result.success);
        let error = result.errors_for("ask").next().unwrap();
        assert_eq!(error.kind, ParseErrorKind::CrossedQuote);
        assert_eq!(error.value, json!(410.0));
    }

    #[test]
    fn test_optional_field_violation_fails_parse() {
        let parser = MessageParser::new();
        let result = parser.parse(&json!({
            "symbol": "AAPL",
            "price": 150.0,
            "volume": 12.5,
            "timestamp": 1_700_000_000_000i64
        }));

        assert!(!result.success);
        assert_eq!(result.failed_fields(), vec!["volume"]);
        assert_eq!(result.errors[0].kind, ParseErrorKind::NotInteger);

        let result = parser.parse(&json!({
            "symbol": "AAPL",
            "price": 150.0,
            "volume": -3,
            "timestamp": 1_700_000_000_000i64
        }));
        assert_eq!(result.errors[0].kind, ParseErrorKind::Negative);
    }

    #[test]
    fn test_parse_accepts_numeric_strings() {
        let parser = MessageParser::new();
        let result = parser.parse(&json!({
            "symbol": "btc-usd",
            "price": "50000.50",
            "volume": "12",
            "timestamp": "1700000000000"
        }));

        let data = result.data.unwrap();
        assert_eq!(data.symbol, "BTC-USD");
        assert_eq!(data.price, 50000.5);
        assert_eq!(data.volume, Some(12));
        assert_eq!(data.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn test_parse_accepts_rfc3339_timestamp() {
        let parser = MessageParser::new();
        let result = parser.parse(&json!({
            "symbol": "AAPL",
            "price": 1.0,
            "timestamp": "2023-11-14T22:13:20Z"
        }));

        assert_eq!(result.data.unwrap().timestamp, 1_700_000_000_000);
    }

    #[test]
    fn test_parse_rejects_bad_timestamp() {
        let parser = MessageParser::new();
        for ts in [json!(-5), json!("yesterday"), json!(true), json!(1.5)] {
            let result = parser.parse(&json!({"symbol": "AAPL", "price": 1.0, "timestamp": ts}));
            assert!(!result.success);
            assert_eq!(
                result.errors[0].kind,
                ParseErrorKind::InvalidTimestamp,
                "timestamp {ts}"
            );
        }
    }

    #[test]
    fn test_parse_tolerates_out_of_order_timestamps() {
        let parser = MessageParser::new();
        let later = parser.parse(&json!({"symbol": "AAPL", "price": 1.0, "timestamp": 2_000}));
        let earlier = parser.parse(&json!({"symbol": "AAPL", "price": 1.0, "timestamp": 1_000}));
        let duplicate = parser.parse(&json!({"symbol": "AAPL", "price": 1.0, "timestamp": 1_000}));

        assert!(later.success && earlier.success && duplicate.success);
    }

    #[test]
    fn test_parse_non_finite_string_price() {
        let parser = MessageParser::new();
        let result = parser.parse(&json!({"symbol": "AAPL", "price": "NaN", "timestamp": 1}));
        assert_eq!(result.errors[0].kind, ParseErrorKind::NonFinite);
    }

    #[test]
    fn test_parse_wrong_types() {
        let parser = MessageParser::new();
        let result = parser.parse(&json!({
            "type": 7,
            "symbol": 42,
            "price": [1],
            "timestamp": 1
        }));

        assert_eq!(result.failed_fields(), vec!["type", "symbol", "price"]);
        assert!(result
            .errors
            .iter()
            .all(|e| e.kind == ParseErrorKind::InvalidType));
    }

    #[test]
    fn test_parse_str_invalid_json() {
        let parser = MessageParser::new();
        let result = parser.parse_str("{not json");
        assert!(!result.success);
        assert_eq!(result.errors[0].kind, ParseErrorKind::InvalidJson);

        let result = parser.parse_str("[1, 2]");
        assert_eq!(result.errors[0].kind, ParseErrorKind::NotAnObject);
    }

    #[test]
    fn test_stats_accumulate_and_reset() {
        let parser = MessageParser::new();
        let _ = parser.parse(&json!({"symbol": "AAPL", "price": 1.0, "timestamp": 1}));
        let _ = parser.parse(&json!({"symbol": "", "price": -1, "timestamp": 1}));
        let result = parser.parse_str("oops");

        let stats = result.stats;
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.failures_by_kind[&ParseErrorKind::Empty], 1);
        assert_eq!(stats.failures_by_kind[&ParseErrorKind::NonPositive], 1);
        assert_eq!(stats.failures_by_kind[&ParseErrorKind::InvalidJson], 1);
        assert_eq!(parser.stats(), stats);

        parser.reset_stats();
        let stats = parser.stats();
        assert_eq!(stats, ParserStats::default());
        assert_eq!(stats.success_rate(), 1.0);
    }
}
