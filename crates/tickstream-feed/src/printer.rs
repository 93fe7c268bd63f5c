//! Canonical wire rendering for market data and round-trip validation.
//!
//! Records are rendered as a JSON object with a fixed field order
//! (`type, symbol, price, volume, bid, ask, spread, timestamp`) and fixed
//! decimal precision for price-like fields, so the same record always
//! produces byte-identical output.

use crate::error::{FeedError, FeedResult};
use crate::parser::MessageParser;
use serde::Serialize;
use std::fmt::Write as _;
use tickstream_core::ParsedMarketData;
use tracing::{debug, warn};

/// Default number of decimals for price-like fields.
pub const DEFAULT_PRICE_PRECISION: usize = 4;

/// Largest supported precision; beyond this f64 formatting is noise.
const MAX_PRICE_PRECISION: usize = 12;

/// Result of rendering a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrintResult {
    pub success: bool,
    /// Rendered wire form (present only on success).
    pub output: Option<String>,
    pub errors: Vec<String>,
}

/// A field whose value did not survive print → parse unchanged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDifference {
    pub field: String,
    pub expected: String,
    pub actual: String,
}

impl std::fmt::Display for FieldDifference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: expected {}, got {}",
            self.field, self.expected, self.actual
        )
    }
}

/// Result of a round-trip validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundTripResult {
    pub success: bool,
    pub differences: Vec<FieldDifference>,
}

/// Market data printer.
#[derive(Debug, Clone)]
pub struct MarketDataPrinter {
    price_precision: usize,
}

impl Default for MarketDataPrinter {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketDataPrinter {
    /// Create a printer with the default price precision.
    pub fn new() -> Self {
        Self::with_precision(DEFAULT_PRICE_PRECISION)
    }

    /// Create a printer with custom price precision (capped at 12 decimals).
    pub fn with_precision(price_precision: usize) -> Self {
        Self {
            price_precision: price_precision.min(MAX_PRICE_PRECISION),
        }
    }

    pub fn price_precision(&self) -> usize {
        self.price_precision
    }

    /// Render a canonical record to wire form.
    pub fn print(&self, data: &ParsedMarketData) -> PrintResult {
        let problems = check_printable(data);
        if !problems.is_empty() {
            let errors: Vec<String> = problems.iter().map(|e| e.to_string()).collect();
            warn!(symbol = %data.symbol, ?errors, "Record is not printable");
            return PrintResult {
                success: false,
                output: None,
                errors,
            };
        }

        match self.render(data) {
            Ok(output) => PrintResult {
                success: true,
                output: Some(output),
                errors: Vec::new(),
            },
            Err(e) => PrintResult {
                success: false,
                output: None,
                errors: vec![e.to_string()],
            },
        }
    }

    /// Print `data`, re-parse it with `parser`, and compare field by field.
    ///
    /// Price-like fields are compared within half a unit of the printed
    /// precision. `spread` is compared against its recomputed value when
    /// the record has both quote sides.
    pub fn validate_round_trip(
        &self,
        data: &ParsedMarketData,
        parser: &MessageParser,
    ) -> RoundTripResult {
        let printed = self.print(data);
        let Some(output) = printed.output else {
            let differences = check_printable(data)
                .into_iter()
                .map(|e| match e {
                    FeedError::InvalidField { field, reason } => FieldDifference {
                        field: field.to_string(),
                        expected: "printable value".to_string(),
                        actual: reason,
                    },
                    other => FieldDifference {
                        field: "record".to_string(),
                        expected: "printable record".to_string(),
                        actual: other.to_string(),
                    },
                })
                .collect();
            return RoundTripResult {
                success: false,
                differences,
            };
        };

        let reparsed = parser.parse_str(&output);
        let Some(actual) = reparsed.data else {
            let differences = reparsed
                .errors
                .iter()
                .map(|e| FieldDifference {
                    field: e.field.clone(),
                    expected: "parseable value".to_string(),
                    actual: format!("{} ({})", e.kind, e.value),
                })
                .collect();
            return RoundTripResult {
                success: false,
                differences,
            };
        };

        let differences = self.compare(data, &actual);
        if !differences.is_empty() {
            debug!(
                symbol = %data.symbol,
                count = differences.len(),
                "Round-trip mismatch"
            );
        }

        RoundTripResult {
            success: differences.is_empty(),
            differences,
        }
    }

    fn render(&self, data: &ParsedMarketData) -> FeedResult<String> {
        let mut out = String::with_capacity(160);
        out.push('{');
        write!(out, "\"type\":{}", serde_json::to_string(&data.message_type)?)
            .map_err(fmt_error)?;
        write!(out, ",\"symbol\":{}", serde_json::to_string(&data.symbol)?)
            .map_err(fmt_error)?;
        self.write_decimal(&mut out, "price", data.price)?;
        if let Some(volume) = data.volume {
            write!(out, ",\"volume\":{volume}").map_err(fmt_error)?;
        }
        if let Some(bid) = data.bid {
            self.write_decimal(&mut out, "bid", bid)?;
        }
        if let Some(ask) = data.ask {
            self.write_decimal(&mut out, "ask", ask)?;
        }
        if let Some(spread) = data.spread {
            self.write_decimal(&mut out, "spread", spread)?;
        }
        write!(out, ",\"timestamp\":{}", data.timestamp).map_err(fmt_error)?;
        out.push('}');
        Ok(out)
    }

    fn write_decimal(&self, out: &mut String, name: &str, value: f64) -> FeedResult<()> {
        write!(out, ",\"{name}\":{}", format_decimal(value, self.price_precision))
            .map_err(fmt_error)
    }

    fn compare(&self, expected: &ParsedMarketData, actual: &ParsedMarketData) -> Vec<FieldDifference> {
        let mut diffs = Vec::new();
        let tolerance = self.tolerance();

        if expected.message_type != actual.message_type {
            diffs.push(difference("type", &expected.message_type, &actual.message_type));
        }
        if expected.symbol != actual.symbol {
            diffs.push(difference("symbol", &expected.symbol, &actual.symbol));
        }
        if !approx_eq(expected.price, actual.price, tolerance) {
            diffs.push(difference("price", expected.price, actual.price));
        }
        if expected.volume != actual.volume {
            diffs.push(difference(
                "volume",
                format!("{:?}", expected.volume),
                format!("{:?}", actual.volume),
            ));
        }
        compare_optional(&mut diffs, "bid", expected.bid, actual.bid, tolerance);
        compare_optional(&mut diffs, "ask", expected.ask, actual.ask, tolerance);

        // Both sides may round in opposite directions.
        let expected_spread = expected.spread.or_else(|| expected.derived_spread());
        let actual_spread = actual.spread.or_else(|| actual.derived_spread());
        compare_optional(
            &mut diffs,
            "spread",
            expected_spread,
            actual_spread,
            tolerance * 2.0,
        );

        if expected.timestamp != actual.timestamp {
            diffs.push(difference("timestamp", expected.timestamp, actual.timestamp));
        }

        diffs
    }

    /// Half a unit in the last printed decimal, plus float slack.
    fn tolerance(&self) -> f64 {
        0.5 * 10f64.powi(-(self.price_precision as i32)) + 1e-9
    }
}

/// Collect every reason a record cannot be printed in parseable form.
fn check_printable(data: &ParsedMarketData) -> Vec<FeedError> {
    let mut errors = Vec::new();
    let invalid = |field: &'static str, reason: String| FeedError::InvalidField { field, reason };

    if data.message_type.trim().is_empty() {
        errors.push(invalid("type", "must not be empty".to_string()));
    }
    if data.symbol.trim().is_empty() {
        errors.push(invalid("symbol", "must not be empty".to_string()));
    }
    if !data.price.is_finite() || data.price <= 0.0 {
        errors.push(invalid(
            "price",
            format!("must be finite and positive, got {}", data.price),
        ));
    }
    for (field, value) in [("bid", data.bid), ("ask", data.ask), ("spread", data.spread)] {
        if let Some(v) = value {
            if !v.is_finite() {
                errors.push(invalid(field, format!("must be finite, got {v}")));
            }
        }
    }
    if let (Some(bid), Some(ask)) = (data.bid, data.ask) {
        if ask < bid {
            errors.push(invalid("ask", format!("ask {ask} below bid {bid}")));
        }
    }
    if data.timestamp < 0 {
        errors.push(invalid(
            "timestamp",
            format!("must not be negative, got {}", data.timestamp),
        ));
    }
    errors
}

/// Fixed-precision decimal text for `value`.
///
/// Non-zero values that would round to zero at `precision` are written in
/// their shortest exact form instead, so a positive price never prints as 0.
fn format_decimal(value: f64, precision: usize) -> String {
    let fixed = format!("{value:.precision$}");
    if value != 0.0 && fixed.parse::<f64>().map_or(false, |v| v == 0.0) {
        // f64 Display never uses exponent notation, so this stays valid JSON.
        return format!("{value}");
    }
    fixed
}

fn approx_eq(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance
}

fn compare_optional(
    diffs: &mut Vec<FieldDifference>,
    field: &str,
    expected: Option<f64>,
    actual: Option<f64>,
    tolerance: f64,
) {
    let equal = match (expected, actual) {
        (Some(e), Some(a)) => approx_eq(e, a, tolerance),
        (None, None) => true,
        _ => false,
    };
    if !equal {
        diffs.push(difference(
            field,
            format!("{expected:?}"),
            format!("{actual:?}"),
        ));
    }
}

fn difference(field: &str, expected: impl ToString, actual: impl ToString) -> FieldDifference {
    FieldDifference {
        field: field.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

fn fmt_error(e: std::fmt::Error) -> FeedError {
    FeedError::InvalidData(format!("formatting failed: {e}"))
}
