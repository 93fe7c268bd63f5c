//! Market data parsing and printing for tickstream.
//!
//! Validates raw inbound payloads into canonical `ParsedMarketData`
//! records, renders records back to wire form, and checks that the
//! two directions agree.

pub mod error;
pub mod parser;
pub mod printer;

pub use error::{FeedError, FeedResult};
pub use parser::{MessageParser, ParseError, ParseErrorKind, ParseResult, ParserStats};
pub use printer::{
    FieldDifference, MarketDataPrinter, PrintResult, RoundTripResult, DEFAULT_PRICE_PRECISION,
};
