//! Core domain types for the tickstream market data transport.
//!
//! This crate provides the canonical types shared by every layer:
//! - `ConnectionStatus`: transport lifecycle state
//! - `ParsedMarketData`: canonical record produced by the parser
//! - `MarketDataMessage`: record delivered to stream consumers
//! - `Symbol` helpers: case normalization for ticker symbols

pub mod error;
pub mod symbol;
pub mod types;

pub use error::{CoreError, Result};
pub use symbol::{normalize_symbol, normalize_symbols};
pub use types::{
    now_ms, ConnectionStatus, MarketDataMessage, ParsedMarketData, DEFAULT_MESSAGE_TYPE,
};
