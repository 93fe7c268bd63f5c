//! Error types for tickstream-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
