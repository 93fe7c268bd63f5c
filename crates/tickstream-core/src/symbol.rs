//! Ticker symbol normalization.

use crate::error::{CoreError, Result};
use std::collections::BTreeSet;

/// Normalize a ticker symbol: trim surrounding whitespace and uppercase.
///
/// Returns `CoreError::InvalidSymbol` when nothing is left after trimming.
pub fn normalize_symbol(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidSymbol(raw.to_string()));
    }
    Ok(trimmed.to_uppercase())
}

/// Normalize a batch of symbols into a deduplicated, ordered set.
///
/// Blank entries are dropped.
pub fn normalize_symbols<I, S>(symbols: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    symbols
        .into_iter()
        .filter_map(|s| normalize_symbol(s.as_ref()).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_symbol_uppercases_and_trims() {
        assert_eq!(normalize_symbol(" aapl ").unwrap(), "AAPL");
        assert_eq!(normalize_symbol("brk.b").unwrap(), "BRK.B");
    }

    #[test]
    fn test_normalize_symbol_rejects_blank() {
        assert!(matches!(
            normalize_symbol("   "),
            Err(CoreError::InvalidSymbol(_))
        ));
    }

    #[test]
    fn test_normalize_symbols_dedups_case_insensitively() {
        let set = normalize_symbols(["msft", "MSFT", "", "aapl"]);
        assert_eq!(
            set.into_iter().collect::<Vec<_>>(),
            vec!["AAPL".to_string(), "MSFT".to_string()]
        );
    }
}
