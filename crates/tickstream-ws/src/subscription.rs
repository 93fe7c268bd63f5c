//! Subscription registry.
//!
//! Holds the desired symbol set. The connection manager diffs requested
//! changes against it so only the delta goes over the wire, and replays the
//! full set after every (re)connect.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tickstream_core::normalize_symbols;

/// Symbols to add and remove to reach a desired set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionDiff {
    pub to_add: BTreeSet<String>,
    pub to_remove: BTreeSet<String>,
}

impl SubscriptionDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Case-normalized, ordered set of subscribed symbols.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionRegistry {
    symbols: BTreeSet<String>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with `symbols` (normalized, blanks dropped).
    pub fn with_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            symbols: normalize_symbols(symbols),
        }
    }

    pub fn symbols(&self) -> &BTreeSet<String> {
        &self.symbols
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.contains(&symbol.trim().to_uppercase())
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Diff between the current set and `desired`.
    ///
    /// An empty `desired` unsubscribes everything.
    pub fn diff<I, S>(&self, desired: I) -> SubscriptionDiff
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let desired = normalize_symbols(desired);
        SubscriptionDiff {
            to_add: desired.difference(&self.symbols).cloned().collect(),
            to_remove: self.symbols.difference(&desired).cloned().collect(),
        }
    }

    /// Diff that adds `symbols` without touching anything else.
    pub fn additions<I, S>(&self, symbols: I) -> SubscriptionDiff
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        SubscriptionDiff {
            to_add: normalize_symbols(symbols)
                .into_iter()
                .filter(|s| !self.symbols.contains(s))
                .collect(),
            to_remove: BTreeSet::new(),
        }
    }

    /// Diff that removes `symbols` if currently subscribed.
    pub fn removals<I, S>(&self, symbols: I) -> SubscriptionDiff
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        SubscriptionDiff {
            to_add: BTreeSet::new(),
            to_remove: normalize_symbols(symbols)
                .into_iter()
                .filter(|s| self.symbols.contains(s))
                .collect(),
        }
    }

    pub fn apply(&mut self, diff: &SubscriptionDiff) {
        for symbol in &diff.to_remove {
            self.symbols.remove(symbol);
        }
        self.symbols.extend(diff.to_add.iter().cloned());
    }
}
