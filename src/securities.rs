//! Security identifiers and the deduplicated active set built from user
//! holdings and watchlists.

use serde::{Deserialize, Serialize};
use std::collections::btree_set::{self, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Ticker symbol identifying one tradable security.
///
/// Symbols are trimmed and upper-cased on construction so `aapl` and ` AAPL`
/// key the same security everywhere in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("security symbol cannot be empty")]
pub struct EmptySymbol;

impl Symbol {
    pub fn new(raw: impl AsRef<str>) -> Result<Self, EmptySymbol> {
        let normalized = raw.as_ref().trim().to_ascii_uppercase();
        if normalized.is_empty() {
            return Err(EmptySymbol);
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = EmptySymbol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = EmptySymbol;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Deduplicated set of symbols currently held or watched by at least one user.
///
/// Built fresh for every run and read-only once resolved. Iteration order is
/// sorted but nothing downstream depends on it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveSet {
    symbols: BTreeSet<Symbol>,
    from_holdings: usize,
    from_watchlists: usize,
}

impl ActiveSet {
    /// Unions the two projections. The per-source counts report unique symbols
    /// contributed by each source before the union.
    pub fn from_sources<H, W>(holdings: H, watchlist: W) -> Self
    where
        H: IntoIterator<Item = Symbol>,
        W: IntoIterator<Item = Symbol>,
    {
        let holdings: BTreeSet<Symbol> = holdings.into_iter().collect();
        let watchlist: BTreeSet<Symbol> = watchlist.into_iter().collect();
        let from_holdings = holdings.len();
        let from_watchlists = watchlist.len();

        let mut symbols = holdings;
        symbols.extend(watchlist);

        Self {
            symbols,
            from_holdings,
            from_watchlists,
        }
    }

    /// Keeps only the symbols present in `allowed`.
    pub fn restrict_to(&mut self, allowed: &BTreeSet<Symbol>) {
        self.symbols.retain(|symbol| allowed.contains(symbol));
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.symbols.contains(symbol)
    }

    pub fn iter(&self) -> btree_set::Iter<'_, Symbol> {
        self.symbols.iter()
    }

    /// Unique symbols contributed by holdings.
    pub fn from_holdings(&self) -> usize {
        self.from_holdings
    }

    /// Unique symbols contributed by watchlists.
    pub fn from_watchlists(&self) -> usize {
        self.from_watchlists
    }

    pub fn to_vec(&self) -> Vec<Symbol> {
        self.symbols.iter().cloned().collect()
    }
}

impl<'a> IntoIterator for &'a ActiveSet {
    type Item = &'a Symbol;
    type IntoIter = btree_set::Iter<'a, Symbol>;

    fn into_iter(self) -> Self::IntoIter {
        self.symbols.iter()
    }
}
