//! Derives the set of symbols worth refreshing this run.

use crate::securities::{ActiveSet, Symbol};
use crate::store::{ActiveSetSource, FundamentalsStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

pub struct ActiveSetResolver {
    source: Arc<dyn ActiveSetSource>,
    restrict_to: Option<BTreeSet<Symbol>>,
}

impl ActiveSetResolver {
    pub fn new(source: Arc<dyn ActiveSetSource>) -> Self {
        Self {
            source,
            restrict_to: None,
        }
    }

    /// Keeps only active symbols that also appear in `symbols`.
    pub fn with_symbol_filter(mut self, symbols: Option<BTreeSet<Symbol>>) -> Self {
        self.restrict_to = symbols;
        self
    }

    /// Union of every symbol held or watched by any user, read in one pass.
    ///
    /// An empty result is not an error; an unreadable source is.
    pub async fn resolve(&self) -> Result<ActiveSet> {
        let snapshot = self
            .source
            .snapshot()
            .await
            .context("failed to read holdings and watchlists")?;

        let mut active = ActiveSet::from_sources(snapshot.holdings, snapshot.watchlist);
        if let Some(allowed) = &self.restrict_to {
            active.restrict_to(allowed);
        }

        tracing::debug!(
            candidates = active.len(),
            from_holdings = active.from_holdings(),
            from_watchlists = active.from_watchlists(),
            "resolved active set"
        );
        Ok(active)
    }
}

/// Symbols to fetch, and those left alone because they are still fresh.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FreshnessSplit {
    pub stale: Vec<Symbol>,
    pub fresh: Vec<Symbol>,
}

/// Splits `active` by last refresh time: symbols refreshed within `max_age`
/// of `now` are fresh, everything else (including never-refreshed symbols)
/// is stale.
pub async fn split_by_freshness(
    store: &dyn FundamentalsStore,
    active: &ActiveSet,
    max_age: Duration,
    now: DateTime<Utc>,
) -> Result<FreshnessSplit> {
    let symbols = active.to_vec();
    let refreshed = store
        .last_refreshed(&symbols)
        .await
        .context("failed to read last refresh times")?;

    let mut split = FreshnessSplit::default();
    for symbol in symbols {
        let is_fresh = refreshed
            .get(&symbol)
            .is_some_and(|at| age(now, *at) < max_age);
        if is_fresh {
            split.fresh.push(symbol);
        } else {
            split.stale.push(symbol);
        }
    }
    Ok(split)
}

// Timestamps from the future count as just refreshed.
fn age(now: DateTime<Utc>, refreshed_at: DateTime<Utc>) -> Duration {
    now.signed_duration_since(refreshed_at)
        .to_std()
        .unwrap_or(Duration::ZERO)
}
