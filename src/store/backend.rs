//! Persistence seams: the read-only holdings/watchlist source the resolver
//! consumes and the per-symbol fundamentals store the applier writes to.

use crate::provider::FundamentalsPayload;
use crate::securities::Symbol;
use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::HashMap;

/// Both source projections, captured inside one bounded read window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSnapshot {
    pub holdings: Vec<Symbol>,
    pub watchlist: Vec<Symbol>,
}

/// Read-only view of the symbols users currently hold or watch.
pub trait ActiveSetSource: Send + Sync {
    /// Reads holdings and watchlists together. Only active securities are
    /// returned; duplicates across users are allowed.
    fn snapshot(&self) -> BoxFuture<'_, Result<SourceSnapshot>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Upsert-by-symbol write interface for fundamentals rows.
///
/// Every call is an independent row-level write. Absent payload fields leave
/// the stored value untouched.
pub trait FundamentalsStore: Send + Sync {
    fn upsert<'a>(
        &'a self,
        symbol: &'a Symbol,
        payload: &'a FundamentalsPayload,
        refreshed_at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<UpsertOutcome>>;

    /// Last refresh time for each of `symbols` that has a fundamentals row.
    fn last_refreshed<'a>(
        &'a self,
        symbols: &'a [Symbol],
    ) -> BoxFuture<'a, Result<HashMap<Symbol, DateTime<Utc>>>>;
}

/// Overlays the fields present in `update` onto `stored`.
pub(crate) fn merge_payload(stored: &mut FundamentalsPayload, update: &FundamentalsPayload) {
    macro_rules! overlay {
        ($($field:ident),* $(,)?) => {
            $(
                if update.$field.is_some() {
                    stored.$field = update.$field.clone();
                }
            )*
        };
    }

    overlay!(
        name,
        price,
        previous_close,
        change,
        market_cap,
        volume,
        avg_volume,
        day_high,
        day_low,
        open,
        year_high,
        year_low,
        price_avg_50,
        price_avg_200,
        exchange,
        timestamp,
    );
}
