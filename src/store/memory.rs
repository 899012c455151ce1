use crate::provider::FundamentalsPayload;
use crate::securities::Symbol;
use crate::store::backend::{
    merge_payload, ActiveSetSource, FundamentalsStore, SourceSnapshot, UpsertOutcome,
};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Stored fundamentals row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFundamentals {
    pub payload: FundamentalsPayload,
    pub last_refreshed: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    securities: HashMap<Symbol, bool>,
    holdings: HashMap<String, BTreeSet<Symbol>>,
    watchlists: HashMap<String, BTreeSet<Symbol>>,
    fundamentals: HashMap<Symbol, StoredFundamentals>,
}

/// In-process backend implementing both the active-set source and the
/// fundamentals store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
    writes: Arc<AtomicU64>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a security. Securities referenced by holdings or watchlists
    /// are registered as active automatically.
    pub fn add_security(&self, symbol: Symbol, active: bool) {
        self.write().securities.insert(symbol, active);
    }

    pub fn set_active(&self, symbol: &Symbol, active: bool) {
        if let Some(flag) = self.write().securities.get_mut(symbol) {
            *flag = active;
        }
    }

    pub fn add_holding(&self, user: impl Into<String>, symbol: Symbol) {
        let mut inner = self.write();
        inner.securities.entry(symbol.clone()).or_insert(true);
        inner.holdings.entry(user.into()).or_default().insert(symbol);
    }

    pub fn add_watchlist_item(&self, user: impl Into<String>, symbol: Symbol) {
        let mut inner = self.write();
        inner.securities.entry(symbol.clone()).or_insert(true);
        inner.watchlists.entry(user.into()).or_default().insert(symbol);
    }

    pub fn remove_holding(&self, user: &str, symbol: &Symbol) {
        if let Some(symbols) = self.write().holdings.get_mut(user) {
            symbols.remove(symbol);
        }
    }

    /// Makes every subsequent snapshot fail, as an unreachable backing store would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Seeds a fundamentals row without counting it as a write.
    pub fn seed_fundamentals(&self, symbol: Symbol, stored: StoredFundamentals) {
        self.write().fundamentals.insert(symbol, stored);
    }

    pub fn fundamentals(&self, symbol: &Symbol) -> Option<StoredFundamentals> {
        self.read().fundamentals.get(symbol).cloned()
    }

    pub fn fundamentals_len(&self) -> usize {
        self.read().fundamentals.len()
    }

    /// Number of upserts performed through [`FundamentalsStore`].
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryInner> {
        self.inner.read().expect("memory store lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryInner> {
        self.inner.write().expect("memory store lock poisoned")
    }

    fn take_snapshot(&self) -> Result<SourceSnapshot> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("memory store is unavailable");
        }

        let inner = self.read();
        let is_active = |symbol: &&Symbol| inner.securities.get(*symbol).copied().unwrap_or(false);
        let holdings = inner
            .holdings
            .values()
            .flatten()
            .filter(is_active)
            .cloned()
            .collect();
        let watchlist = inner
            .watchlists
            .values()
            .flatten()
            .filter(is_active)
            .cloned()
            .collect();

        Ok(SourceSnapshot {
            holdings,
            watchlist,
        })
    }

    fn apply_upsert(
        &self,
        symbol: &Symbol,
        payload: &FundamentalsPayload,
        refreshed_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        let mut inner = self.write();
        if !inner.securities.contains_key(symbol) {
            bail!("unknown security {symbol}");
        }

        let outcome = match inner.fundamentals.get_mut(symbol) {
            Some(stored) => {
                merge_payload(&mut stored.payload, payload);
                stored.last_refreshed = refreshed_at;
                UpsertOutcome::Updated
            }
            None => {
                inner.fundamentals.insert(
                    symbol.clone(),
                    StoredFundamentals {
                        payload: payload.clone(),
                        last_refreshed: refreshed_at,
                    },
                );
                UpsertOutcome::Created
            }
        };
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(outcome)
    }
}

impl ActiveSetSource for MemoryStore {
    fn snapshot(&self) -> BoxFuture<'_, Result<SourceSnapshot>> {
        Box::pin(async move { self.take_snapshot() })
    }
}

impl FundamentalsStore for MemoryStore {
    fn upsert<'a>(
        &'a self,
        symbol: &'a Symbol,
        payload: &'a FundamentalsPayload,
        refreshed_at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<UpsertOutcome>> {
        Box::pin(async move { self.apply_upsert(symbol, payload, refreshed_at) })
    }

    fn last_refreshed<'a>(
        &'a self,
        symbols: &'a [Symbol],
    ) -> BoxFuture<'a, Result<HashMap<Symbol, DateTime<Utc>>>> {
        Box::pin(async move {
            let inner = self.read();
            Ok(symbols
                .iter()
                .filter_map(|symbol| {
                    inner
                        .fundamentals
                        .get(symbol)
                        .map(|stored| (symbol.clone(), stored.last_refreshed))
                })
                .collect())
        })
    }
}
