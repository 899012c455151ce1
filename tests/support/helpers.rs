use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use fundamentals_refresh::{
    FundamentalsPayload, FundamentalsProvider, MemoryStore, ProviderError, Symbol,
};
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

pub fn sym(raw: &str) -> Symbol {
    Symbol::new(raw).expect("test symbols are non-empty")
}

pub fn syms(raw: &[&str]) -> Vec<Symbol> {
    raw.iter().map(|raw| sym(raw)).collect()
}

pub fn dec(value: f64) -> Decimal {
    Decimal::try_from(value).expect("finite test price")
}

pub fn payload(price: f64) -> FundamentalsPayload {
    FundamentalsPayload {
        price: Some(dec(price)),
        previous_close: Some(dec(price - 1.0)),
        change: Some(Decimal::ONE),
        volume: Some(1_000),
        exchange: Some("NASDAQ".to_owned()),
        ..FundamentalsPayload::default()
    }
}

/// Store where every symbol is held by one user.
pub fn store_holding(symbols: &[&str]) -> MemoryStore {
    let store = MemoryStore::new();
    for raw in symbols {
        store.add_holding("alice", sym(raw));
    }
    store
}

/// Per-symbol provider behaviour.
#[derive(Clone, Debug)]
pub enum Script {
    Quote(f64),
    NotFound,
    Malformed,
    /// Every attempt fails with a transport error.
    Transport,
    /// The first `n` attempts fail with a transport error.
    TransportThenQuote(u64, f64),
    /// Never answers within any reasonable deadline.
    Hang,
    /// Answers after a delay.
    Slow(Duration, f64),
    Panic,
}

/// Provider answering from a script and counting calls per symbol.
/// Unscripted symbols get a quote priced at 100.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    scripts: Arc<HashMap<Symbol, Script>>,
    calls: Arc<Mutex<HashMap<Symbol, u64>>>,
    total: Arc<AtomicU64>,
}

impl ScriptedProvider {
    pub fn new(scripts: impl IntoIterator<Item = (&'static str, Script)>) -> Self {
        Self {
            scripts: Arc::new(
                scripts
                    .into_iter()
                    .map(|(raw, script)| (sym(raw), script))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, symbol: &str) -> u64 {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .get(&sym(symbol))
            .copied()
            .unwrap_or(0)
    }

    fn record_call(&self, symbol: &Symbol) -> u64 {
        self.total.fetch_add(1, Ordering::SeqCst);
        let mut calls = self.calls.lock().expect("calls lock poisoned");
        let count = calls.entry(symbol.clone()).or_insert(0);
        *count += 1;
        *count
    }
}

impl FundamentalsProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch<'a>(
        &'a self,
        symbol: &'a Symbol,
    ) -> BoxFuture<'a, Result<FundamentalsPayload, ProviderError>> {
        let attempt = self.record_call(symbol);
        let script = self
            .scripts
            .get(symbol)
            .cloned()
            .unwrap_or(Script::Quote(100.0));

        Box::pin(async move {
            match script {
                Script::Quote(price) => Ok(payload(price)),
                Script::NotFound => Err(ProviderError::NotFound {
                    symbol: symbol.clone(),
                }),
                Script::Malformed => Err(ProviderError::Malformed("price is not a number".into())),
                Script::Transport => Err(ProviderError::Transport("connection reset".into())),
                Script::TransportThenQuote(failures, price) => {
                    if attempt <= failures {
                        Err(ProviderError::Transport("connection reset".into()))
                    } else {
                        Ok(payload(price))
                    }
                }
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                    Err(ProviderError::Transport("hung request gave up".into()))
                }
                Script::Slow(delay, price) => {
                    tokio::time::sleep(delay).await;
                    Ok(payload(price))
                }
                Script::Panic => panic!("scripted provider panic for {symbol}"),
            }
        })
    }
}
