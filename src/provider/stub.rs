use crate::provider::client::{FundamentalsProvider, ProviderError};
use crate::provider::quote::FundamentalsPayload;
use crate::securities::Symbol;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// In-memory provider seeded with canned payloads. Unknown symbols answer
/// `NotFound`.
#[derive(Debug, Clone, Default)]
pub struct StubProvider {
    payloads: Arc<RwLock<HashMap<Symbol, FundamentalsPayload>>>,
    calls: Arc<AtomicU64>,
}

impl StubProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(self, symbol: Symbol, payload: FundamentalsPayload) -> Self {
        self.insert(symbol, payload);
        self
    }

    pub fn insert(&self, symbol: Symbol, payload: FundamentalsPayload) {
        self.payloads
            .write()
            .expect("stub provider lock poisoned")
            .insert(symbol, payload);
    }

    /// Number of fetches served so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FundamentalsProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    fn fetch<'a>(
        &'a self,
        symbol: &'a Symbol,
    ) -> BoxFuture<'a, Result<FundamentalsPayload, ProviderError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let found = self
            .payloads
            .read()
            .expect("stub provider lock poisoned")
            .get(symbol)
            .cloned();
        Box::pin(async move {
            found.ok_or_else(|| ProviderError::NotFound {
                symbol: symbol.clone(),
            })
        })
    }
}
