//! Consumes fetch results and persists the successful ones.
//!
//! Each update is written by its own task, so a slow or failing write never
//! holds up another symbol. Failures are acknowledged immediately.

use crate::processor::outcome::{EntityOutcome, FetchFailure, FetchResult, SkipReason};
use crate::processor::worker_pool::panic_message;
use crate::provider::FundamentalsPayload;
use crate::securities::Symbol;
use crate::store::{FundamentalsStore, UpsertOutcome};
use chrono::Utc;
use futures::FutureExt;
use std::sync::Arc;
use tokio::task::JoinSet;

/// A symbol together with what was acknowledged for it.
pub type Ack = (Symbol, EntityOutcome);

pub struct ResultApplier {
    store: Arc<dyn FundamentalsStore>,
    verbose: bool,
    writes: JoinSet<Ack>,
}

impl ResultApplier {
    pub fn new(store: Arc<dyn FundamentalsStore>, verbose: bool) -> Self {
        Self {
            store,
            verbose,
            writes: JoinSet::new(),
        }
    }

    /// Routes one result. Failures are acknowledged right away; updates are
    /// handed to a write task and acknowledged through [`next_ack`](Self::next_ack).
    pub fn apply(&mut self, result: FetchResult) -> Option<Ack> {
        match result {
            FetchResult::Updated { symbol, payload } => {
                let store = self.store.clone();
                let verbose = self.verbose;
                self.writes
                    .spawn(persist(store, symbol, payload, verbose));
                None
            }
            FetchResult::Failed { symbol, reason } => {
                let outcome = match reason {
                    FetchFailure::Timeout => EntityOutcome::Skipped(SkipReason::Deadline),
                    reason => EntityOutcome::Failed(reason),
                };
                log_outcome(&symbol, &outcome, self.verbose);
                Some((symbol, outcome))
            }
        }
    }

    /// Number of writes still in flight.
    pub fn pending(&self) -> usize {
        self.writes.len()
    }

    /// Next finished write, or `None` when none are in flight.
    pub async fn next_ack(&mut self) -> Option<Ack> {
        loop {
            match self.writes.join_next().await? {
                Ok(ack) => return Some(ack),
                // Write tasks catch their own panics; a join error means the
                // task was aborted and its symbol is accounted for elsewhere.
                Err(err) => tracing::error!(error = %err, "fundamentals write task failed"),
            }
        }
    }

    /// Waits for every in-flight write.
    #[cfg(test)]
    pub(crate) async fn drain(&mut self) -> Vec<Ack> {
        let mut acks = Vec::with_capacity(self.writes.len());
        while let Some(ack) = self.next_ack().await {
            acks.push(ack);
        }
        acks
    }
}

async fn persist(
    store: Arc<dyn FundamentalsStore>,
    symbol: Symbol,
    payload: FundamentalsPayload,
    verbose: bool,
) -> Ack {
    let write = std::panic::AssertUnwindSafe(store.upsert(&symbol, &payload, Utc::now()))
        .catch_unwind()
        .await;

    let outcome = match write {
        Ok(Ok(UpsertOutcome::Created)) => EntityOutcome::Created,
        Ok(Ok(UpsertOutcome::Updated)) => EntityOutcome::Updated,
        Ok(Err(err)) => EntityOutcome::Failed(FetchFailure::Persistence {
            message: format!("{err:#}"),
        }),
        Err(panic_payload) => EntityOutcome::Failed(FetchFailure::Persistence {
            message: format!("write panicked: {}", panic_message(panic_payload.as_ref())),
        }),
    };

    if matches!(outcome, EntityOutcome::Created | EntityOutcome::Updated) {
        if verbose {
            tracing::info!(
                symbol = %symbol,
                outcome = ?outcome,
                price = ?payload.price,
                day_change_percent = ?payload.day_change_percent(),
                "stored fundamentals"
            );
        } else {
            tracing::debug!(symbol = %symbol, outcome = ?outcome, "stored fundamentals");
        }
    } else {
        log_outcome(&symbol, &outcome, verbose);
    }

    (symbol, outcome)
}

fn log_outcome(symbol: &Symbol, outcome: &EntityOutcome, verbose: bool) {
    match outcome {
        EntityOutcome::Failed(reason @ FetchFailure::Persistence { .. }) => {
            tracing::error!(symbol = %symbol, error = %reason, "failed to store fundamentals");
        }
        EntityOutcome::Failed(reason) if verbose => {
            tracing::warn!(symbol = %symbol, kind = reason.kind(), error = %reason, "fetch failed");
        }
        EntityOutcome::Failed(reason) => {
            tracing::debug!(symbol = %symbol, kind = reason.kind(), error = %reason, "fetch failed");
        }
        EntityOutcome::Skipped(reason) => {
            tracing::debug!(symbol = %symbol, reason = %reason, "skipped");
        }
        EntityOutcome::Created | EntityOutcome::Updated => {}
    }
}
