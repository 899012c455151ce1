//! Bounded pool of fetch workers.
//!
//! Workers share one queue of symbols. Each takes the next symbol, spends one
//! rate-limit grant per provider attempt, and emits exactly one
//! [`FetchResult`] for it. Once the run token is cancelled, in-flight fetches
//! are abandoned and everything still queued is emitted as a timeout. A fetch
//! that panics is reported as a worker abort and its worker moves on, so the
//! result stream always covers the whole input.

use crate::processor::backoff::{retry_with_backoff, RetryAbort, RetryBackoff, RetryDisposition};
use crate::processor::outcome::{FetchFailure, FetchResult};
use crate::processor::rate_limiter::RateLimiter;
use crate::provider::retry::{RetryContext, QUOTE_FETCH_RETRY};
use crate::provider::{FundamentalsPayload, FundamentalsProvider, ProviderError};
use crate::runtime::telemetry::Telemetry;
use crate::securities::Symbol;
use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Retry budget applied to transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

pub struct FetchWorkerPool {
    concurrency: usize,
    provider: Arc<dyn FundamentalsProvider>,
    limiter: Arc<RateLimiter>,
    telemetry: Arc<Telemetry>,
    retry: RetryPolicy,
}

/// Handle on a launched pool: the result stream plus the worker tasks.
pub struct FetchRun {
    results: mpsc::Receiver<FetchResult>,
    workers: Vec<JoinHandle<()>>,
}

impl FetchRun {
    /// Next completed result, or `None` once every worker has exited.
    pub async fn next(&mut self) -> Option<FetchResult> {
        self.results.recv().await
    }

    /// Waits for every worker task to exit.
    pub async fn join(self) {
        drop(self.results);
        for handle in self.workers {
            let _ = handle.await;
        }
    }
}

struct WorkerContext {
    provider: Arc<dyn FundamentalsProvider>,
    limiter: Arc<RateLimiter>,
    telemetry: Arc<Telemetry>,
    retry: RetryPolicy,
    queue: Mutex<VecDeque<Symbol>>,
    run_token: CancellationToken,
}

impl WorkerContext {
    fn next_symbol(&self) -> Option<Symbol> {
        self.queue
            .lock()
            .expect("symbol queue lock poisoned")
            .pop_front()
    }
}

impl FetchWorkerPool {
    pub fn new(
        concurrency: usize,
        provider: Arc<dyn FundamentalsProvider>,
        limiter: Arc<RateLimiter>,
        telemetry: Arc<Telemetry>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            concurrency: concurrency.max(1),
            provider,
            limiter,
            telemetry,
            retry,
        }
    }

    /// Spawns up to `concurrency` workers over `symbols`. Results arrive in
    /// completion order.
    pub fn launch(&self, symbols: Vec<Symbol>, run_token: CancellationToken) -> FetchRun {
        let workers = self.concurrency.min(symbols.len());
        let (result_tx, results) = mpsc::channel(self.concurrency.saturating_mul(2));

        let ctx = Arc::new(WorkerContext {
            provider: self.provider.clone(),
            limiter: self.limiter.clone(),
            telemetry: self.telemetry.clone(),
            retry: self.retry,
            queue: Mutex::new(symbols.into()),
            run_token,
        });

        let handles = (0..workers)
            .map(|worker_id| {
                let ctx = ctx.clone();
                let result_tx = result_tx.clone();
                tokio::spawn(async move {
                    let outcome = std::panic::AssertUnwindSafe(run_worker(worker_id, ctx, result_tx))
                        .catch_unwind()
                        .await;

                    if let Err(panic_payload) = outcome {
                        let panic_msg = panic_message(panic_payload.as_ref());
                        tracing::error!(
                            worker = worker_id,
                            panic = %panic_msg,
                            "fetch worker panicked"
                        );
                    }
                })
            })
            .collect();

        FetchRun {
            results,
            workers: handles,
        }
    }
}

async fn run_worker(worker_id: usize, ctx: Arc<WorkerContext>, result_tx: mpsc::Sender<FetchResult>) {
    tracing::trace!(worker = worker_id, "fetch worker started");

    while let Some(symbol) = ctx.next_symbol() {
        let result = if ctx.run_token.is_cancelled() {
            FetchResult::Failed {
                symbol,
                reason: FetchFailure::Timeout,
            }
        } else {
            let fetched = std::panic::AssertUnwindSafe(fetch_symbol(&ctx, symbol.clone()))
                .catch_unwind()
                .await;
            match fetched {
                Ok(result) => result,
                Err(panic_payload) => {
                    let panic_msg = panic_message(panic_payload.as_ref());
                    tracing::error!(
                        worker = worker_id,
                        symbol = %symbol,
                        panic = %panic_msg,
                        "fetch panicked"
                    );
                    FetchResult::Failed {
                        symbol,
                        reason: FetchFailure::WorkerAborted {
                            message: format!("fetch panicked: {panic_msg}"),
                        },
                    }
                }
            }
        };

        if result_tx.send(result).await.is_err() {
            tracing::warn!(worker = worker_id, "result receiver dropped; stopping worker");
            return;
        }
    }

    tracing::trace!(worker = worker_id, "fetch worker drained queue");
}

async fn fetch_symbol(ctx: &WorkerContext, symbol: Symbol) -> FetchResult {
    let provider = ctx.provider.as_ref();
    let limiter = ctx.limiter.as_ref();
    let telemetry = ctx.telemetry.as_ref();
    let target = &symbol;
    let retry_ctx = RetryContext::new(target, provider.name(), &QUOTE_FETCH_RETRY);

    let backoff = RetryBackoff::new(ctx.retry.initial_backoff, ctx.retry.max_backoff)
        .with_max_attempts(ctx.retry.max_retries.saturating_add(1))
        .with_cancellation(&ctx.run_token);

    let outcome: Result<FundamentalsPayload, RetryAbort<ProviderError>> = retry_with_backoff(
        backoff,
        move |_| async move {
            let waited = limiter.acquire().await;
            telemetry.record_rate_limit_wait(waited);
            telemetry.record_provider_call();
            provider.fetch(target).await
        },
        |attempt, delay, err, will_retry| {
            if will_retry {
                telemetry.record_retry();
                retry_ctx.log_retry(attempt, delay, err);
            } else {
                retry_ctx.log_exhausted(attempt, err);
            }
        },
        |attempt, err| {
            if err.is_retryable() {
                telemetry.record_transport_error();
                RetryDisposition::Retry
            } else {
                retry_ctx.log_terminal(attempt, err);
                RetryDisposition::Abort
            }
        },
    )
    .await;

    match outcome {
        Ok(payload) => FetchResult::Updated { symbol, payload },
        Err(RetryAbort::Cancelled { attempts }) => {
            retry_ctx.log_cancelled(attempts);
            FetchResult::Failed {
                symbol,
                reason: FetchFailure::Timeout,
            }
        }
        Err(RetryAbort::Failed { error, attempts }) => FetchResult::Failed {
            reason: FetchFailure::from_provider(error, attempts),
            symbol,
        },
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
