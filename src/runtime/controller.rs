use crate::processor::applier::{Ack, ResultApplier};
use crate::processor::outcome::{EntityOutcome, FetchFailure, FetchResult, SkipReason};
use crate::processor::rate_limiter::RateLimiter;
use crate::processor::resolver::{split_by_freshness, ActiveSetResolver};
use crate::processor::worker_pool::{FetchWorkerPool, RetryPolicy};
use crate::provider::FundamentalsProvider;
use crate::runtime::config::RefreshConfig;
use crate::runtime::error::RunError;
use crate::runtime::summary::{RunStatus, RunSummary, SummaryBuilder};
use crate::runtime::telemetry::{spawn_progress_reporter, Telemetry};
use crate::securities::Symbol;
use crate::store::{ActiveSetSource, FundamentalsStore};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::signal;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Single entry point for one scheduled refresh.
///
/// Collaborators are injected at construction; nothing is looked up globally.
pub struct RunController {
    config: RefreshConfig,
    provider: Arc<dyn FundamentalsProvider>,
    source: Arc<dyn ActiveSetSource>,
    store: Arc<dyn FundamentalsStore>,
    shutdown: Mutex<CancellationToken>,
}

/// State owned by a single `execute` call.
struct RunScope {
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
}

enum RunEvent {
    DeadlineElapsed,
    Fetched(Option<FetchResult>),
    Stored(Option<Ack>),
}

impl RunController {
    pub fn new(
        config: RefreshConfig,
        provider: Arc<dyn FundamentalsProvider>,
        source: Arc<dyn ActiveSetSource>,
        store: Arc<dyn FundamentalsStore>,
    ) -> Self {
        Self {
            config,
            provider,
            source,
            store,
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    /// Cancelling this token ends the current (or next) run early, exactly as
    /// if its deadline had elapsed. Once that run finishes the controller
    /// switches to a fresh token, so later runs are unaffected.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.lock().expect("shutdown lock poisoned").clone()
    }

    fn rearm_if_cancelled(&self) {
        let mut shutdown = self.shutdown.lock().expect("shutdown lock poisoned");
        if shutdown.is_cancelled() {
            *shutdown = CancellationToken::new();
        }
    }

    /// Executes one run and waits for it to finish. A Ctrl-C (SIGINT) ends the
    /// run early; the summary still accounts for every symbol.
    pub async fn run_until_ctrl_c(&self) -> Result<RunSummary, RunError> {
        let shutdown = self.cancellation_token();
        let watcher = tokio::spawn(async move {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    tracing::warn!("Ctrl-C received; abandoning remaining fetches");
                    shutdown.cancel();
                }
                _ = shutdown.cancelled() => {}
            }
        });

        let result = self.execute().await;
        watcher.abort();
        result
    }

    /// Resolves the active set, refreshes it, and reports the outcome.
    ///
    /// Each call starts from zeroed telemetry; the controller can be reused.
    pub async fn execute(&self) -> Result<RunSummary, RunError> {
        let scope = RunScope {
            telemetry: Arc::new(Telemetry::default()),
            shutdown: self.cancellation_token(),
        };
        let result = self.execute_in(&scope).await;
        self.rearm_if_cancelled();
        result
    }

    async fn execute_in(&self, scope: &RunScope) -> Result<RunSummary, RunError> {
        let started = Instant::now();
        let config = &self.config;
        config.validate().map_err(RunError::InvalidConfig)?;

        let active = ActiveSetResolver::new(self.source.clone())
            .with_symbol_filter(config.symbols().cloned())
            .resolve()
            .await
            .map_err(RunError::ActiveSetUnavailable)?;

        let mut summary = SummaryBuilder::new(&active, config.dry_run());
        if active.is_empty() {
            tracing::warn!("no active securities found in holdings or watchlists");
            return Ok(self.finish(scope, summary, started));
        }

        tracing::info!(
            candidates = active.len(),
            from_holdings = active.from_holdings(),
            from_watchlists = active.from_watchlists(),
            rate_limit = config.rate_limit(),
            concurrency = config.concurrency(),
            estimated_minutes = format!("{:.1}", estimated_minutes(active.len(), config)),
            dry_run = config.dry_run(),
            "refreshing fundamentals for active securities"
        );

        let to_fetch = match config.skip_fresher_than() {
            Some(max_age) => {
                let split = split_by_freshness(self.store.as_ref(), &active, max_age, Utc::now())
                    .await
                    .map_err(RunError::StoreUnavailable)?;
                if !split.fresh.is_empty() {
                    tracing::info!(
                        fresh = split.fresh.len(),
                        max_age_secs = max_age.as_secs(),
                        "skipping recently refreshed securities"
                    );
                }
                for symbol in split.fresh {
                    summary.record(symbol, EntityOutcome::Skipped(SkipReason::Fresh));
                }
                split.stale
            }
            None => active.to_vec(),
        };

        if config.dry_run() {
            if config.verbose() {
                for symbol in &to_fetch {
                    tracing::info!(symbol = %symbol, "would refresh");
                }
            }
            tracing::info!(would_update = to_fetch.len(), "dry run; no provider calls made");
            summary.would_update(to_fetch);
            return Ok(self.finish(scope, summary, started));
        }

        self.refresh(scope, to_fetch, started, &mut summary).await?;
        Ok(self.finish(scope, summary, started))
    }

    async fn refresh(
        &self,
        scope: &RunScope,
        symbols: Vec<Symbol>,
        started: Instant,
        summary: &mut SummaryBuilder,
    ) -> Result<(), RunError> {
        let config = &self.config;
        let limiter = RateLimiter::new(config.rate_limit(), config.rate_window())
            .map_err(RunError::InvalidConfig)?;
        let pool = FetchWorkerPool::new(
            config.concurrency(),
            self.provider.clone(),
            Arc::new(limiter),
            scope.telemetry.clone(),
            RetryPolicy {
                max_retries: config.max_retries(),
                initial_backoff: config.initial_backoff(),
                max_backoff: config.max_backoff(),
            },
        );
        let mut applier = ResultApplier::new(self.store.clone(), config.verbose());

        let run_token = scope.shutdown.child_token();
        let reporter_token = CancellationToken::new();
        let reporter = spawn_progress_reporter(
            scope.telemetry.clone(),
            symbols.len(),
            reporter_token.clone(),
            config.progress_interval(),
        );

        let mut unresolved: HashSet<Symbol> = symbols.iter().cloned().collect();
        let mut run = pool.launch(symbols, run_token.clone());
        let deadline = sleep_until(started + config.deadline());
        tokio::pin!(deadline);
        let mut results_open = true;

        loop {
            let event = tokio::select! {
                _ = &mut deadline, if results_open && !run_token.is_cancelled() => {
                    RunEvent::DeadlineElapsed
                }
                result = run.next(), if results_open => RunEvent::Fetched(result),
                ack = applier.next_ack(), if applier.pending() > 0 => RunEvent::Stored(ack),
                else => break,
            };

            match event {
                RunEvent::DeadlineElapsed => {
                    tracing::warn!(
                        deadline_secs = config.deadline().as_secs(),
                        unresolved = unresolved.len(),
                        "run deadline elapsed; abandoning remaining fetches"
                    );
                    run_token.cancel();
                }
                RunEvent::Fetched(Some(result)) => {
                    if let Some((symbol, outcome)) = applier.apply(result) {
                        self.acknowledge(scope, summary, &mut unresolved, symbol, outcome);
                    }
                }
                RunEvent::Fetched(None) => results_open = false,
                RunEvent::Stored(Some((symbol, outcome))) => {
                    self.acknowledge(scope, summary, &mut unresolved, symbol, outcome);
                }
                RunEvent::Stored(None) => {}
            }
        }

        run.join().await;
        reporter_token.cancel();
        let _ = reporter.await;

        // Symbols whose worker died before reporting still need an entry.
        let mut leftover: Vec<Symbol> = unresolved.into_iter().collect();
        leftover.sort();
        for symbol in leftover {
            tracing::error!(symbol = %symbol, "no result recorded; worker aborted");
            let outcome = EntityOutcome::Failed(FetchFailure::WorkerAborted {
                message: "worker exited before reporting a result".to_owned(),
            });
            scope.telemetry.record_completed(true);
            summary.record(symbol, outcome);
        }

        Ok(())
    }

    fn acknowledge(
        &self,
        scope: &RunScope,
        summary: &mut SummaryBuilder,
        unresolved: &mut HashSet<Symbol>,
        symbol: Symbol,
        outcome: EntityOutcome,
    ) {
        if !unresolved.remove(&symbol) {
            tracing::warn!(symbol = %symbol, "ignoring duplicate result");
            return;
        }
        let failed = matches!(
            outcome,
            EntityOutcome::Failed(_) | EntityOutcome::Skipped(SkipReason::Deadline)
        );
        scope.telemetry.record_completed(failed);
        summary.record(symbol, outcome);
    }

    fn finish(&self, scope: &RunScope, summary: SummaryBuilder, started: Instant) -> RunSummary {
        let summary = summary.finish(
            started.elapsed(),
            self.config.failure_ratio_threshold(),
            scope.telemetry.snapshot(),
        );

        tracing::info!(
            candidates = summary.candidates,
            created = summary.created,
            updated = summary.updated,
            failed = summary.failed,
            skipped = summary.skipped,
            success_rate = format!("{:.1}", summary.success_rate),
            per_minute = format!("{:.1}", summary.per_minute),
            elapsed_secs = summary.elapsed().as_secs(),
            dry_run = summary.dry_run,
            "refresh run finished"
        );
        if summary.status == RunStatus::Degraded {
            tracing::warn!(
                failure_ratio = format!("{:.2}", summary.failure_ratio),
                threshold = self.config.failure_ratio_threshold(),
                "failure ratio above threshold; run degraded"
            );
        }

        summary
    }
}

/// Minutes needed to fetch `candidates` symbols at the configured rate.
fn estimated_minutes(candidates: usize, config: &RefreshConfig) -> f64 {
    let windows = candidates as f64 / config.rate_limit() as f64;
    windows * config.rate_window().as_secs_f64() / 60.0
}
