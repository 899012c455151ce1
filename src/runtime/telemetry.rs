use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the progress reporter task.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(15);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`
/// (`debug` for this crate when `verbose` is set). Calling this function multiple times is
/// harmless.
pub fn init_tracing(verbose: bool) {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let fallback = if verbose {
        "info,fundamentals_refresh=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Lightweight rolling counters shared by the workers, the applier and the
/// progress reporter.
#[derive(Default, Debug)]
pub struct Telemetry {
    provider_calls: AtomicU64,
    transport_errors: AtomicU64,
    retries: AtomicU64,
    rate_limit_waits: AtomicU64,
    rate_limit_wait_ms: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Telemetry {
    pub fn record_provider_call(&self) {
        self.provider_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a rate-limit grant that had to wait. Immediate grants are ignored.
    pub fn record_rate_limit_wait(&self, waited: Duration) {
        if waited.is_zero() {
            return;
        }
        self.rate_limit_waits.fetch_add(1, Ordering::Relaxed);
        let millis = waited.as_millis().min(u128::from(u64::MAX)) as u64;
        self.rate_limit_wait_ms.fetch_add(millis, Ordering::Relaxed);
    }

    /// Records one symbol acknowledged by the applier.
    pub fn record_completed(&self, failed: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            rate_limit_waits: self.rate_limit_waits.load(Ordering::Relaxed),
            rate_limit_wait_ms: self.rate_limit_wait_ms.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    pub fn provider_calls(&self) -> u64 {
        self.provider_calls.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct TelemetrySnapshot {
    pub provider_calls: u64,
    pub transport_errors: u64,
    pub retries: u64,
    pub rate_limit_waits: u64,
    pub rate_limit_wait_ms: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Spawns a background task that periodically logs progress against `total`,
/// throughput, and rate-limit pressure until `shutdown` fires.
pub fn spawn_progress_reporter(
    telemetry: Arc<Telemetry>,
    total: usize,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; there is nothing to report yet.
        ticker.tick().await;

        let started = Instant::now();
        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(target: "fundamentals_refresh::progress", "progress reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let completed_delta = current.completed.saturating_sub(last_snapshot.completed);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let per_minute = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        completed_delta as f64 * 60.0 / elapsed
                    };

                    tracing::info!(
                        target: "fundamentals_refresh::progress",
                        completed = current.completed,
                        total,
                        failed = current.failed,
                        per_minute = format!("{per_minute:.1}"),
                        provider_calls = current.provider_calls,
                        retries = current.retries,
                        rate_limit_waits = current.rate_limit_waits,
                        elapsed_secs = started.elapsed().as_secs(),
                        "refresh progress"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
