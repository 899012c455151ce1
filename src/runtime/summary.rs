//! Aggregate report for one run, built incrementally by the controller and
//! frozen when the run ends.

use crate::processor::outcome::{EntityOutcome, FetchFailure, SkipReason};
use crate::runtime::telemetry::TelemetrySnapshot;
use crate::securities::{ActiveSet, Symbol};
use crate::store::UpsertOutcome;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Finished with a failure ratio at or below the threshold.
    Success,
    /// Too many symbols failed; the provider or network is likely unhealthy.
    Degraded,
}

impl RunStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Degraded => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshedEntity {
    pub symbol: Symbol,
    pub outcome: UpsertOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedEntity {
    pub symbol: Symbol,
    pub reason: FetchFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntity {
    pub symbol: Symbol,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub dry_run: bool,
    pub candidates: usize,
    pub from_holdings: usize,
    pub from_watchlists: usize,
    pub succeeded: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Symbols whose fundamentals row was written, in acknowledgement order.
    pub refreshed: Vec<RefreshedEntity>,
    pub failures: Vec<FailedEntity>,
    pub skipped_entities: Vec<SkippedEntity>,
    /// Symbols a dry run would have fetched.
    pub would_update: Vec<Symbol>,
    pub failure_ratio: f64,
    /// Percentage of attempted symbols that were stored.
    pub success_rate: f64,
    /// Symbols acknowledged per minute of run time.
    pub per_minute: f64,
    pub elapsed_ms: u64,
    pub telemetry: TelemetrySnapshot,
}

impl RunSummary {
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    /// Every symbol the summary accounts for, in no particular order.
    pub fn reported_symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.refreshed
            .iter()
            .map(|refreshed| &refreshed.symbol)
            .chain(self.failures.iter().map(|failed| &failed.symbol))
            .chain(self.skipped_entities.iter().map(|skipped| &skipped.symbol))
    }

    pub fn refresh_outcome(&self, symbol: &Symbol) -> Option<UpsertOutcome> {
        self.refreshed
            .iter()
            .find(|refreshed| &refreshed.symbol == symbol)
            .map(|refreshed| refreshed.outcome)
    }

    pub fn failure_for(&self, symbol: &Symbol) -> Option<&FetchFailure> {
        self.failures
            .iter()
            .find(|failed| &failed.symbol == symbol)
            .map(|failed| &failed.reason)
    }

    pub fn skip_reason(&self, symbol: &Symbol) -> Option<SkipReason> {
        self.skipped_entities
            .iter()
            .find(|skipped| &skipped.symbol == symbol)
            .map(|skipped| skipped.reason)
    }
}

/// Running tally the controller feeds one acknowledgement at a time.
#[derive(Debug, Default)]
pub(crate) struct SummaryBuilder {
    dry_run: bool,
    candidates: usize,
    from_holdings: usize,
    from_watchlists: usize,
    refreshed: Vec<RefreshedEntity>,
    failures: Vec<FailedEntity>,
    skipped: Vec<SkippedEntity>,
    would_update: Vec<Symbol>,
}

impl SummaryBuilder {
    pub(crate) fn new(active: &ActiveSet, dry_run: bool) -> Self {
        Self {
            dry_run,
            candidates: active.len(),
            from_holdings: active.from_holdings(),
            from_watchlists: active.from_watchlists(),
            ..Self::default()
        }
    }

    pub(crate) fn record(&mut self, symbol: Symbol, outcome: EntityOutcome) {
        match outcome {
            EntityOutcome::Created => self.refreshed.push(RefreshedEntity {
                symbol,
                outcome: UpsertOutcome::Created,
            }),
            EntityOutcome::Updated => self.refreshed.push(RefreshedEntity {
                symbol,
                outcome: UpsertOutcome::Updated,
            }),
            EntityOutcome::Failed(reason) => self.failures.push(FailedEntity { symbol, reason }),
            EntityOutcome::Skipped(reason) => self.skipped.push(SkippedEntity { symbol, reason }),
        }
    }

    pub(crate) fn would_update(&mut self, symbols: Vec<Symbol>) {
        self.would_update = symbols;
    }

    pub(crate) fn acknowledged(&self) -> usize {
        self.refreshed.len() + self.failures.len() + self.skipped.len()
    }

    pub(crate) fn finish(
        self,
        elapsed: Duration,
        failure_ratio_threshold: f64,
        telemetry: TelemetrySnapshot,
    ) -> RunSummary {
        let succeeded = self.refreshed.len();
        let created = self.count_refreshed(UpsertOutcome::Created);
        let fresh = self.count_skipped(SkipReason::Fresh);
        let timed_out = self.count_skipped(SkipReason::Deadline);
        let attempted = self.candidates.saturating_sub(fresh);
        let unsuccessful = self.failures.len() + timed_out;

        let failure_ratio = ratio(unsuccessful, attempted);
        let status = if failure_ratio > failure_ratio_threshold {
            RunStatus::Degraded
        } else {
            RunStatus::Success
        };

        let minutes = elapsed.as_secs_f64() / 60.0;
        let per_minute = if minutes <= f64::EPSILON {
            0.0
        } else {
            self.acknowledged() as f64 / minutes
        };

        RunSummary {
            status,
            dry_run: self.dry_run,
            candidates: self.candidates,
            from_holdings: self.from_holdings,
            from_watchlists: self.from_watchlists,
            succeeded,
            created,
            updated: succeeded - created,
            failed: self.failures.len(),
            skipped: self.skipped.len(),
            refreshed: self.refreshed,
            failures: self.failures,
            skipped_entities: self.skipped,
            would_update: self.would_update,
            failure_ratio,
            success_rate: ratio(succeeded, attempted) * 100.0,
            per_minute,
            elapsed_ms: elapsed.as_millis().min(u128::from(u64::MAX)) as u64,
            telemetry,
        }
    }

    fn count_refreshed(&self, outcome: UpsertOutcome) -> usize {
        self.refreshed
            .iter()
            .filter(|refreshed| refreshed.outcome == outcome)
            .count()
    }

    fn count_skipped(&self, reason: SkipReason) -> usize {
        self.skipped
            .iter()
            .filter(|skipped| skipped.reason == reason)
            .count()
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
