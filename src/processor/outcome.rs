//! Per-symbol results flowing from the fetch workers to the applier and on
//! into the run summary.

use crate::provider::{FundamentalsPayload, ProviderError};
use crate::securities::Symbol;
use serde::Serialize;
use std::fmt;

/// Classified reason a symbol could not be refreshed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchFailure {
    #[error("transport failure after {attempts} attempt(s): {message}")]
    Transient { attempts: usize, message: String },

    #[error("not found by provider")]
    NotFound,

    #[error("unparseable payload: {message}")]
    ParseError { message: String },

    #[error("provider rejected request: {message}")]
    Rejected { message: String },

    #[error("run deadline elapsed before the fetch completed")]
    Timeout,

    #[error("failed to persist fundamentals: {message}")]
    Persistence { message: String },

    #[error("worker aborted: {message}")]
    WorkerAborted { message: String },
}

impl FetchFailure {
    /// Maps a terminal provider error to its failure class. `attempts` is how
    /// many provider calls were made for the symbol.
    pub fn from_provider(err: ProviderError, attempts: usize) -> Self {
        match err {
            ProviderError::Transport(message) => FetchFailure::Transient { attempts, message },
            ProviderError::NotFound { .. } => FetchFailure::NotFound,
            ProviderError::Malformed(message) => FetchFailure::ParseError { message },
            ProviderError::Rejected(message) => FetchFailure::Rejected { message },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FetchFailure::Transient { .. } => "transient",
            FetchFailure::NotFound => "not_found",
            FetchFailure::ParseError { .. } => "parse_error",
            FetchFailure::Rejected { .. } => "rejected",
            FetchFailure::Timeout => "timeout",
            FetchFailure::Persistence { .. } => "persistence",
            FetchFailure::WorkerAborted { .. } => "worker_aborted",
        }
    }
}

/// Terminal result of fetching one symbol. Produced once by a worker and
/// consumed once by the applier.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    Updated {
        symbol: Symbol,
        payload: FundamentalsPayload,
    },
    Failed {
        symbol: Symbol,
        reason: FetchFailure,
    },
}

impl FetchResult {
    pub fn symbol(&self) -> &Symbol {
        match self {
            FetchResult::Updated { symbol, .. } | FetchResult::Failed { symbol, .. } => symbol,
        }
    }

    pub fn is_updated(&self) -> bool {
        matches!(self, FetchResult::Updated { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The run deadline elapsed before the symbol was resolved.
    Deadline,
    /// Refreshed more recently than the configured freshness cutoff.
    Fresh,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Deadline => f.write_str("deadline"),
            SkipReason::Fresh => f.write_str("fresh"),
        }
    }
}

/// What the applier acknowledged for one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityOutcome {
    Created,
    Updated,
    Failed(FetchFailure),
    Skipped(SkipReason),
}
