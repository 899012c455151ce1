pub mod processor;
pub mod provider;
pub mod runtime;
pub mod securities;
pub mod store;

pub use processor::applier::ResultApplier;
pub use processor::outcome::{EntityOutcome, FetchFailure, FetchResult, SkipReason};
pub use processor::rate_limiter::RateLimiter;
pub use processor::resolver::{split_by_freshness, ActiveSetResolver, FreshnessSplit};
pub use processor::worker_pool::{FetchRun, FetchWorkerPool, RetryPolicy};
pub use provider::{
    FmpOptions, FmpProvider, FundamentalsPayload, FundamentalsProvider, ProviderError,
    ProviderMetricsSnapshot, StubProvider, DEFAULT_FMP_BASE_URL,
};
pub use runtime::config::{RefreshConfig, RefreshConfigBuilder, RefreshConfigParams};
pub use runtime::controller::RunController;
pub use runtime::error::RunError;
pub use runtime::summary::{
    FailedEntity, RefreshedEntity, RunStatus, RunSummary, SkippedEntity,
};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use securities::{ActiveSet, Symbol};
pub use store::{
    ActiveSetSource, FundamentalsStore, MemoryStore, SourceSnapshot, SqliteStore,
    StoredFundamentals, UpsertOutcome,
};
