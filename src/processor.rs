//! Per-run processing: active-set resolution, rate limiting, the fetch worker
//! pool, and the applier that persists its results.

pub mod applier;
pub(crate) mod backoff;
pub mod outcome;
pub mod rate_limiter;
pub mod resolver;
pub mod worker_pool;
