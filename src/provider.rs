//! Upstream fundamentals provider: the fetch capability, the Financial
//! Modeling Prep client, and an in-memory stub.

pub mod client;
mod metrics;
pub mod options;
pub mod quote;
pub(crate) mod retry;
pub mod stub;

pub use client::{FmpProvider, FundamentalsProvider, ProviderError};
pub use metrics::ProviderMetricsSnapshot;
pub use options::{FmpOptions, DEFAULT_FMP_BASE_URL};
pub use quote::{FundamentalsPayload, EXCHANGE_NAME_MAX_CHARS};
pub use stub::StubProvider;
