//! Provider capability consumed by the fetch workers plus the Financial
//! Modeling Prep implementation. Houses `FundamentalsProvider`, the
//! classified `ProviderError`, and `FmpProvider`.

use crate::provider::metrics::{ProviderMetrics, ProviderMetricsSnapshot};
use crate::provider::options::FmpOptions;
use crate::provider::quote::FundamentalsPayload;
use crate::securities::Symbol;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;

/// Classified failure of a single provider call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Network, timeout, throttling or server-side failure. Worth retrying.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("symbol {symbol} not found by provider")]
    NotFound { symbol: Symbol },

    #[error("malformed provider payload: {0}")]
    Malformed(String),

    /// The provider refused the request (bad key, plan restriction).
    #[error("provider rejected request: {0}")]
    Rejected(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transport(_))
    }
}

/// One capability: fetch the fundamentals record for a symbol.
///
/// Implementations are injected into the worker pool; nothing in the crate
/// looks a provider up globally.
pub trait FundamentalsProvider: Send + Sync {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    fn fetch<'a>(
        &'a self,
        symbol: &'a Symbol,
    ) -> BoxFuture<'a, Result<FundamentalsPayload, ProviderError>>;
}

#[derive(Debug, Clone)]
pub struct FmpProvider {
    client: reqwest::Client,
    options: FmpOptions,
    quote_url: Arc<String>,
    metrics: Arc<ProviderMetrics>,
}

impl FundamentalsProvider for FmpProvider {
    fn name(&self) -> &str {
        "financialmodelingprep"
    }

    fn fetch<'a>(
        &'a self,
        symbol: &'a Symbol,
    ) -> BoxFuture<'a, Result<FundamentalsPayload, ProviderError>> {
        Box::pin(self.get_quote(symbol))
    }
}

impl FmpProvider {
    pub fn new(options: FmpOptions) -> Result<Self> {
        options.validate()?;

        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .context("failed to build provider HTTP client")?;

        Ok(Self {
            client,
            quote_url: Arc::new(options.quote_url()),
            options,
            metrics: Arc::new(ProviderMetrics::default()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.quote_url
    }

    pub fn metrics(&self) -> ProviderMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Fetches the current quote for `symbol`. Performs exactly one HTTP
    /// request; retries and rate limiting belong to the caller.
    pub async fn get_quote(&self, symbol: &Symbol) -> Result<FundamentalsPayload, ProviderError> {
        let start = Instant::now();
        let response = self
            .client
            .get(self.quote_url.as_str())
            .query(&[
                ("symbol", symbol.as_str()),
                ("apikey", self.options.api_key.as_str()),
            ])
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                if err.is_timeout() {
                    self.metrics.record_timeout(start.elapsed());
                } else {
                    self.metrics.record_failure(start.elapsed());
                }
                return Err(ProviderError::Transport(describe(err)));
            }
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            self.metrics.record_not_found(start.elapsed());
            return Err(ProviderError::NotFound {
                symbol: symbol.clone(),
            });
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            self.metrics.record_failure(start.elapsed());
            return Err(ProviderError::Transport(format!("provider returned HTTP {status}")));
        }
        if !status.is_success() {
            self.metrics.record_failure(start.elapsed());
            return Err(ProviderError::Rejected(format!("provider returned HTTP {status}")));
        }

        let body = match response.json::<Value>().await {
            Ok(body) => body,
            Err(err) if err.is_decode() => {
                self.metrics.record_failure(start.elapsed());
                return Err(ProviderError::Malformed(describe(err)));
            }
            Err(err) => {
                if err.is_timeout() {
                    self.metrics.record_timeout(start.elapsed());
                } else {
                    self.metrics.record_failure(start.elapsed());
                }
                return Err(ProviderError::Transport(describe(err)));
            }
        };

        let parsed = parse_quote_response(symbol, body);
        match &parsed {
            Ok(_) => self.metrics.record_success(start.elapsed()),
            Err(ProviderError::NotFound { .. }) => self.metrics.record_not_found(start.elapsed()),
            Err(_) => self.metrics.record_failure(start.elapsed()),
        }
        parsed
    }
}

/// Interprets the body of a quote response. The provider answers with a JSON
/// array holding at most one quote object.
pub(crate) fn parse_quote_response(
    symbol: &Symbol,
    body: Value,
) -> Result<FundamentalsPayload, ProviderError> {
    match body {
        Value::Array(items) => {
            let Some(first) = items.into_iter().next() else {
                return Err(ProviderError::NotFound {
                    symbol: symbol.clone(),
                });
            };
            let Value::Object(quote) = first else {
                return Err(ProviderError::Malformed(
                    "quote entry is not a JSON object".to_owned(),
                ));
            };
            let payload = FundamentalsPayload::from_quote(&quote);
            if payload.is_empty() {
                return Err(ProviderError::Malformed(
                    "quote contained no usable fields".to_owned(),
                ));
            }
            Ok(payload)
        }
        Value::Object(object) => match object.get("Error Message").and_then(Value::as_str) {
            Some(message) => Err(ProviderError::Rejected(message.to_owned())),
            None => Err(ProviderError::Malformed(
                "expected a JSON array of quotes".to_owned(),
            )),
        },
        other => Err(ProviderError::Malformed(format!(
            "expected a JSON array of quotes, got {}",
            json_kind(&other)
        ))),
    }
}

// Request URLs carry the API key; never let them reach the logs.
fn describe(err: reqwest::Error) -> String {
    err.without_url().to_string()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
