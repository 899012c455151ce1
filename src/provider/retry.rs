//! Retry logging context and canned message templates so every provider
//! retry, exhaustion and abort is reported with the same fields.

use crate::provider::client::ProviderError;
use crate::securities::Symbol;
use std::time::Duration;

/// Logging labels that describe how a provider operation reports retries.
#[derive(Clone, Copy)]
pub(crate) struct RetryMessages {
    pub(crate) retry: &'static str,
    pub(crate) exhausted: &'static str,
    pub(crate) terminal: &'static str,
    pub(crate) cancelled: &'static str,
}

#[derive(Clone, Copy)]
pub(crate) struct RetryContext<'a> {
    symbol: &'a Symbol,
    provider: &'a str,
    messages: &'a RetryMessages,
}

impl<'a> RetryContext<'a> {
    pub(crate) fn new(symbol: &'a Symbol, provider: &'a str, messages: &'a RetryMessages) -> Self {
        Self {
            symbol,
            provider,
            messages,
        }
    }

    pub(crate) fn log_retry(&self, attempt: usize, backoff: Duration, err: &ProviderError) {
        tracing::warn!(
            symbol = %self.symbol,
            provider = self.provider,
            attempt,
            backoff_ms = duration_to_millis(backoff),
            error = %err,
            "{}",
            self.messages.retry
        );
    }

    pub(crate) fn log_exhausted(&self, attempt: usize, err: &ProviderError) {
        tracing::error!(
            symbol = %self.symbol,
            provider = self.provider,
            attempt,
            error = %err,
            "{}",
            self.messages.exhausted
        );
    }

    pub(crate) fn log_terminal(&self, attempt: usize, err: &ProviderError) {
        tracing::debug!(
            symbol = %self.symbol,
            provider = self.provider,
            attempt,
            error = %err,
            "{}",
            self.messages.terminal
        );
    }

    pub(crate) fn log_cancelled(&self, attempt: usize) {
        tracing::debug!(
            symbol = %self.symbol,
            provider = self.provider,
            attempt,
            "{}",
            self.messages.cancelled
        );
    }
}

fn duration_to_millis(backoff: Duration) -> u64 {
    backoff.as_millis().min(u128::from(u64::MAX)) as u64
}

pub(crate) const QUOTE_FETCH_RETRY: RetryMessages = RetryMessages {
    retry: "quote fetch failed; retrying",
    exhausted: "quote fetch exhausted retries",
    terminal: "quote fetch failed permanently; not retrying",
    cancelled: "quote fetch abandoned at run deadline",
};
