//! Connection knobs for the Financial Modeling Prep client along with the
//! validation applied before any request is issued.

use anyhow::{bail, Result};
use std::time::Duration;

pub const DEFAULT_FMP_BASE_URL: &str = "https://financialmodelingprep.com/stable";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct FmpOptions {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

impl FmpOptions {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_FMP_BASE_URL.to_owned(),
            api_key: api_key.into(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let base_url = self.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            bail!("base_url must start with http:// or https://");
        }
        if self.api_key.trim().is_empty() {
            bail!("Financial Modeling Prep API key is required (set FMP_API_KEY)");
        }
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }
        Ok(())
    }

    pub(crate) fn quote_url(&self) -> String {
        format!("{}/quote", self.base_url.trim().trim_end_matches('/'))
    }
}
