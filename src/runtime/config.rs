use crate::runtime::telemetry;
use crate::securities::Symbol;
use anyhow::{bail, Result};
use std::collections::BTreeSet;
use std::time::Duration;

pub const DEFAULT_RATE_LIMIT: usize = 250;
/// Hard per-window cap enforced by the upstream provider.
pub const DEFAULT_PROVIDER_RATE_CAP: usize = 300;
pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_MAX_RETRIES: usize = 2;
pub const DEFAULT_FAILURE_RATIO_THRESHOLD: f64 = 0.5;
const DEFAULT_RATE_WINDOW_SECS: u64 = 60;
const DEFAULT_DEADLINE_SECS: u64 = 50 * 60;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;
const DEFAULT_MAX_BACKOFF_SECS: u64 = 5;

/// Settings for one refresh run.
///
/// All instances must be constructed via [`RefreshConfig::builder`] or [`RefreshConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshConfig {
    rate_limit: usize,
    rate_window: Duration,
    provider_rate_cap: usize,
    concurrency: usize,
    deadline: Duration,
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
    failure_ratio_threshold: f64,
    progress_interval: Duration,
    dry_run: bool,
    verbose: bool,
    symbols: Option<BTreeSet<Symbol>>,
    skip_fresher_than: Option<Duration>,
}

pub struct RefreshConfigParams {
    pub rate_limit: usize,
    pub rate_window: Duration,
    pub provider_rate_cap: usize,
    pub concurrency: usize,
    pub deadline: Duration,
    pub max_retries: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub failure_ratio_threshold: f64,
    pub progress_interval: Duration,
    pub dry_run: bool,
    pub verbose: bool,
    pub symbols: Option<Vec<String>>,
    pub skip_fresher_than: Option<Duration>,
}

impl Default for RefreshConfigParams {
    fn default() -> Self {
        Self {
            rate_limit: DEFAULT_RATE_LIMIT,
            rate_window: Duration::from_secs(DEFAULT_RATE_WINDOW_SECS),
            provider_rate_cap: DEFAULT_PROVIDER_RATE_CAP,
            concurrency: DEFAULT_CONCURRENCY,
            deadline: Duration::from_secs(DEFAULT_DEADLINE_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_secs(DEFAULT_MAX_BACKOFF_SECS),
            failure_ratio_threshold: DEFAULT_FAILURE_RATIO_THRESHOLD,
            progress_interval: telemetry::DEFAULT_PROGRESS_INTERVAL,
            dry_run: false,
            verbose: false,
            symbols: None,
            skip_fresher_than: None,
        }
    }
}

impl RefreshConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> RefreshConfigBuilder {
        RefreshConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: RefreshConfigParams) -> Result<Self> {
        let RefreshConfigParams {
            rate_limit,
            rate_window,
            provider_rate_cap,
            concurrency,
            deadline,
            max_retries,
            initial_backoff,
            max_backoff,
            failure_ratio_threshold,
            progress_interval,
            dry_run,
            verbose,
            symbols,
            skip_fresher_than,
        } = params;

        let config = Self {
            rate_limit,
            rate_window,
            provider_rate_cap,
            concurrency,
            deadline,
            max_retries,
            initial_backoff,
            max_backoff,
            failure_ratio_threshold,
            progress_interval,
            dry_run,
            verbose,
            symbols: symbols.map(parse_symbols).transpose()?,
            skip_fresher_than,
        };

        config.validate()?;
        Ok(config)
    }

    /// Maximum provider calls granted per [`rate_window`](Self::rate_window).
    pub fn rate_limit(&self) -> usize {
        self.rate_limit
    }

    pub fn rate_window(&self) -> Duration {
        self.rate_window
    }

    pub fn provider_rate_cap(&self) -> usize {
        self.provider_rate_cap
    }

    /// Number of fetch workers (simultaneous in-flight provider calls).
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Maximum wall-clock duration of one run.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Extra attempts allowed for transport failures.
    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Failure ratio above which the run is reported as degraded.
    pub fn failure_ratio_threshold(&self) -> f64 {
        self.failure_ratio_threshold
    }

    pub fn progress_interval(&self) -> Duration {
        self.progress_interval
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Restricts the run to these symbols when set.
    pub fn symbols(&self) -> Option<&BTreeSet<Symbol>> {
        self.symbols.as_ref()
    }

    /// Symbols refreshed more recently than this are skipped when set.
    pub fn skip_fresher_than(&self) -> Option<Duration> {
        self.skip_fresher_than
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit == 0 {
            bail!("rate_limit must be greater than 0");
        }

        if self.rate_limit > self.provider_rate_cap {
            bail!(
                "rate_limit ({}) must not exceed the provider cap of {} calls per window",
                self.rate_limit,
                self.provider_rate_cap
            );
        }

        if self.rate_window.is_zero() {
            bail!("rate_window must be greater than 0");
        }

        if self.concurrency == 0 {
            bail!("concurrency must be greater than 0");
        }

        if self.deadline.is_zero() {
            bail!("deadline must be greater than 0");
        }

        if self.initial_backoff.is_zero() {
            bail!("initial_backoff must be greater than 0");
        }

        if self.max_backoff < self.initial_backoff {
            bail!("max_backoff must be at least initial_backoff");
        }

        if !(0.0..=1.0).contains(&self.failure_ratio_threshold) {
            bail!("failure_ratio_threshold must be between 0.0 and 1.0");
        }

        if self.progress_interval.is_zero() {
            bail!("progress_interval must be greater than 0");
        }

        if self.skip_fresher_than.is_some_and(|age| age.is_zero()) {
            bail!("skip_fresher_than must be greater than 0 when set");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct RefreshConfigBuilder {
    rate_limit: Option<usize>,
    rate_window: Option<Duration>,
    provider_rate_cap: Option<usize>,
    concurrency: Option<usize>,
    deadline: Option<Duration>,
    max_retries: Option<usize>,
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    failure_ratio_threshold: Option<f64>,
    progress_interval: Option<Duration>,
    dry_run: bool,
    verbose: bool,
    symbols: Option<Vec<String>>,
    skip_fresher_than: Option<Duration>,
}

impl RefreshConfigBuilder {
    pub fn rate_limit(mut self, calls: usize) -> Self {
        self.rate_limit = Some(calls);
        self
    }

    pub fn rate_window(mut self, window: Duration) -> Self {
        self.rate_window = Some(window);
        self
    }

    pub fn provider_rate_cap(mut self, calls: usize) -> Self {
        self.provider_rate_cap = Some(calls);
        self
    }

    pub fn concurrency(mut self, workers: usize) -> Self {
        self.concurrency = Some(workers);
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = Some(backoff);
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = Some(backoff);
        self
    }

    pub fn failure_ratio_threshold(mut self, ratio: f64) -> Self {
        self.failure_ratio_threshold = Some(ratio);
        self
    }

    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = Some(interval);
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbols = Some(symbols.into_iter().map(Into::into).collect());
        self
    }

    pub fn skip_fresher_than(mut self, age: Duration) -> Self {
        self.skip_fresher_than = Some(age);
        self
    }

    pub fn build(self) -> Result<RefreshConfig> {
        let defaults = RefreshConfigParams::default();
        let params = RefreshConfigParams {
            rate_limit: self.rate_limit.unwrap_or(defaults.rate_limit),
            rate_window: self.rate_window.unwrap_or(defaults.rate_window),
            provider_rate_cap: self.provider_rate_cap.unwrap_or(defaults.provider_rate_cap),
            concurrency: self.concurrency.unwrap_or(defaults.concurrency),
            deadline: self.deadline.unwrap_or(defaults.deadline),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            initial_backoff: self.initial_backoff.unwrap_or(defaults.initial_backoff),
            max_backoff: self.max_backoff.unwrap_or(defaults.max_backoff),
            failure_ratio_threshold: self
                .failure_ratio_threshold
                .unwrap_or(defaults.failure_ratio_threshold),
            progress_interval: self.progress_interval.unwrap_or(defaults.progress_interval),
            dry_run: self.dry_run,
            verbose: self.verbose,
            symbols: self.symbols,
            skip_fresher_than: self.skip_fresher_than,
        };

        RefreshConfig::new(params)
    }
}

fn parse_symbols(raw: Vec<String>) -> Result<BTreeSet<Symbol>> {
    let mut symbols = BTreeSet::new();
    for entry in raw {
        match Symbol::new(&entry) {
            Ok(symbol) => {
                symbols.insert(symbol);
            }
            Err(_) => bail!("symbols cannot contain empty entries"),
        }
    }
    if symbols.is_empty() {
        bail!("symbols must name at least one symbol when set");
    }
    Ok(symbols)
}
