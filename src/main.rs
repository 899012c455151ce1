//! `refresh-active-fundamentals`: refreshes fundamentals for every security
//! currently held or watched by a user.
//!
//! Exit status: 0 when the run succeeds (individual symbols may still fail),
//! 1 when the failure ratio exceeds the threshold, 2 on a fatal error.

use anyhow::{Context, Result};
use clap::Parser;
use fundamentals_refresh::{
    init_tracing, FmpOptions, FmpProvider, FundamentalsProvider, RefreshConfig, RunController,
    RunSummary, SqliteStore, StubProvider, DEFAULT_FMP_BASE_URL,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const FATAL_EXIT: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "refresh-active-fundamentals",
    about = "Refresh fundamentals for securities in user holdings and watchlists"
)]
struct Cli {
    /// Provider calls allowed per minute.
    #[arg(long, default_value_t = fundamentals_refresh::runtime::config::DEFAULT_RATE_LIMIT)]
    rate_limit: usize,

    /// Number of concurrent fetch workers.
    #[arg(long, default_value_t = fundamentals_refresh::runtime::config::DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Maximum run duration in seconds.
    #[arg(long, default_value_t = 50 * 60)]
    deadline_secs: u64,

    /// Extra attempts for transport failures.
    #[arg(long, default_value_t = fundamentals_refresh::runtime::config::DEFAULT_MAX_RETRIES)]
    max_retries: usize,

    /// Failure ratio above which the run exits non-zero.
    #[arg(
        long,
        default_value_t = fundamentals_refresh::runtime::config::DEFAULT_FAILURE_RATIO_THRESHOLD
    )]
    failure_threshold: f64,

    /// Resolve and report the active set without calling the provider or writing data.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Log every symbol as it is processed.
    #[arg(long, short, default_value_t = false)]
    verbose: bool,

    /// Only refresh these symbols (must also be active).
    #[arg(long, num_args = 1..)]
    symbols: Vec<String>,

    /// Skip symbols refreshed within this many hours.
    #[arg(long)]
    skip_fresher_than_hours: Option<u64>,

    /// SQLite database holding the securities tables.
    #[arg(long, env = "FUNDAMENTALS_DATABASE")]
    database: PathBuf,

    /// Financial Modeling Prep API key.
    #[arg(long, env = "FMP_API_KEY", hide_env_values = true)]
    fmp_api_key: Option<String>,

    /// Financial Modeling Prep base URL.
    #[arg(long, default_value = DEFAULT_FMP_BASE_URL)]
    fmp_base_url: String,

    /// Print the run summary as JSON on stdout.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let (controller, fmp) = match build_controller(&cli) {
        Ok(built) => built,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "failed to start refresh run");
            return ExitCode::from(FATAL_EXIT);
        }
    };

    let outcome = controller.run_until_ctrl_c().await;
    if let Some(fmp) = fmp {
        let metrics = fmp.metrics();
        tracing::info!(
            requests = metrics.total_requests,
            errors = metrics.total_errors,
            not_found = metrics.total_not_found,
            timeouts = metrics.total_timeouts,
            avg_latency_ms = format!("{:.1}", metrics.average_latency_ms),
            "provider metrics"
        );
    }

    match outcome {
        Ok(summary) => {
            if cli.json {
                if let Err(err) = print_summary(&summary) {
                    tracing::error!(error = %format!("{err:#}"), "failed to print summary");
                }
            }
            ExitCode::from(summary.status.exit_code() as u8)
        }
        Err(err) => {
            tracing::error!(kind = err.kind(), error = %err, "refresh run aborted");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn build_controller(cli: &Cli) -> Result<(RunController, Option<FmpProvider>)> {
    let mut builder = RefreshConfig::builder()
        .rate_limit(cli.rate_limit)
        .concurrency(cli.concurrency)
        .deadline(Duration::from_secs(cli.deadline_secs))
        .max_retries(cli.max_retries)
        .failure_ratio_threshold(cli.failure_threshold)
        .dry_run(cli.dry_run)
        .verbose(cli.verbose);
    if !cli.symbols.is_empty() {
        builder = builder.symbols(cli.symbols.iter().cloned());
    }
    if let Some(hours) = cli.skip_fresher_than_hours {
        builder = builder.skip_fresher_than(Duration::from_secs(hours.saturating_mul(3600)));
    }
    let config = builder.build().context("invalid refresh configuration")?;

    // A dry run never reaches the provider, so it does not need an API key.
    let fmp = if config.dry_run() {
        None
    } else {
        let options = FmpOptions::new(cli.fmp_api_key.clone().unwrap_or_default())
            .with_base_url(cli.fmp_base_url.clone());
        Some(FmpProvider::new(options).context("failed to configure provider")?)
    };
    let provider: Arc<dyn FundamentalsProvider> = match &fmp {
        Some(fmp) => Arc::new(fmp.clone()),
        None => Arc::new(StubProvider::new()),
    };
    let store = Arc::new(SqliteStore::open(&cli.database)?);

    Ok((RunController::new(config, provider, store.clone(), store), fmp))
}

fn print_summary(summary: &RunSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary).context("failed to encode summary")?;
    println!("{json}");
    Ok(())
}
