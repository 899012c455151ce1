use std::sync::Arc;
use std::time::Duration;

use crate::support::helpers::{dec, init_tracing, store_holding, sym};
use crate::support::mock_fmp::{quote_json, MockFmp, MockFmpServer, QuoteReply, MOCK_API_KEY};
use anyhow::Result;
use fundamentals_refresh::{
    FetchFailure, FmpOptions, FmpProvider, FundamentalsProvider, ProviderError, RefreshConfig,
    RunController, RunStatus,
};
use hyper::StatusCode;
use tokio::net::TcpListener;

async fn start(fmp: &MockFmp) -> Result<(MockFmpServer, FmpProvider)> {
    let server = MockFmpServer::start(fmp.clone()).await?;
    let provider = FmpProvider::new(
        FmpOptions::new(MOCK_API_KEY)
            .with_base_url(server.url())
            .with_request_timeout(Duration::from_millis(500)),
    )?;
    Ok((server, provider))
}

#[tokio::test]
async fn quote_fields_are_mapped_onto_the_payload() -> Result<()> {
    init_tracing();
    let fmp = MockFmp::new();
    fmp.reply("AAPL", QuoteReply::Quote(quote_json("AAPL", 190.0)));
    let (server, provider) = start(&fmp).await?;

    let payload = provider.fetch(&sym("AAPL")).await?;
    assert_eq!(payload.price, Some(dec(190.0)));
    assert_eq!(payload.previous_close, Some(dec(189.0)));
    assert_eq!(payload.change, Some(dec(1.0)));
    assert_eq!(payload.market_cap, Some(3_000_000_000_000));
    assert_eq!(payload.volume, Some(51_000_000));
    assert_eq!(payload.avg_volume, Some(48_000_000));
    assert_eq!(payload.price_avg_200, Some(dec(180.0)));
    assert_eq!(payload.exchange.as_deref(), Some("NASDAQ"));
    assert_eq!(payload.timestamp, Some(1_717_000_000));
    assert_eq!(fmp.hits("AAPL"), 1);

    let metrics = provider.metrics();
    assert_eq!(metrics.total_requests, 1);
    assert_eq!(metrics.total_errors, 0);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn empty_answers_and_404_mean_not_found() -> Result<()> {
    init_tracing();
    let fmp = MockFmp::new();
    fmp.reply("GONE", QuoteReply::Empty);
    fmp.reply("DELISTED", QuoteReply::Status(StatusCode::NOT_FOUND));
    let (server, provider) = start(&fmp).await?;

    for raw in ["GONE", "DELISTED"] {
        let err = provider.fetch(&sym(raw)).await.unwrap_err();
        assert_eq!(err, ProviderError::NotFound { symbol: sym(raw) });
    }
    assert_eq!(provider.metrics().total_not_found, 2);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn server_errors_and_throttling_are_retryable() -> Result<()> {
    init_tracing();
    let fmp = MockFmp::new();
    fmp.reply("DOWN", QuoteReply::Status(StatusCode::INTERNAL_SERVER_ERROR));
    fmp.reply("BUSY", QuoteReply::Status(StatusCode::TOO_MANY_REQUESTS));
    let (server, provider) = start(&fmp).await?;

    for raw in ["DOWN", "BUSY"] {
        let err = provider.fetch(&sym(raw)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)), "{raw}: {err:?}");
        assert!(err.is_retryable());
    }

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn garbage_bodies_are_malformed() -> Result<()> {
    init_tracing();
    let fmp = MockFmp::new();
    fmp.reply("JUNK", QuoteReply::Raw("<html>oops</html>".into()));
    fmp.reply("NUMS", QuoteReply::Raw("[42]".into()));
    let (server, provider) = start(&fmp).await?;

    for raw in ["JUNK", "NUMS"] {
        let err = provider.fetch(&sym(raw)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)), "{raw}: {err:?}");
        assert!(!err.is_retryable());
    }

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn bad_api_key_is_rejected() -> Result<()> {
    init_tracing();
    let fmp = MockFmp::new();
    let server = MockFmpServer::start(fmp.clone()).await?;
    let provider = FmpProvider::new(FmpOptions::new("wrong-key").with_base_url(server.url()))?;

    let err = provider.fetch(&sym("AAPL")).await.unwrap_err();
    assert!(matches!(err, ProviderError::Rejected(_)), "{err:?}");
    assert!(!err.is_retryable());
    assert_eq!(fmp.requests(), 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn slow_responses_time_out_as_transport_errors() -> Result<()> {
    init_tracing();
    let fmp = MockFmp::new();
    fmp.reply(
        "SLOW",
        QuoteReply::Delayed(Duration::from_secs(3), quote_json("SLOW", 1.0)),
    );
    let (server, provider) = start(&fmp).await?;

    let err = provider.fetch(&sym("SLOW")).await.unwrap_err();
    assert!(matches!(err, ProviderError::Transport(_)), "{err:?}");
    assert_eq!(provider.metrics().total_timeouts, 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn connection_errors_do_not_leak_the_api_key() -> Result<()> {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let provider = FmpProvider::new(
        FmpOptions::new("super-secret-key").with_base_url(format!("http://{addr}")),
    )?;
    let err = provider.fetch(&sym("AAPL")).await.unwrap_err();

    assert!(matches!(err, ProviderError::Transport(_)), "{err:?}");
    assert!(!err.to_string().contains("super-secret-key"));
    Ok(())
}

#[tokio::test]
async fn controller_retries_flaky_quotes_over_http() -> Result<()> {
    init_tracing();
    let fmp = MockFmp::new();
    fmp.reply("AAPL", QuoteReply::Quote(quote_json("AAPL", 190.0)));
    fmp.reply(
        "MSFT",
        QuoteReply::FailThenQuote(2, quote_json("MSFT", 410.0)),
    );
    fmp.reply("GONE", QuoteReply::Empty);
    let (server, provider) = start(&fmp).await?;

    let store = store_holding(&["AAPL", "MSFT", "GONE"]);
    let config = RefreshConfig::builder()
        .concurrency(2)
        .initial_backoff(Duration::from_millis(10))
        .max_backoff(Duration::from_millis(20))
        .build()?;
    let controller = RunController::new(
        config,
        Arc::new(provider.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    );

    let summary = controller.execute().await?;
    assert_eq!(summary.created, 2);
    assert_eq!(summary.failure_for(&sym("GONE")), Some(&FetchFailure::NotFound));
    assert_eq!(summary.status, RunStatus::Success);
    assert_eq!(fmp.hits("MSFT"), 3);
    assert_eq!(summary.telemetry.retries, 2);
    assert_eq!(summary.telemetry.provider_calls, 5);
    assert_eq!(
        store.fundamentals(&sym("MSFT")).and_then(|row| row.payload.price),
        Some(dec(410.0))
    );

    server.shutdown().await;
    Ok(())
}
