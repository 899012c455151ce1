use std::sync::Arc;
use std::time::Duration;

use crate::support::fixtures::TestDatabase;
use crate::support::helpers::{dec, init_tracing, payload, sym, syms, Script, ScriptedProvider};
use anyhow::Result;
use chrono::Utc;
use fundamentals_refresh::{
    ActiveSetResolver, ActiveSetSource, FundamentalsPayload, FundamentalsStore, RefreshConfig,
    RunController, SkipReason, SqliteStore, UpsertOutcome,
};

/// AAPL and MSFT held, MSFT and TSLA watched, OLD held but inactive,
/// IBM registered with no users.
fn seeded_database() -> Result<TestDatabase> {
    let db = TestDatabase::create()?;
    let aapl = db.add_security("AAPL", true)?;
    let msft = db.add_security("MSFT", true)?;
    let tsla = db.add_security("TSLA", true)?;
    let old = db.add_security("OLD", false)?;
    db.add_security("IBM", true)?;

    db.add_holding(1, aapl)?;
    db.add_holding(2, aapl)?;
    db.add_holding(1, msft)?;
    db.add_holding(3, old)?;
    db.add_watchlist_item(1, msft)?;
    db.add_watchlist_item(2, tsla)?;
    Ok(db)
}

#[tokio::test]
async fn snapshot_reads_active_holdings_and_watchlists() -> Result<()> {
    init_tracing();
    let db = seeded_database()?;
    let store = Arc::new(SqliteStore::open(db.path())?);

    let snapshot = store.snapshot().await?;
    let mut holdings = snapshot.holdings.clone();
    holdings.sort();
    assert_eq!(holdings, syms(&["AAPL", "AAPL", "MSFT"]));
    assert_eq!(snapshot.watchlist.len(), 2);

    let active = ActiveSetResolver::new(store).resolve().await?;
    assert_eq!(active.to_vec(), syms(&["AAPL", "MSFT", "TSLA"]));
    Ok(())
}

#[tokio::test]
async fn upsert_creates_then_updates_one_row() -> Result<()> {
    init_tracing();
    let db = seeded_database()?;
    let store = SqliteStore::open(db.path())?;

    let first = store.upsert(&sym("AAPL"), &payload(190.0), Utc::now()).await?;
    assert_eq!(first, UpsertOutcome::Created);
    let second = store.upsert(&sym("AAPL"), &payload(191.5), Utc::now()).await?;
    assert_eq!(second, UpsertOutcome::Updated);

    assert_eq!(db.fundamentals_rows()?, 1);
    let (price, volume, exchange) = db.stored_row("AAPL")?;
    assert_eq!(price, Some(191.5));
    assert_eq!(volume, Some(1_000));
    assert_eq!(exchange.as_deref(), Some("NASDAQ"));
    Ok(())
}

#[tokio::test]
async fn missing_fields_keep_previous_values() -> Result<()> {
    init_tracing();
    let db = seeded_database()?;
    let store = SqliteStore::open(db.path())?;

    store.upsert(&sym("MSFT"), &payload(410.0), Utc::now()).await?;
    let partial = FundamentalsPayload {
        price: Some(dec(415.0)),
        ..FundamentalsPayload::default()
    };
    store.upsert(&sym("MSFT"), &partial, Utc::now()).await?;

    let (price, volume, exchange) = db.stored_row("MSFT")?;
    assert_eq!(price, Some(415.0));
    assert_eq!(volume, Some(1_000));
    assert_eq!(exchange.as_deref(), Some("NASDAQ"));
    Ok(())
}

#[tokio::test]
async fn unknown_security_is_an_error() -> Result<()> {
    init_tracing();
    let db = seeded_database()?;
    let store = SqliteStore::open(db.path())?;

    let err = store
        .upsert(&sym("NOPE"), &payload(1.0), Utc::now())
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("unknown security NOPE"));
    assert_eq!(db.fundamentals_rows()?, 0);
    Ok(())
}

#[tokio::test]
async fn last_refreshed_reports_only_requested_symbols() -> Result<()> {
    init_tracing();
    let db = seeded_database()?;
    let store = SqliteStore::open(db.path())?;
    let at = Utc::now() - chrono::Duration::hours(2);

    store.upsert(&sym("AAPL"), &payload(1.0), at).await?;
    store.upsert(&sym("TSLA"), &payload(2.0), at).await?;

    let refreshed = store.last_refreshed(&syms(&["AAPL", "MSFT"])).await?;
    assert_eq!(refreshed.len(), 1);
    let stored = refreshed[&sym("AAPL")];
    assert!((stored - at).num_milliseconds().abs() < 1);
    Ok(())
}

#[tokio::test]
async fn full_run_against_sqlite_is_idempotent() -> Result<()> {
    init_tracing();
    let db = seeded_database()?;
    let store = Arc::new(SqliteStore::open(db.path())?);
    let config = || {
        RefreshConfig::builder()
            .initial_backoff(Duration::from_millis(10))
            .max_backoff(Duration::from_millis(20))
            .build()
    };
    let provider = ScriptedProvider::new([("TSLA", Script::NotFound)]);

    let first = RunController::new(config()?, Arc::new(provider.clone()), store.clone(), store.clone())
        .execute()
        .await?;
    assert_eq!(first.candidates, 3);
    assert_eq!(first.created, 2);
    assert_eq!(first.failed, 1);
    assert_eq!(db.fundamentals_rows()?, 2);

    let second = RunController::new(config()?, Arc::new(provider), store.clone(), store.clone())
        .execute()
        .await?;
    assert_eq!(second.updated, 2);
    assert_eq!(second.created, 0);
    assert_eq!(db.fundamentals_rows()?, 2);
    Ok(())
}

#[tokio::test]
async fn freshness_skip_reads_stored_timestamps() -> Result<()> {
    init_tracing();
    let db = seeded_database()?;
    let store = Arc::new(SqliteStore::open(db.path())?);
    store.upsert(&sym("AAPL"), &payload(1.0), Utc::now()).await?;

    let provider = ScriptedProvider::default();
    let config = RefreshConfig::builder()
        .skip_fresher_than(Duration::from_secs(3600))
        .build()?;
    let summary = RunController::new(config, Arc::new(provider.clone()), store.clone(), store)
        .execute()
        .await?;

    assert_eq!(summary.skip_reason(&sym("AAPL")), Some(SkipReason::Fresh));
    assert_eq!(provider.calls_for("AAPL"), 0);
    assert_eq!(summary.created, 2);
    Ok(())
}
