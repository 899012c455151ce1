//! SQLite backend over the securities schema: `securities_security`,
//! `securities_holding`, `securities_watchlistitem` and
//! `securities_securityfundamentals` (unique on `security_id`).
//!
//! Every blocking call runs on the blocking thread pool with a pooled
//! connection; nothing here holds a connection across an await point.

use crate::provider::FundamentalsPayload;
use crate::securities::Symbol;
use crate::store::backend::{ActiveSetSource, FundamentalsStore, SourceSnapshot, UpsertOutcome};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::future::BoxFuture;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub type DbPool = Pool<SqliteConnectionManager>;

const DEFAULT_POOL_SIZE: u32 = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
/// Scale of the price columns (`DECIMAL(12, 4)`).
const PRICE_DECIMAL_PLACES: u32 = 4;

const HOLDING_SYMBOLS: &str = "SELECT s.symbol FROM securities_holding h \
     JOIN securities_security s ON s.id = h.security_id \
     WHERE s.is_active = 1";

const WATCHLIST_SYMBOLS: &str = "SELECT s.symbol FROM securities_watchlistitem w \
     JOIN securities_security s ON s.id = w.security_id \
     WHERE s.is_active = 1";

const UPSERT_FUNDAMENTALS: &str = "INSERT INTO securities_securityfundamentals (
        security_id, current_price, previous_close, day_change, market_cap, volume,
        avg_volume, day_high, day_low, open_price, year_high, year_low, price_avg_50,
        price_avg_200, exchange_name, data_timestamp, last_updated
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
     ON CONFLICT(security_id) DO UPDATE SET
        current_price = COALESCE(excluded.current_price, securities_securityfundamentals.current_price),
        previous_close = COALESCE(excluded.previous_close, securities_securityfundamentals.previous_close),
        day_change = COALESCE(excluded.day_change, securities_securityfundamentals.day_change),
        market_cap = COALESCE(excluded.market_cap, securities_securityfundamentals.market_cap),
        volume = COALESCE(excluded.volume, securities_securityfundamentals.volume),
        avg_volume = COALESCE(excluded.avg_volume, securities_securityfundamentals.avg_volume),
        day_high = COALESCE(excluded.day_high, securities_securityfundamentals.day_high),
        day_low = COALESCE(excluded.day_low, securities_securityfundamentals.day_low),
        open_price = COALESCE(excluded.open_price, securities_securityfundamentals.open_price),
        year_high = COALESCE(excluded.year_high, securities_securityfundamentals.year_high),
        year_low = COALESCE(excluded.year_low, securities_securityfundamentals.year_low),
        price_avg_50 = COALESCE(excluded.price_avg_50, securities_securityfundamentals.price_avg_50),
        price_avg_200 = COALESCE(excluded.price_avg_200, securities_securityfundamentals.price_avg_200),
        exchange_name = COALESCE(excluded.exchange_name, securities_securityfundamentals.exchange_name),
        data_timestamp = COALESCE(excluded.data_timestamp, securities_securityfundamentals.data_timestamp),
        last_updated = excluded.last_updated";

const LAST_REFRESHED: &str = "SELECT s.symbol, f.last_updated FROM securities_securityfundamentals f \
     JOIN securities_security s ON s.id = f.security_id";

#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Opens a connection pool on an existing database. The schema is owned
    /// by the application; this never creates the file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_pool_size(path, DEFAULT_POOL_SIZE)
    }

    pub fn open_with_pool_size(path: impl AsRef<Path>, max_size: u32) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("database not found at {}", path.display());
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI;
        let manager = SqliteConnectionManager::file(path)
            .with_flags(flags)
            .with_init(|conn| conn.busy_timeout(BUSY_TIMEOUT));
        let pool = Pool::builder()
            .max_size(max_size.max(1))
            .connection_timeout(BUSY_TIMEOUT)
            .build(manager)
            .with_context(|| format!("failed to open database pool for {}", path.display()))?;

        tracing::debug!(path = %path.display(), max_size, "opened fundamentals database");
        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    async fn with_connection<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().context("failed to check out database connection")?;
            op(&mut *conn)
        })
        .await
        .map_err(|err| anyhow!("database task failed: {err}"))?
    }
}

impl ActiveSetSource for SqliteStore {
    fn snapshot(&self) -> BoxFuture<'_, Result<SourceSnapshot>> {
        Box::pin(self.with_connection(read_snapshot))
    }
}

impl FundamentalsStore for SqliteStore {
    fn upsert<'a>(
        &'a self,
        symbol: &'a Symbol,
        payload: &'a FundamentalsPayload,
        refreshed_at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<UpsertOutcome>> {
        let symbol = symbol.clone();
        let payload = payload.clone();
        Box::pin(self.with_connection(move |conn| {
            write_fundamentals(conn, &symbol, &payload, refreshed_at)
        }))
    }

    fn last_refreshed<'a>(
        &'a self,
        symbols: &'a [Symbol],
    ) -> BoxFuture<'a, Result<HashMap<Symbol, DateTime<Utc>>>> {
        let wanted: HashSet<Symbol> = symbols.iter().cloned().collect();
        Box::pin(self.with_connection(move |conn| read_last_refreshed(conn, &wanted)))
    }
}

// Both projections are read inside one transaction so they observe the same
// database state.
fn read_snapshot(conn: &mut Connection) -> Result<SourceSnapshot> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Deferred)
        .context("failed to begin snapshot transaction")?;
    let holdings = query_symbols(&tx, HOLDING_SYMBOLS).context("failed to read holdings")?;
    let watchlist = query_symbols(&tx, WATCHLIST_SYMBOLS).context("failed to read watchlists")?;
    tx.commit().context("failed to close snapshot transaction")?;

    Ok(SourceSnapshot {
        holdings,
        watchlist,
    })
}

fn query_symbols(conn: &Connection, sql: &str) -> Result<Vec<Symbol>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut symbols = Vec::new();
    for raw in rows {
        let raw = raw?;
        match Symbol::new(&raw) {
            Ok(symbol) => symbols.push(symbol),
            Err(err) => tracing::warn!(raw = %raw, error = %err, "skipping unusable symbol"),
        }
    }
    Ok(symbols)
}

fn write_fundamentals(
    conn: &mut Connection,
    symbol: &Symbol,
    payload: &FundamentalsPayload,
    refreshed_at: DateTime<Utc>,
) -> Result<UpsertOutcome> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .with_context(|| format!("failed to begin write for {symbol}"))?;

    let security_id: i64 = tx
        .query_row(
            "SELECT id FROM securities_security WHERE symbol = ?1",
            params![symbol.as_str()],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| anyhow!("unknown security {symbol}"))?;

    let existed: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM securities_securityfundamentals WHERE security_id = ?1)",
        params![security_id],
        |row| row.get(0),
    )?;

    tx.execute(
        UPSERT_FUNDAMENTALS,
        params![
            security_id,
            stored_decimal(payload.price),
            stored_decimal(payload.previous_close),
            stored_decimal(payload.change),
            payload.market_cap,
            payload.volume,
            payload.avg_volume,
            stored_decimal(payload.day_high),
            stored_decimal(payload.day_low),
            stored_decimal(payload.open),
            stored_decimal(payload.year_high),
            stored_decimal(payload.year_low),
            stored_decimal(payload.price_avg_50),
            stored_decimal(payload.price_avg_200),
            payload.exchange,
            payload.timestamp,
            format_timestamp(refreshed_at),
        ],
    )
    .with_context(|| format!("failed to upsert fundamentals for {symbol}"))?;
    tx.commit()
        .with_context(|| format!("failed to commit fundamentals for {symbol}"))?;

    Ok(if existed {
        UpsertOutcome::Updated
    } else {
        UpsertOutcome::Created
    })
}

fn read_last_refreshed(
    conn: &mut Connection,
    wanted: &HashSet<Symbol>,
) -> Result<HashMap<Symbol, DateTime<Utc>>> {
    let mut stmt = conn.prepare(LAST_REFRESHED)?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
    })?;

    let mut refreshed = HashMap::new();
    for row in rows {
        let (raw, stamp) = row?;
        let Ok(symbol) = Symbol::new(&raw) else {
            continue;
        };
        if !wanted.contains(&symbol) {
            continue;
        }
        if let Some(at) = stamp.as_deref().and_then(parse_timestamp) {
            refreshed.insert(symbol, at);
        }
    }
    Ok(refreshed)
}

// Bound as text so SQLite's numeric affinity parses the exact literal, the
// same way Django writes decimal columns.
fn stored_decimal(value: Option<Decimal>) -> Option<String> {
    value.map(|value| value.round_dp(PRICE_DECIMAL_PLACES).to_string())
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}
