use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use tempfile::TempDir;

const SCHEMA: &str = "
CREATE TABLE securities_security (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol VARCHAR(20) NOT NULL UNIQUE,
    name VARCHAR(255) NOT NULL DEFAULT '',
    is_active BOOL NOT NULL DEFAULT 1
);
CREATE TABLE securities_holding (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    security_id INTEGER NOT NULL REFERENCES securities_security (id),
    shares DECIMAL NOT NULL DEFAULT 0
);
CREATE TABLE securities_watchlistitem (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    security_id INTEGER NOT NULL REFERENCES securities_security (id)
);
CREATE TABLE securities_securityfundamentals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    security_id INTEGER NOT NULL UNIQUE REFERENCES securities_security (id),
    current_price DECIMAL NULL,
    previous_close DECIMAL NULL,
    day_change DECIMAL NULL,
    market_cap BIGINT NULL,
    volume BIGINT NULL,
    avg_volume BIGINT NULL,
    day_high DECIMAL NULL,
    day_low DECIMAL NULL,
    open_price DECIMAL NULL,
    year_high DECIMAL NULL,
    year_low DECIMAL NULL,
    price_avg_50 DECIMAL NULL,
    price_avg_200 DECIMAL NULL,
    exchange_name VARCHAR(50) NULL,
    data_timestamp BIGINT NULL,
    last_updated DATETIME NOT NULL
);
";

/// Temporary SQLite database carrying the securities schema.
pub struct TestDatabase {
    _dir: TempDir,
    path: PathBuf,
}

impl TestDatabase {
    pub fn create() -> Result<Self> {
        let dir = tempfile::tempdir().context("failed to create temp dir")?;
        let path = dir.path().join("portfolio.sqlite3");
        let conn = Connection::open(&path).context("failed to create database")?;
        conn.execute_batch(SCHEMA)
            .context("failed to create schema")?;
        Ok(Self { _dir: dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.path).context("failed to open test database")
    }

    pub fn add_security(&self, symbol: &str, active: bool) -> Result<i64> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO securities_security (symbol, name, is_active) VALUES (?1, ?2, ?3)",
            params![symbol, format!("{symbol} Inc."), active],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn add_holding(&self, user_id: i64, security_id: i64) -> Result<()> {
        self.connect()?.execute(
            "INSERT INTO securities_holding (user_id, security_id, shares) VALUES (?1, ?2, 10)",
            params![user_id, security_id],
        )?;
        Ok(())
    }

    pub fn add_watchlist_item(&self, user_id: i64, security_id: i64) -> Result<()> {
        self.connect()?.execute(
            "INSERT INTO securities_watchlistitem (user_id, security_id) VALUES (?1, ?2)",
            params![user_id, security_id],
        )?;
        Ok(())
    }

    pub fn fundamentals_rows(&self) -> Result<i64> {
        Ok(self.connect()?.query_row(
            "SELECT COUNT(*) FROM securities_securityfundamentals",
            [],
            |row| row.get(0),
        )?)
    }

    /// `(current_price, volume, exchange_name)` stored for `symbol`.
    pub fn stored_row(&self, symbol: &str) -> Result<(Option<f64>, Option<i64>, Option<String>)> {
        Ok(self.connect()?.query_row(
            "SELECT f.current_price, f.volume, f.exchange_name
             FROM securities_securityfundamentals f
             JOIN securities_security s ON s.id = f.security_id
             WHERE s.symbol = ?1",
            params![symbol],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?)
    }
}
