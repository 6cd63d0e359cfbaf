//! SQLite-backed ledger store.
//!
//! One connection guarded by an async mutex; every multi-row money movement
//! runs as a single rusqlite transaction under that guard, so committed
//! histories are strictly serial. Monetary columns are TEXT holding
//! canonical `Decimal` renderings; timestamps are RFC 3339 TEXT.

pub mod bets;
pub mod markets;
pub mod mm_positions;
pub mod treasury;
pub mod users;
pub mod wallets;
pub mod withdrawals;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Handle to the ledger database. Cheap to clone; all clones share the
/// single underlying connection.
#[derive(Clone)]
pub struct Ledger {
    conn: Arc<Mutex<Connection>>,
}

impl Ledger {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("open ledger db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Fresh in-memory ledger for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory ledger")?;
        conn.pragma_update(None, "foreign_keys", "ON").ok();
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Acquire the connection. Holding the guard serialises every other
    /// ledger operation, so keep the critical section tight.
    pub async fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

/// Idempotent schema migration.
fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY,
            email         TEXT UNIQUE NOT NULL,
            username      TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            role          TEXT NOT NULL DEFAULT 'user',
            is_active     INTEGER NOT NULL DEFAULT 1,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS wallets (
            id          TEXT PRIMARY KEY,
            user_id     TEXT UNIQUE REFERENCES users(id),
            wallet_type TEXT,
            balance     TEXT NOT NULL DEFAULT '0',
            locked      TEXT NOT NULL DEFAULT '0',
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS wallet_transactions (
            id             TEXT PRIMARY KEY,
            wallet_id      TEXT NOT NULL REFERENCES wallets(id),
            kind           TEXT NOT NULL,
            amount         TEXT NOT NULL,
            balance_before TEXT NOT NULL,
            balance_after  TEXT NOT NULL,
            ref_id         TEXT,
            description    TEXT NOT NULL DEFAULT '',
            created_at     TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS markets (
            id               TEXT PRIMARY KEY,
            status           TEXT NOT NULL,
            open_price       TEXT,
            close_price      TEXT,
            result           TEXT,
            pool_up          TEXT NOT NULL DEFAULT '0',
            pool_down        TEXT NOT NULL DEFAULT '0',
            commission_rate  TEXT NOT NULL,
            commission_taken TEXT NOT NULL DEFAULT '0',
            opens_at         TEXT NOT NULL,
            closes_at        TEXT NOT NULL,
            resolved_at      TEXT,
            suspend_reason   TEXT,
            created_at       TEXT NOT NULL,
            updated_at       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS bets (
            id             TEXT PRIMARY KEY,
            user_id        TEXT NOT NULL REFERENCES users(id),
            market_id      TEXT NOT NULL REFERENCES markets(id),
            direction      TEXT NOT NULL,
            amount         TEXT NOT NULL,
            odds_at_entry  TEXT NOT NULL,
            status         TEXT NOT NULL DEFAULT 'open',
            payout         TEXT,
            cashout_amount TEXT,
            cashout_fee    TEXT,
            placed_at      TEXT NOT NULL,
            resolved_at    TEXT
        );

        CREATE TABLE IF NOT EXISTS mm_positions (
            id         TEXT PRIMARY KEY,
            market_id  TEXT NOT NULL REFERENCES markets(id),
            direction  TEXT NOT NULL,
            amount     TEXT NOT NULL,
            status     TEXT NOT NULL DEFAULT 'open',
            pnl        TEXT,
            reason     TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            closed_at  TEXT
        );

        CREATE TABLE IF NOT EXISTS withdraw_requests (
            id           TEXT PRIMARY KEY,
            user_id      TEXT NOT NULL REFERENCES users(id),
            amount       TEXT NOT NULL,
            status       TEXT NOT NULL DEFAULT 'pending',
            iban         TEXT NOT NULL,
            note         TEXT NOT NULL DEFAULT '',
            reviewed_by  TEXT,
            review_note  TEXT NOT NULL DEFAULT '',
            requested_at TEXT NOT NULL,
            reviewed_at  TEXT
        );

        CREATE TABLE IF NOT EXISTS house_treasury (
            id                  TEXT PRIMARY KEY,
            market_id           TEXT UNIQUE NOT NULL REFERENCES markets(id),
            commission_earned   TEXT NOT NULL DEFAULT '0',
            mm_pnl              TEXT NOT NULL DEFAULT '0',
            cashout_fees_earned TEXT NOT NULL DEFAULT '0',
            created_at          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS settings (
            key        TEXT PRIMARY KEY,
            value      TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_bets_market_status ON bets(market_id, status);
        CREATE INDEX IF NOT EXISTS idx_bets_user ON bets(user_id);
        CREATE INDEX IF NOT EXISTS idx_wallet_tx_wallet_ts
            ON wallet_transactions(wallet_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_markets_status ON markets(status);
        CREATE INDEX IF NOT EXISTS idx_markets_closes_at ON markets(closes_at);
        CREATE INDEX IF NOT EXISTS idx_mm_positions_market_status
            ON mm_positions(market_id, status);
        ",
    )
    .context("migrate ledger schema")?;

    wallets::ensure_platform_wallet(conn)?;
    Ok(())
}

// ── Settings ─────────────────────────────────────────────────────────────────

pub fn get_setting(conn: &Connection, key: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare_cached("SELECT value FROM settings WHERE key = ?1")?;
    let mut rows = stmt.query([key])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

pub fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        rusqlite::params![key, value, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

// ── Row-mapping helpers ──────────────────────────────────────────────────────

pub(crate) fn decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    raw.parse::<Decimal>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse::<Decimal>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

pub(crate) fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

pub(crate) fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        Uuid::parse_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

/// Start-of-day boundary used by the daily MM and withdrawal caps.
pub(crate) fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
    }

    #[tokio::test]
    async fn file_backed_ledger_survives_reopen() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap().to_string();
        {
            let ledger = Ledger::open(&path).unwrap();
            let conn = ledger.lock().await;
            set_setting(&conn, "mm_enabled", "false").unwrap();
        }

        // Reopening migrates again (no-op) and sees the persisted state.
        let ledger = Ledger::open(&path).unwrap();
        let conn = ledger.lock().await;
        assert_eq!(
            get_setting(&conn, "mm_enabled").unwrap().as_deref(),
            Some("false")
        );
    }

    #[test]
    fn settings_roundtrip() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        assert_eq!(get_setting(&conn, "mm_enabled").unwrap(), None);
        set_setting(&conn, "mm_enabled", "false").unwrap();
        assert_eq!(
            get_setting(&conn, "mm_enabled").unwrap().as_deref(),
            Some("false")
        );
        set_setting(&conn, "mm_enabled", "true").unwrap();
        assert_eq!(
            get_setting(&conn, "mm_enabled").unwrap().as_deref(),
            Some("true")
        );
    }
}
