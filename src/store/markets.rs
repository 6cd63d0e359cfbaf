//! Market rows: lifecycle transitions and pool mutations.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{Direction, DomainError, Market, MarketStatus};

use super::{decimal_col, opt_decimal_col, opt_time_col, time_col, uuid_col};

const MARKET_COLS: &str = "id, status, open_price, close_price, result, pool_up, pool_down, \
     commission_rate, commission_taken, opens_at, closes_at, resolved_at, suspend_reason, \
     created_at, updated_at";

fn map_market(row: &rusqlite::Row<'_>) -> rusqlite::Result<Market> {
    let status_raw: String = row.get(1)?;
    let result_raw: Option<String> = row.get(4)?;
    Ok(Market {
        id: uuid_col(row, 0)?,
        status: MarketStatus::parse(&status_raw).unwrap_or(MarketStatus::Suspended),
        open_price: opt_decimal_col(row, 2)?,
        close_price: opt_decimal_col(row, 3)?,
        result: result_raw.as_deref().and_then(Direction::parse),
        pool_up: decimal_col(row, 5)?,
        pool_down: decimal_col(row, 6)?,
        commission_rate: decimal_col(row, 7)?,
        commission_taken: decimal_col(row, 8)?,
        opens_at: time_col(row, 9)?,
        closes_at: time_col(row, 10)?,
        resolved_at: opt_time_col(row, 11)?,
        suspend_reason: row.get(12)?,
        created_at: time_col(row, 13)?,
        updated_at: time_col(row, 14)?,
    })
}

pub fn insert(conn: &Connection, market: &Market) -> Result<()> {
    conn.execute(
        "INSERT INTO markets
            (id, status, open_price, close_price, result, pool_up, pool_down,
             commission_rate, commission_taken, opens_at, closes_at, resolved_at,
             suspend_reason, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            market.id.to_string(),
            market.status.as_str(),
            market.open_price.map(|p| p.to_string()),
            market.close_price.map(|p| p.to_string()),
            market.result.map(|r| r.as_str()),
            market.pool_up.to_string(),
            market.pool_down.to_string(),
            market.commission_rate.to_string(),
            market.commission_taken.to_string(),
            market.opens_at.to_rfc3339(),
            market.closes_at.to_rfc3339(),
            market.resolved_at.map(|t| t.to_rfc3339()),
            market.suspend_reason.as_deref(),
            market.created_at.to_rfc3339(),
            market.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_by_id(conn: &Connection, id: Uuid) -> Result<Market> {
    let mut stmt =
        conn.prepare_cached(&format!("SELECT {MARKET_COLS} FROM markets WHERE id = ?1"))?;
    stmt.query_row([id.to_string()], map_market)
        .optional()?
        .ok_or_else(|| DomainError::MarketNotFound.into())
}

/// The single market currently accepting bets.
pub fn get_active(conn: &Connection) -> Result<Market> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {MARKET_COLS} FROM markets WHERE status = 'open' ORDER BY opens_at DESC LIMIT 1"
    ))?;
    stmt.query_row([], map_market)
        .optional()?
        .ok_or_else(|| DomainError::NoOpenMarket.into())
}

/// Markets still `open` whose close time has passed, oldest first.
pub fn expired_unresolved(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<Market>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {MARKET_COLS} FROM markets
         WHERE status = 'open' AND closes_at <= ?1 ORDER BY closes_at ASC"
    ))?;
    let rows = stmt.query_map([now.to_rfc3339()], map_market)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Add a user's stake to one pool side. Enforces, in the same statement
/// that the bet-placement transaction relies on, that the market is open
/// AND its close time has not passed: a bet racing the resolution sweep
/// fails `MarketNotOpen` instead of landing in a frozen pool.
pub fn stake_pool(
    conn: &Connection,
    market_id: Uuid,
    direction: Direction,
    amount: Decimal,
    now: DateTime<Utc>,
) -> Result<()> {
    let market = get_by_id(conn, market_id)?;
    if market.status != MarketStatus::Open || market.closes_at <= now {
        return Err(DomainError::MarketNotOpen.into());
    }
    write_pool(conn, &market, direction, market.pool_for(direction) + amount)
}

/// Apply a signed pool delta (early exit removes the stake; MM injections
/// add). Requires the market to be open; the pool side may reach zero but
/// never goes negative.
pub fn adjust_pool(
    conn: &Connection,
    market_id: Uuid,
    direction: Direction,
    delta: Decimal,
) -> Result<()> {
    let market = get_by_id(conn, market_id)?;
    if market.status != MarketStatus::Open {
        return Err(DomainError::MarketNotOpen.into());
    }
    let next = (market.pool_for(direction) + delta).max(Decimal::ZERO);
    write_pool(conn, &market, direction, next)
}

fn write_pool(
    conn: &Connection,
    market: &Market,
    direction: Direction,
    value: Decimal,
) -> Result<()> {
    let column = match direction {
        Direction::Up => "pool_up",
        Direction::Down => "pool_down",
    };
    conn.execute(
        &format!("UPDATE markets SET {column} = ?1, updated_at = ?2 WHERE id = ?3"),
        params![
            value.to_string(),
            Utc::now().to_rfc3339(),
            market.id.to_string()
        ],
    )?;
    Ok(())
}

/// Finalise a settled market.
pub fn resolve(
    conn: &Connection,
    market_id: Uuid,
    close_price: Decimal,
    winner: Direction,
    commission_taken: Decimal,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let n = conn.execute(
        "UPDATE markets
         SET status = 'resolved', close_price = ?1, result = ?2, commission_taken = ?3,
             resolved_at = ?4, updated_at = ?4
         WHERE id = ?5 AND status IN ('open', 'closed', 'suspended')",
        params![
            close_price.to_string(),
            winner.as_str(),
            commission_taken.to_string(),
            now,
            market_id.to_string()
        ],
    )?;
    if n == 0 {
        return Err(DomainError::MarketNotFound.into());
    }
    Ok(())
}

pub fn suspend(conn: &Connection, market_id: Uuid, reason: &str) -> Result<()> {
    let n = conn.execute(
        "UPDATE markets SET status = 'suspended', suspend_reason = ?1, updated_at = ?2
         WHERE id = ?3 AND status = 'open'",
        params![reason, Utc::now().to_rfc3339(), market_id.to_string()],
    )?;
    if n == 0 {
        return Err(DomainError::MarketNotFound.into());
    }
    tracing::warn!(market_id = %market_id, reason, "market suspended");
    Ok(())
}

pub fn cancel(conn: &Connection, market_id: Uuid) -> Result<()> {
    let n = conn.execute(
        "UPDATE markets SET status = 'cancelled', updated_at = ?1
         WHERE id = ?2 AND status NOT IN ('resolved', 'cancelled')",
        params![Utc::now().to_rfc3339(), market_id.to_string()],
    )?;
    if n == 0 {
        return Err(DomainError::MarketNotFound.into());
    }
    Ok(())
}

/// Paginated listing, optionally filtered by status. Returns (markets, total).
pub fn list(
    conn: &Connection,
    limit: usize,
    offset: usize,
    status: Option<MarketStatus>,
) -> Result<(Vec<Market>, usize)> {
    match status {
        Some(status) => {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM markets WHERE status = ?1",
                [status.as_str()],
                |row| row.get(0),
            )?;
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {MARKET_COLS} FROM markets WHERE status = ?1
                 ORDER BY opens_at DESC LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt.query_map(
                params![status.as_str(), limit as i64, offset as i64],
                map_market,
            )?;
            Ok((rows.collect::<rusqlite::Result<Vec<_>>>()?, total as usize))
        }
        None => {
            let total: i64 =
                conn.query_row("SELECT COUNT(*) FROM markets", [], |row| row.get(0))?;
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {MARKET_COLS} FROM markets ORDER BY opens_at DESC LIMIT ?1 OFFSET ?2"
            ))?;
            let rows = stmt.query_map(params![limit as i64, offset as i64], map_market)?;
            Ok((rows.collect::<rusqlite::Result<Vec<_>>>()?, total as usize))
        }
    }
}

/// Settled and voided markets, newest first.
pub fn history(conn: &Connection, limit: usize, offset: usize) -> Result<Vec<Market>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {MARKET_COLS} FROM markets
         WHERE status IN ('resolved', 'cancelled')
         ORDER BY closes_at DESC LIMIT ?1 OFFSET ?2"
    ))?;
    let rows = stmt.query_map(params![limit as i64, offset as i64], map_market)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
