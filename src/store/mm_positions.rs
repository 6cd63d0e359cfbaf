//! Platform market-maker position rows.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{Direction, MmPosition};

use super::{day_start, decimal_col, opt_decimal_col, opt_time_col, time_col, uuid_col};

const POSITION_COLS: &str =
    "id, market_id, direction, amount, status, pnl, reason, created_at, closed_at";

fn map_position(row: &rusqlite::Row<'_>) -> rusqlite::Result<MmPosition> {
    let direction_raw: String = row.get(2)?;
    Ok(MmPosition {
        id: uuid_col(row, 0)?,
        market_id: uuid_col(row, 1)?,
        direction: Direction::parse(&direction_raw).unwrap_or(Direction::Up),
        amount: decimal_col(row, 3)?,
        status: row.get(4)?,
        pnl: opt_decimal_col(row, 5)?,
        reason: row.get(6)?,
        created_at: time_col(row, 7)?,
        closed_at: opt_time_col(row, 8)?,
    })
}

pub fn insert(
    conn: &Connection,
    market_id: Uuid,
    direction: Direction,
    amount: Decimal,
    reason: &str,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO mm_positions (id, market_id, direction, amount, status, reason, created_at)
         VALUES (?1, ?2, ?3, ?4, 'open', ?5, ?6)",
        params![
            id.to_string(),
            market_id.to_string(),
            direction.as_str(),
            amount.to_string(),
            reason,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(id)
}

pub fn open_by_market(conn: &Connection, market_id: Uuid) -> Result<Vec<MmPosition>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {POSITION_COLS} FROM mm_positions
         WHERE market_id = ?1 AND status = 'open' ORDER BY created_at ASC"
    ))?;
    let rows = stmt.query_map([market_id.to_string()], map_position)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Close a position after market resolution with its realised pnl.
pub fn close(conn: &Connection, position_id: Uuid, status: &str, pnl: Decimal) -> Result<()> {
    conn.execute(
        "UPDATE mm_positions SET status = ?1, pnl = ?2, closed_at = ?3
         WHERE id = ?4 AND status = 'open'",
        params![
            status,
            pnl.to_string(),
            Utc::now().to_rfc3339(),
            position_id.to_string()
        ],
    )?;
    Ok(())
}

/// Cumulative amount injected today, any status. Settled positions keep
/// counting toward the daily loss cap until the day rolls over.
pub fn daily_spend(conn: &Connection, now: DateTime<Utc>) -> Result<Decimal> {
    sum_decimal(
        conn,
        "SELECT amount FROM mm_positions WHERE created_at >= ?1",
        [day_start(now).to_rfc3339()],
    )
}

/// Realised pnl of positions closed today.
pub fn daily_pnl(conn: &Connection, now: DateTime<Utc>) -> Result<Decimal> {
    sum_decimal(
        conn,
        "SELECT pnl FROM mm_positions
         WHERE closed_at >= ?1 AND status IN ('won', 'lost') AND pnl IS NOT NULL",
        [day_start(now).to_rfc3339()],
    )
}

pub fn daily_intervention_count(conn: &Connection, now: DateTime<Utc>) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM mm_positions WHERE created_at >= ?1",
        [day_start(now).to_rfc3339()],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// Open exposure for one market; bounds `MaxExposurePerMarket`.
pub fn market_exposure(conn: &Connection, market_id: Uuid) -> Result<Decimal> {
    sum_decimal(
        conn,
        "SELECT amount FROM mm_positions WHERE market_id = ?1 AND status = 'open'",
        [market_id.to_string()],
    )
}

fn sum_decimal<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Decimal> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params, |row| decimal_col(row, 0))?;
    let mut total = Decimal::ZERO;
    for value in rows {
        total += value?;
    }
    Ok(total)
}
