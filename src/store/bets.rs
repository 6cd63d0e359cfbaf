//! Bet rows.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{Bet, BetStatus, Direction, DomainError};

use super::{decimal_col, opt_decimal_col, opt_time_col, time_col, uuid_col};

const BET_COLS: &str = "id, user_id, market_id, direction, amount, odds_at_entry, status, \
     payout, cashout_amount, cashout_fee, placed_at, resolved_at";

fn map_bet(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bet> {
    let direction_raw: String = row.get(3)?;
    let status_raw: String = row.get(6)?;
    Ok(Bet {
        id: uuid_col(row, 0)?,
        user_id: uuid_col(row, 1)?,
        market_id: uuid_col(row, 2)?,
        direction: Direction::parse(&direction_raw).unwrap_or(Direction::Up),
        amount: decimal_col(row, 4)?,
        odds_at_entry: decimal_col(row, 5)?,
        status: BetStatus::parse(&status_raw).unwrap_or(BetStatus::Open),
        payout: opt_decimal_col(row, 7)?,
        cashout_amount: opt_decimal_col(row, 8)?,
        cashout_fee: opt_decimal_col(row, 9)?,
        placed_at: time_col(row, 10)?,
        resolved_at: opt_time_col(row, 11)?,
    })
}

pub fn insert(conn: &Connection, bet: &Bet) -> Result<()> {
    conn.execute(
        "INSERT INTO bets
            (id, user_id, market_id, direction, amount, odds_at_entry, status, placed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            bet.id.to_string(),
            bet.user_id.to_string(),
            bet.market_id.to_string(),
            bet.direction.as_str(),
            bet.amount.to_string(),
            bet.odds_at_entry.to_string(),
            bet.status.as_str(),
            bet.placed_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Missing bets surface as `BetNotActive`: from the caller's perspective
/// there is nothing left to act on either way.
pub fn get_by_id(conn: &Connection, id: Uuid) -> Result<Bet> {
    let mut stmt = conn.prepare_cached(&format!("SELECT {BET_COLS} FROM bets WHERE id = ?1"))?;
    stmt.query_row([id.to_string()], map_bet)
        .optional()?
        .ok_or_else(|| DomainError::BetNotActive.into())
}

/// Still-open bets on one side of a market, in placement order. Used by the
/// resolution engine: cashed-out and refunded bets no longer participate in
/// the pool, so they must not share in the distribution.
pub fn open_by_market_and_direction(
    conn: &Connection,
    market_id: Uuid,
    direction: Direction,
) -> Result<Vec<Bet>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {BET_COLS} FROM bets
         WHERE market_id = ?1 AND direction = ?2 AND status = 'open'
         ORDER BY placed_at ASC"
    ))?;
    let rows = stmt.query_map(params![market_id.to_string(), direction.as_str()], map_bet)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// All open bets in a market (both sides); the refund path walks these.
pub fn open_by_market(conn: &Connection, market_id: Uuid) -> Result<Vec<Bet>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {BET_COLS} FROM bets
         WHERE market_id = ?1 AND status = 'open' ORDER BY placed_at ASC"
    ))?;
    let rows = stmt.query_map([market_id.to_string()], map_bet)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn by_user(conn: &Connection, user_id: Uuid, limit: usize, offset: usize) -> Result<Vec<Bet>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {BET_COLS} FROM bets WHERE user_id = ?1
         ORDER BY placed_at DESC LIMIT ?2 OFFSET ?3"
    ))?;
    let rows = stmt.query_map(
        params![user_id.to_string(), limit as i64, offset as i64],
        map_bet,
    )?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Move a single bet into a terminal status, recording the payout when one
/// applies. Only touches rows still `open`; terminal statuses are final.
pub fn settle(
    conn: &Connection,
    bet_id: Uuid,
    status: BetStatus,
    payout: Option<Decimal>,
) -> Result<()> {
    conn.execute(
        "UPDATE bets SET status = ?1, payout = ?2, resolved_at = ?3
         WHERE id = ?4 AND status = 'open'",
        params![
            status.as_str(),
            payout.map(|p| p.to_string()),
            Utc::now().to_rfc3339(),
            bet_id.to_string()
        ],
    )?;
    Ok(())
}

/// Guarded cashout transition. The `status = 'open'` predicate makes the
/// operation idempotent under racing exits: the second caller updates zero
/// rows and gets `BetNotActive`.
pub fn exit_bet(
    conn: &Connection,
    bet_id: Uuid,
    cashout_amount: Decimal,
    cashout_fee: Decimal,
) -> Result<()> {
    let n = conn.execute(
        "UPDATE bets SET status = 'cashed_out', cashout_amount = ?1, cashout_fee = ?2,
             resolved_at = ?3
         WHERE id = ?4 AND status = 'open'",
        params![
            cashout_amount.to_string(),
            cashout_fee.to_string(),
            Utc::now().to_rfc3339(),
            bet_id.to_string()
        ],
    )?;
    if n == 0 {
        return Err(DomainError::BetNotActive.into());
    }
    Ok(())
}

/// Bulk-settle every still-open bet on the losing side.
pub fn mark_losers(conn: &Connection, market_id: Uuid, direction: Direction) -> Result<()> {
    conn.execute(
        "UPDATE bets SET status = 'lost', resolved_at = ?1
         WHERE market_id = ?2 AND direction = ?3 AND status = 'open'",
        params![
            Utc::now().to_rfc3339(),
            market_id.to_string(),
            direction.as_str()
        ],
    )?;
    Ok(())
}

/// Total cashout fees collected from a market's bets; folded into the
/// house-treasury row at resolution.
pub fn cashout_fees_for_market(conn: &Connection, market_id: Uuid) -> Result<Decimal> {
    let mut stmt = conn.prepare_cached(
        "SELECT cashout_fee FROM bets
         WHERE market_id = ?1 AND status = 'cashed_out' AND cashout_fee IS NOT NULL",
    )?;
    let rows = stmt.query_map([market_id.to_string()], |row| decimal_col(row, 0))?;
    let mut total = Decimal::ZERO;
    for fee in rows {
        total += fee?;
    }
    Ok(total)
}
