//! House treasury rows, one per resolved market.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::decimal_col;

/// Record what the house booked for a market: parimutuel commission, net
/// MM pnl across the market's positions, and collected cashout fees.
pub fn record(
    conn: &Connection,
    market_id: Uuid,
    commission_earned: Decimal,
    mm_pnl: Decimal,
    cashout_fees_earned: Decimal,
) -> Result<()> {
    conn.execute(
        "INSERT INTO house_treasury
            (id, market_id, commission_earned, mm_pnl, cashout_fees_earned, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(market_id) DO NOTHING",
        params![
            Uuid::new_v4().to_string(),
            market_id.to_string(),
            commission_earned.to_string(),
            mm_pnl.to_string(),
            cashout_fees_earned.to_string(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FinanceReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub commission_earned: Decimal,
    pub mm_pnl: Decimal,
    pub cashout_fees: Decimal,
    pub net_profit: Decimal,
    pub total_up_pool: Decimal,
    pub total_down_pool: Decimal,
    pub market_count: usize,
}

/// Aggregate treasury and resolved-market volume for a date range.
pub fn finance_report(
    conn: &Connection,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<FinanceReport> {
    let mut commission = Decimal::ZERO;
    let mut mm_pnl = Decimal::ZERO;
    let mut cashout_fees = Decimal::ZERO;
    {
        let mut stmt = conn.prepare_cached(
            "SELECT commission_earned, mm_pnl, cashout_fees_earned
             FROM house_treasury WHERE created_at >= ?1 AND created_at < ?2",
        )?;
        let rows = stmt.query_map(params![from.to_rfc3339(), to.to_rfc3339()], |row| {
            Ok((
                decimal_col(row, 0)?,
                decimal_col(row, 1)?,
                decimal_col(row, 2)?,
            ))
        })?;
        for row in rows {
            let (c, m, f) = row?;
            commission += c;
            mm_pnl += m;
            cashout_fees += f;
        }
    }

    let mut total_up = Decimal::ZERO;
    let mut total_down = Decimal::ZERO;
    let mut market_count = 0usize;
    {
        let mut stmt = conn.prepare_cached(
            "SELECT pool_up, pool_down FROM markets
             WHERE status = 'resolved' AND closes_at >= ?1 AND closes_at < ?2",
        )?;
        let rows = stmt.query_map(params![from.to_rfc3339(), to.to_rfc3339()], |row| {
            Ok((decimal_col(row, 0)?, decimal_col(row, 1)?))
        })?;
        for row in rows {
            let (up, down) = row?;
            total_up += up;
            total_down += down;
            market_count += 1;
        }
    }

    Ok(FinanceReport {
        from,
        to,
        commission_earned: commission,
        mm_pnl,
        cashout_fees,
        net_profit: commission + mm_pnl + cashout_fees,
        total_up_pool: total_up,
        total_down_pool: total_down,
        market_count,
    })
}
