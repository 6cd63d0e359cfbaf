use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use super::market::Direction;

/// A platform liquidity injection into one side of a market pool.
/// Status moves `open → won | lost` at market resolution; there is no
/// cashout path for platform positions.
#[derive(Debug, Clone, Serialize)]
pub struct MmPosition {
    pub id: Uuid,
    pub market_id: Uuid,
    pub direction: Direction,
    pub amount: Decimal,
    pub status: String,
    /// Realised profit-or-loss, set when the market resolves.
    pub pnl: Option<Decimal>,
    /// Why the rebalancer acted, e.g. `seed_down` or `rebalance_up`.
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}
