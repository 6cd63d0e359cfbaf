//! WebSocket message types pushed to connected clients.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::Direction;

/// Discriminates message kinds so clients can switch on `type`.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MsgType {
    PriceUpdate,
    MarketResolved,
    NewMarket,
}

/// Live BTC price, pool state and countdown; sent every second.
#[derive(Debug, Clone, Serialize)]
pub struct PriceUpdateMessage {
    #[serde(rename = "type")]
    pub msg_type: MsgType,
    pub market_id: Uuid,
    pub btc_price: Decimal,
    pub open_price: Option<Decimal>,
    /// `price − open_price` and its percentage of the open price.
    pub diff: Decimal,
    pub diff_pct: Decimal,
    pub up_odds: Decimal,
    pub down_odds: Decimal,
    pub up_percent: Decimal,
    pub down_percent: Decimal,
    pub pool_up: Decimal,
    pub pool_down: Decimal,
    pub time_left_seconds: i64,
    pub timestamp: DateTime<Utc>,
}

/// Final price and winning side of a settled market.
#[derive(Debug, Clone, Serialize)]
pub struct MarketResolvedMessage {
    #[serde(rename = "type")]
    pub msg_type: MsgType,
    pub market_id: Uuid,
    pub result: Option<Direction>,
    pub close_price: Option<Decimal>,
    pub open_price: Option<Decimal>,
    pub pool_up: Decimal,
    pub pool_down: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// A fresh 5-minute round has opened.
#[derive(Debug, Clone, Serialize)]
pub struct NewMarketMessage {
    #[serde(rename = "type")]
    pub msg_type: MsgType,
    pub market_id: Uuid,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    pub open_price: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}
