use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a prediction round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Pending,
    Open,
    Closed,
    Resolved,
    Suspended,
    Cancelled,
}

impl MarketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Pending => "pending",
            MarketStatus::Open => "open",
            MarketStatus::Closed => "closed",
            MarketStatus::Resolved => "resolved",
            MarketStatus::Suspended => "suspended",
            MarketStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MarketStatus::Pending),
            "open" => Some(MarketStatus::Open),
            "closed" => Some(MarketStatus::Closed),
            "resolved" => Some(MarketStatus::Resolved),
            "suspended" => Some(MarketStatus::Suspended),
            "cancelled" => Some(MarketStatus::Cancelled),
            _ => None,
        }
    }
}

/// The direction a wager is placed on. Stored as `UP` / `DOWN` in every table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DOWN")]
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UP" => Some(Direction::Up),
            "DOWN" => Some(Direction::Down),
            _ => None,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

/// A single exchange price reading used for weighted averaging.
#[derive(Debug, Clone, Serialize)]
pub struct PriceSource {
    pub exchange: &'static str,
    pub price: Decimal,
    pub weight: Decimal,
    pub fetched_at: DateTime<Utc>,
}

/// One 5-minute BTC UP/DOWN prediction round.
#[derive(Debug, Clone, Serialize)]
pub struct Market {
    pub id: Uuid,
    pub status: MarketStatus,
    pub open_price: Option<Decimal>,
    pub close_price: Option<Decimal>,
    pub result: Option<Direction>,
    pub pool_up: Decimal,
    pub pool_down: Decimal,
    /// Parimutuel commission rate, fixed at creation.
    pub commission_rate: Decimal,
    pub commission_taken: Decimal,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Why an admin or the resolution engine halted this market.
    pub suspend_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Market {
    pub fn total_pool(&self) -> Decimal {
        self.pool_up + self.pool_down
    }

    fn effective_pool(&self) -> Decimal {
        self.total_pool() * (Decimal::ONE - self.commission_rate)
    }

    /// Payout multiplier for an UP bet:
    /// `(pool_up + pool_down) × (1 − commission) / pool_up`.
    /// Zero when the UP side is empty.
    pub fn up_odds(&self) -> Decimal {
        if self.pool_up.is_zero() {
            return Decimal::ZERO;
        }
        self.effective_pool() / self.pool_up
    }

    /// Payout multiplier for a DOWN bet. Zero when the DOWN side is empty.
    pub fn down_odds(&self) -> Decimal {
        if self.pool_down.is_zero() {
            return Decimal::ZERO;
        }
        self.effective_pool() / self.pool_down
    }

    pub fn odds_for(&self, direction: Direction) -> Decimal {
        match direction {
            Direction::Up => self.up_odds(),
            Direction::Down => self.down_odds(),
        }
    }

    /// Share of the total pool wagered on UP, 0–100.
    pub fn up_percent(&self) -> Decimal {
        let total = self.total_pool();
        if total.is_zero() {
            return Decimal::ZERO;
        }
        self.pool_up / total * Decimal::ONE_HUNDRED
    }

    pub fn down_percent(&self) -> Decimal {
        let total = self.total_pool();
        if total.is_zero() {
            return Decimal::ZERO;
        }
        self.pool_down / total * Decimal::ONE_HUNDRED
    }

    pub fn pool_for(&self, direction: Direction) -> Decimal {
        match direction {
            Direction::Up => self.pool_up,
            Direction::Down => self.pool_down,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == MarketStatus::Open
    }

    /// Seconds until the betting window closes; zero once it has passed.
    pub fn time_left_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.closes_at - now).num_seconds().max(0)
    }

    pub fn to_summary(&self, current_price: Decimal, now: DateTime<Utc>) -> MarketSummary {
        MarketSummary {
            id: self.id,
            status: self.status,
            open_price: self.open_price,
            current_price,
            up_odds: self.up_odds(),
            down_odds: self.down_odds(),
            up_percent: self.up_percent(),
            down_percent: self.down_percent(),
            pool_up: self.pool_up,
            pool_down: self.pool_down,
            closes_at: self.closes_at,
            time_left_secs: self.time_left_secs(now),
        }
    }
}

/// Read-only market view used by broadcasts and list endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct MarketSummary {
    pub id: Uuid,
    pub status: MarketStatus,
    pub open_price: Option<Decimal>,
    pub current_price: Decimal,
    pub up_odds: Decimal,
    pub down_odds: Decimal,
    pub up_percent: Decimal,
    pub down_percent: Decimal,
    pub pool_up: Decimal,
    pub pool_down: Decimal,
    pub closes_at: DateTime<Utc>,
    pub time_left_secs: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market_with_pools(up: Decimal, down: Decimal) -> Market {
        let now = Utc::now();
        Market {
            id: Uuid::new_v4(),
            status: MarketStatus::Open,
            open_price: Some(dec!(90000)),
            close_price: None,
            result: None,
            pool_up: up,
            pool_down: down,
            commission_rate: dec!(0.03),
            commission_taken: Decimal::ZERO,
            opens_at: now,
            closes_at: now + chrono::Duration::minutes(5),
            resolved_at: None,
            suspend_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn odds_derive_from_pool_ratio() {
        let m = market_with_pools(dec!(1200), dec!(500));
        // effective = 1700 * 0.97 = 1649
        assert_eq!(m.up_odds(), dec!(1649) / dec!(1200));
        assert_eq!(m.down_odds(), dec!(1649) / dec!(500));
    }

    #[test]
    fn odds_zero_on_empty_side() {
        let m = market_with_pools(Decimal::ZERO, dec!(500));
        assert_eq!(m.up_odds(), Decimal::ZERO);
        assert!(m.down_odds() > Decimal::ZERO);
    }

    #[test]
    fn pool_percentages() {
        let m = market_with_pools(dec!(1200), dec!(500));
        assert_eq!(m.up_percent().round_dp(4), dec!(70.5882));
        assert_eq!(m.down_percent().round_dp(4), dec!(29.4118));

        let empty = market_with_pools(Decimal::ZERO, Decimal::ZERO);
        assert_eq!(empty.up_percent(), Decimal::ZERO);
        assert_eq!(empty.down_percent(), Decimal::ZERO);
    }

    #[test]
    fn time_left_clamps_at_zero() {
        let m = market_with_pools(Decimal::ZERO, Decimal::ZERO);
        let after_close = m.closes_at + chrono::Duration::seconds(30);
        assert_eq!(m.time_left_secs(after_close), 0);
        assert!(m.time_left_secs(m.opens_at) > 0);
    }
}
