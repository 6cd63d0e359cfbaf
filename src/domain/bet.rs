use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::market::Direction;

/// State of a user's wager. Every non-`Open` status is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetStatus {
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "won")]
    Won,
    #[serde(rename = "lost")]
    Lost,
    #[serde(rename = "cashed_out")]
    CashedOut,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl BetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetStatus::Open => "open",
            BetStatus::Won => "won",
            BetStatus::Lost => "lost",
            BetStatus::CashedOut => "cashed_out",
            BetStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(BetStatus::Open),
            "won" => Some(BetStatus::Won),
            "lost" => Some(BetStatus::Lost),
            "cashed_out" => Some(BetStatus::CashedOut),
            "cancelled" => Some(BetStatus::Cancelled),
            _ => None,
        }
    }
}

/// A single user wager inside a market.
#[derive(Debug, Clone, Serialize)]
pub struct Bet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub market_id: Uuid,
    pub direction: Direction,
    pub amount: Decimal,
    /// Live odds snapshot taken before this bet mutated the pool.
    pub odds_at_entry: Decimal,
    pub status: BetStatus,
    pub payout: Option<Decimal>,
    pub cashout_amount: Option<Decimal>,
    pub cashout_fee: Option<Decimal>,
    pub placed_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Bet {
    pub fn is_active(&self) -> bool {
        self.status == BetStatus::Open
    }

    /// Net amount a user receives when cashing out early.
    ///
    /// `gross = amount × current_odds / odds_at_entry`
    /// `net   = gross − gross × fee_rate`, floored to 4 decimal places.
    ///
    /// Returns zero when either odds value is zero.
    pub fn exit_amount(&self, current_odds: Decimal, fee_rate: Decimal) -> Decimal {
        if self.odds_at_entry.is_zero() || current_odds.is_zero() {
            return Decimal::ZERO;
        }
        let gross = self.amount * current_odds / self.odds_at_entry;
        let net = gross - gross * fee_rate;
        floor4(net)
    }

    /// Fee portion retained by the house on early exit.
    pub fn exit_fee(&self, current_odds: Decimal, fee_rate: Decimal) -> Decimal {
        if self.odds_at_entry.is_zero() || current_odds.is_zero() {
            return Decimal::ZERO;
        }
        let gross = self.amount * current_odds / self.odds_at_entry;
        floor4(gross * fee_rate)
    }
}

/// Round toward zero at 4 fractional digits. Every user-facing payout goes
/// through this so the house never over-pays on the rounding.
pub fn floor4(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(4, rust_decimal::RoundingStrategy::ToZero)
}

/// Payout for a winning stake under parimutuel distribution.
///
/// `share = stake / winner_pool`, `profit = share × distributable`,
/// `payout = floor4(stake + profit)`. The stake itself is always returned.
pub fn parimutuel_payout(stake: Decimal, winner_pool: Decimal, distributable: Decimal) -> Decimal {
    if winner_pool.is_zero() {
        return Decimal::ZERO;
    }
    let profit = stake / winner_pool * distributable;
    floor4(stake + profit)
}
