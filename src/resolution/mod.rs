//! Settlement engine: winner determination, parimutuel payouts, MM position
//! settlement, commission ledger, and the refund path for cancellations.

use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Connection;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::bet::parimutuel_payout;
use crate::domain::{BetStatus, Direction, Market, TxKind};
use crate::market::Refunder;
use crate::price::PriceOracle;
use crate::store::{bets, markets, mm_positions, treasury, wallets, Ledger};

/// Sink for settlement notices; implemented by the broadcast hub.
pub trait ResolvedSink: Send + Sync {
    fn market_resolved(&self, market: &Market);
}

pub struct ResolutionService {
    ledger: Ledger,
    oracle: Arc<PriceOracle>,
    sink: OnceLock<Arc<dyn ResolvedSink>>,
}

impl ResolutionService {
    pub fn new(ledger: Ledger, oracle: Arc<PriceOracle>) -> Self {
        Self {
            ledger,
            oracle,
            sink: OnceLock::new(),
        }
    }

    pub fn set_sink(&self, sink: Arc<dyn ResolvedSink>) {
        let _ = self.sink.set(sink);
    }

    /// Settle every market whose betting window has passed. One market
    /// failing is logged and does not block the rest of the sweep.
    pub async fn resolve_expired(&self) -> Result<()> {
        let due = {
            let conn = self.ledger.lock().await;
            markets::expired_unresolved(&conn, Utc::now())?
        };

        for market in due {
            if let Err(e) = self.resolve_one(market.id).await {
                error!(market_id = %market.id, error = %e, "market resolution failed");
            }
        }
        Ok(())
    }

    /// Settle a single market. Also the operator path for re-resolving a
    /// suspended market once a price is available again.
    pub async fn resolve_one(&self, market_id: Uuid) -> Result<()> {
        // Never settle on a stale or guessed price. A dead oracle suspends
        // the market; bets stay open until an operator resolves it later.
        let close_price = match self.oracle.get_weighted_price().await {
            Ok((price, _)) => price,
            Err(e) => {
                let conn = self.ledger.lock().await;
                if let Err(suspend_err) = markets::suspend(&conn, market_id, "price_source_error") {
                    warn!(market_id = %market_id, error = %suspend_err,
                          "could not suspend market after price failure");
                }
                return Err(e).context("resolve market: close price");
            }
        };

        let resolved = {
            let mut conn = self.ledger.lock().await;
            let tx = conn.transaction().context("resolve market: begin tx")?;

            let market = markets::get_by_id(&tx, market_id)?;
            if market.status == crate::domain::MarketStatus::Resolved
                || market.status == crate::domain::MarketStatus::Cancelled
            {
                return Ok(());
            }

            // UP wins ties, and wins by default when the open price is missing.
            let winner = match market.open_price {
                Some(open) if close_price < open => Direction::Down,
                _ => Direction::Up,
            };
            let loser = winner.opposite();

            let winner_pool = market.pool_for(winner);
            let loser_pool = market.pool_for(loser);
            let commission = market.total_pool() * market.commission_rate;
            let distributable = loser_pool * (Decimal::ONE - market.commission_rate);

            // Winners: stake back plus a pool-share of the losers' money.
            let winning_bets = bets::open_by_market_and_direction(&tx, market_id, winner)?;
            for bet in &winning_bets {
                let payout = parimutuel_payout(bet.amount, winner_pool, distributable);
                let wallet_before = wallets::add_balance(&tx, bet.user_id, payout)?;
                wallets::audit(
                    &tx,
                    &wallet_before,
                    TxKind::Payout,
                    payout,
                    Some(bet.id),
                    format!("Payout: market {}, won {} TRY", market_id, payout),
                )?;
                bets::settle(&tx, bet.id, BetStatus::Won, Some(payout))?;
            }

            bets::mark_losers(&tx, market_id, loser)?;

            let mm_pnl = settle_platform_positions(&tx, &market, winner, winner_pool, distributable)?;

            let cashout_fees = bets::cashout_fees_for_market(&tx, market_id)?;
            treasury::record(&tx, market_id, commission, mm_pnl, cashout_fees)?;

            markets::resolve(&tx, market_id, close_price, winner, commission)?;
            tx.commit().context("resolve market: commit")?;

            info!(market_id = %market_id, winner = winner.as_str(), close_price = %close_price,
                  winners = winning_bets.len(), commission = %commission, mm_pnl = %mm_pnl,
                  "market resolved");

            markets::get_by_id(&conn, market_id)?
        };

        if let Some(sink) = self.sink.get() {
            sink.market_resolved(&resolved);
        }
        Ok(())
    }
}

/// Close every open MM position for the market. Winning positions share the
/// distribution exactly like user bets; losing stakes were already debited
/// at injection time, so they settle with no wallet movement.
fn settle_platform_positions(
    conn: &Connection,
    market: &Market,
    winner: Direction,
    winner_pool: Decimal,
    distributable: Decimal,
) -> Result<Decimal> {
    let positions = mm_positions::open_by_market(conn, market.id)?;
    let mut total_pnl = Decimal::ZERO;

    for position in positions {
        if position.direction == winner {
            let payout = parimutuel_payout(position.amount, winner_pool, distributable);
            let wallet_before = wallets::add_platform_balance(conn, payout)?;
            wallets::audit(
                conn,
                &wallet_before,
                TxKind::Payout,
                payout,
                Some(market.id),
                format!("MM payout: market {}", market.id),
            )?;
            let pnl = payout - position.amount;
            mm_positions::close(conn, position.id, "won", pnl)?;
            total_pnl += pnl;
        } else {
            let pnl = -position.amount;
            mm_positions::close(conn, position.id, "lost", pnl)?;
            total_pnl += pnl;
        }
    }

    Ok(total_pnl)
}

#[async_trait]
impl Refunder for ResolutionService {
    /// Refund every open bet of a cancelled market: stake back, audit row,
    /// bet marked `cancelled` — all in one transaction. Pools are not
    /// restored; the market is going away.
    async fn refund_all(&self, market_id: Uuid) -> Result<()> {
        let mut conn = self.ledger.lock().await;
        let open_bets = bets::open_by_market(&conn, market_id)?;
        if open_bets.is_empty() {
            return Ok(());
        }

        let tx = conn.transaction().context("refund all: begin tx")?;
        for bet in &open_bets {
            let wallet_before = wallets::add_balance(&tx, bet.user_id, bet.amount)?;
            wallets::audit(
                &tx,
                &wallet_before,
                TxKind::Refund,
                bet.amount,
                Some(bet.id),
                format!("Refund: market {} cancelled", market_id),
            )?;
            bets::settle(&tx, bet.id, BetStatus::Cancelled, None)?;
        }
        tx.commit().context("refund all: commit")?;

        info!(market_id = %market_id, refunds = open_bets.len(), "refunded cancelled market");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests_support::test_config;
    use crate::domain::{Bet, MarketStatus, UserRole};
    use crate::store::users;
    use rust_decimal_macros::dec;

    fn service(ledger: &Ledger) -> ResolutionService {
        let oracle = Arc::new(crate::price::PriceOracle::new(test_config().price).unwrap());
        ResolutionService::new(ledger.clone(), oracle)
    }

    async fn insert_market(ledger: &Ledger, pool_up: Decimal, pool_down: Decimal) -> Market {
        let now = Utc::now();
        let market = Market {
            id: Uuid::new_v4(),
            status: MarketStatus::Open,
            open_price: Some(dec!(90000)),
            close_price: None,
            result: None,
            pool_up,
            pool_down,
            commission_rate: dec!(0.03),
            commission_taken: Decimal::ZERO,
            opens_at: now,
            closes_at: now + chrono::Duration::minutes(5),
            resolved_at: None,
            suspend_reason: None,
            created_at: now,
            updated_at: now,
        };
        let conn = ledger.lock().await;
        markets::insert(&conn, &market).unwrap();
        market
    }

    async fn insert_open_bet(
        ledger: &Ledger,
        user_id: Uuid,
        market_id: Uuid,
        amount: Decimal,
    ) -> Uuid {
        let bet = Bet {
            id: Uuid::new_v4(),
            user_id,
            market_id,
            direction: Direction::Up,
            amount,
            odds_at_entry: Decimal::ONE,
            status: BetStatus::Open,
            payout: None,
            cashout_amount: None,
            cashout_fee: None,
            placed_at: Utc::now(),
            resolved_at: None,
        };
        let conn = ledger.lock().await;
        bets::insert(&conn, &bet).unwrap();
        bet.id
    }

    #[tokio::test]
    async fn refund_all_is_a_noop_without_open_bets() {
        let ledger = Ledger::open_in_memory().unwrap();
        let market = insert_market(&ledger, Decimal::ZERO, Decimal::ZERO).await;
        service(&ledger).refund_all(market.id).await.unwrap();
    }

    #[tokio::test]
    async fn refund_all_credits_stakes_and_cancels_bets() {
        let ledger = Ledger::open_in_memory().unwrap();
        let user_id = {
            let conn = ledger.lock().await;
            users::create(&conn, "r@example.com", "refundee", "hash", UserRole::User)
                .unwrap()
                .id
        };
        let market = insert_market(&ledger, dec!(40), Decimal::ZERO).await;
        let bet_id = insert_open_bet(&ledger, user_id, market.id, dec!(40)).await;

        service(&ledger).refund_all(market.id).await.unwrap();

        let conn = ledger.lock().await;
        assert_eq!(wallets::get_by_user(&conn, user_id).unwrap().balance, dec!(40));
        assert_eq!(
            bets::get_by_id(&conn, bet_id).unwrap().status,
            BetStatus::Cancelled
        );
        let txns = wallets::transactions_for_user(&conn, user_id, 10, 0).unwrap();
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].kind, TxKind::Refund);
        assert_eq!(txns[0].amount, dec!(40));
    }

    // Settlement of platform positions: the winner is paid with the same
    // parimutuel formula as users; the loser's stake was debited at
    // injection, so only the record is closed.
    #[tokio::test]
    async fn platform_positions_settle_by_direction() {
        let ledger = Ledger::open_in_memory().unwrap();
        let market = insert_market(&ledger, dec!(300), dec!(1000)).await;

        let conn = ledger.lock().await;
        wallets::add_platform_balance(&conn, dec!(500)).unwrap();
        let winner_pos =
            mm_positions::insert(&conn, market.id, Direction::Up, dec!(300), "seed_up").unwrap();
        let loser_pos =
            mm_positions::insert(&conn, market.id, Direction::Down, dec!(200), "rebalance_down")
                .unwrap();

        // winner pool 300, distributable = 1000 × 0.97 = 970.
        let pnl =
            settle_platform_positions(&conn, &market, Direction::Up, dec!(300), dec!(970))
                .unwrap();

        // UP position: payout 300 + 970 = 1270, pnl 970. DOWN: −200.
        assert_eq!(pnl, dec!(770));
        assert_eq!(wallets::get_platform(&conn).unwrap().balance, dec!(1770));
        assert!(mm_positions::open_by_market(&conn, market.id).unwrap().is_empty());

        let status_of = |id: Uuid| -> String {
            conn.query_row(
                "SELECT status FROM mm_positions WHERE id = ?1",
                [id.to_string()],
                |row| row.get(0),
            )
            .unwrap()
        };
        assert_eq!(status_of(winner_pos), "won");
        assert_eq!(status_of(loser_pos), "lost");
    }
}
