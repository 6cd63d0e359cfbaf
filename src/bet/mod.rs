//! Transactional bet engine: placement and early exit.
//!
//! Every money movement here runs inside a single ledger transaction.
//! Post-commit side effects (MM rebalancing, odds broadcast) are
//! best-effort: they run on their own task with a bounded timeout and can
//! never roll back or delay a committed placement.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{Bet, BetStatus, Direction, DomainError, MarketSummary, TxKind};
use crate::store::{bets, markets, wallets, Ledger};

/// Budget for the whole post-commit chain (rebalance + broadcast).
const POST_COMMIT_TIMEOUT: Duration = Duration::from_secs(5);

/// The slice of the MM service the bet engine needs after a placement.
#[async_trait]
pub trait Rebalancer: Send + Sync {
    async fn rebalance(&self, market_id: Uuid) -> Result<()>;
}

/// The slice of the broadcast hub the bet engine needs after a placement.
pub trait Broadcaster: Send + Sync {
    fn broadcast_market_update(&self, summary: MarketSummary);
}

pub struct PlaceBetRequest {
    pub user_id: Uuid,
    pub market_id: Uuid,
    pub direction: Direction,
    pub amount: Decimal,
}

pub struct BetService {
    ledger: Ledger,
    cfg: Arc<Config>,
    rebalancer: OnceLock<Arc<dyn Rebalancer>>,
    broadcaster: OnceLock<Arc<dyn Broadcaster>>,
}

impl BetService {
    pub fn new(ledger: Ledger, cfg: Arc<Config>) -> Self {
        Self {
            ledger,
            cfg,
            rebalancer: OnceLock::new(),
            broadcaster: OnceLock::new(),
        }
    }

    pub fn set_rebalancer(&self, rebalancer: Arc<dyn Rebalancer>) {
        let _ = self.rebalancer.set(rebalancer);
    }

    pub fn set_broadcaster(&self, broadcaster: Arc<dyn Broadcaster>) {
        let _ = self.broadcaster.set(broadcaster);
    }

    /// Validate, then atomically: deduct the stake, grow the pool, insert
    /// the bet, and write the audit entry.
    pub async fn place_bet(&self, req: PlaceBetRequest) -> Result<Bet> {
        if req.amount < self.cfg.wallet.min_bet {
            return Err(DomainError::BetTooSmall.into());
        }

        let bet = {
            let mut conn = self.ledger.lock().await;
            let tx = conn.transaction().context("place bet: begin tx")?;
            let now = Utc::now();

            // The market must be open AND inside its betting window. A bet
            // racing the resolution sweep dies here, not in a frozen pool.
            let market = markets::get_by_id(&tx, req.market_id)?;
            if !market.is_open() || market.closes_at <= now {
                return Err(DomainError::MarketNotOpen.into());
            }

            // Odds snapshot before this stake moves the pool. An empty side
            // has no odds yet; the first entrant is seeded at 1:1.
            let mut odds_at_entry = market.odds_for(req.direction);
            if odds_at_entry.is_zero() {
                odds_at_entry = Decimal::ONE;
            }

            let wallet_before = wallets::deduct_balance(&tx, req.user_id, req.amount)?;
            markets::stake_pool(&tx, req.market_id, req.direction, req.amount, now)?;

            let bet = Bet {
                id: Uuid::new_v4(),
                user_id: req.user_id,
                market_id: req.market_id,
                direction: req.direction,
                amount: req.amount,
                odds_at_entry,
                status: BetStatus::Open,
                payout: None,
                cashout_amount: None,
                cashout_fee: None,
                placed_at: now,
                resolved_at: None,
            };
            bets::insert(&tx, &bet)?;

            wallets::audit(
                &tx,
                &wallet_before,
                TxKind::BetLock,
                -req.amount,
                Some(bet.id),
                format!("Bet placed: {}", req.direction.as_str()),
            )?;

            tx.commit().context("place bet: commit")?;
            bet
        };

        info!(bet_id = %bet.id, market_id = %bet.market_id, direction = bet.direction.as_str(),
              amount = %bet.amount, odds = %bet.odds_at_entry, "bet placed");

        self.spawn_post_commit(bet.market_id);
        Ok(bet)
    }

    /// Cash out an open bet at the current odds, minus the cashout fee.
    ///
    /// The bet row flips `open → cashed_out` under a status guard, so a
    /// racing duplicate exit updates nothing and fails `BetNotActive`. The
    /// original stake leaves the pool; the difference between gross and
    /// stake is implicitly funded by the remaining pool, and the fee is
    /// collected by the house at resolution.
    pub async fn exit_bet(&self, bet_id: Uuid, user_id: Uuid) -> Result<Bet> {
        let fee_rate = self.cfg.wallet.cashout_fee_rate;

        let mut conn = self.ledger.lock().await;
        let tx = conn.transaction().context("exit bet: begin tx")?;

        let bet = bets::get_by_id(&tx, bet_id)?;
        if bet.user_id != user_id {
            return Err(DomainError::Forbidden.into());
        }
        if !bet.is_active() {
            return Err(DomainError::BetNotActive.into());
        }

        let market = markets::get_by_id(&tx, bet.market_id)?;
        if !market.is_open() {
            return Err(DomainError::MarketNotOpen.into());
        }

        let mut current_odds = market.odds_for(bet.direction);
        if current_odds.is_zero() {
            current_odds = Decimal::ONE;
        }
        let net = bet.exit_amount(current_odds, fee_rate);
        let fee = bet.exit_fee(current_odds, fee_rate);

        bets::exit_bet(&tx, bet_id, net, fee)?;
        markets::adjust_pool(&tx, bet.market_id, bet.direction, -bet.amount)?;
        let wallet_before = wallets::add_balance(&tx, user_id, net)?;
        wallets::audit(
            &tx,
            &wallet_before,
            TxKind::Cashout,
            net,
            Some(bet_id),
            format!(
                "Bet cashed out: {}, fee: {} TRY",
                bet.direction.as_str(),
                fee
            ),
        )?;

        let updated = bets::get_by_id(&tx, bet_id)?;
        tx.commit().context("exit bet: commit")?;

        info!(bet_id = %bet_id, net = %net, fee = %fee, "bet cashed out");
        Ok(updated)
    }

    pub async fn my_bets(&self, user_id: Uuid, limit: usize, offset: usize) -> Result<Vec<Bet>> {
        let conn = self.ledger.lock().await;
        bets::by_user(&conn, user_id, limit, offset)
    }

    pub async fn bet_by_id(&self, bet_id: Uuid, user_id: Uuid) -> Result<Bet> {
        let conn = self.ledger.lock().await;
        let bet = bets::get_by_id(&conn, bet_id)?;
        if bet.user_id != user_id {
            return Err(DomainError::Forbidden.into());
        }
        Ok(bet)
    }

    /// Fire-and-forget MM reaction and odds broadcast for a market whose
    /// pool just changed. Failures are logged and swallowed.
    fn spawn_post_commit(&self, market_id: Uuid) {
        let ledger = self.ledger.clone();
        let rebalancer = self.rebalancer.get().cloned();
        let broadcaster = self.broadcaster.get().cloned();
        tokio::spawn(async move {
            let work = async {
                if let Some(rebalancer) = rebalancer {
                    if let Err(e) = rebalancer.rebalance(market_id).await {
                        warn!(market_id = %market_id, error = %e, "post-bet rebalance failed");
                    }
                }
                if let Some(broadcaster) = broadcaster {
                    let market = {
                        let conn = ledger.lock().await;
                        markets::get_by_id(&conn, market_id)
                    };
                    match market {
                        Ok(market) => {
                            let summary = market.to_summary(Decimal::ZERO, Utc::now());
                            broadcaster.broadcast_market_update(summary);
                        }
                        Err(e) => {
                            warn!(market_id = %market_id, error = %e, "post-bet summary fetch failed")
                        }
                    }
                }
            };
            if tokio::time::timeout(POST_COMMIT_TIMEOUT, work).await.is_err() {
                warn!(market_id = %market_id, "post-bet chain timed out");
            }
        });
    }
}
