//! Market-maker rebalancer.
//!
//! Reacts to accepted bets by injecting platform liquidity into the thin
//! side of the pool, under exposure, loss and reserve caps. Reactions to
//! the same market are coalesced through a per-market try-lock: an
//! overlapping invocation skips silently and the running one sees the
//! final pool state.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bet::Rebalancer;
use crate::config::Config;
use crate::domain::bet::floor4;
use crate::domain::{Direction, DomainError, TxKind};
use crate::store::{self, markets, mm_positions, wallets, Ledger};

/// Seed an empty pool side at this fraction of the populated side.
fn seed_ratio() -> Decimal {
    Decimal::new(30, 2) // 0.30
}

/// Top a thin side up toward this fraction of the thick side.
fn target_ratio() -> Decimal {
    Decimal::new(20, 2) // 0.20
}

const MM_ENABLED_KEY: &str = "mm_enabled";

pub struct MmService {
    ledger: Ledger,
    cfg: Arc<Config>,
    enabled: AtomicBool,
    busy: Mutex<HashSet<Uuid>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MmStats {
    pub daily_spend: Decimal,
    pub daily_pnl: Decimal,
    pub total_interventions: usize,
    pub platform_reserve: Decimal,
    pub enabled: bool,
}

struct MarketGuard<'a> {
    busy: &'a Mutex<HashSet<Uuid>>,
    market_id: Uuid,
}

impl Drop for MarketGuard<'_> {
    fn drop(&mut self) {
        self.busy.lock().remove(&self.market_id);
    }
}

impl MmService {
    /// Build the service, restoring the kill switch from the settings store.
    pub async fn new(ledger: Ledger, cfg: Arc<Config>) -> Result<Self> {
        let enabled = {
            let conn = ledger.lock().await;
            store::get_setting(&conn, MM_ENABLED_KEY)?
                .map(|v| v != "false")
                .unwrap_or(true)
        };
        Ok(Self {
            ledger,
            cfg,
            enabled: AtomicBool::new(enabled),
            busy: Mutex::new(HashSet::new()),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Flip the kill switch and persist it so a restart keeps the state.
    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.enabled.store(enabled, Ordering::Relaxed);
        let conn = self.ledger.lock().await;
        store::set_setting(&conn, MM_ENABLED_KEY, if enabled { "true" } else { "false" })?;
        info!(enabled, "mm kill switch toggled");
        Ok(())
    }

    fn try_acquire(&self, market_id: Uuid) -> Option<MarketGuard<'_>> {
        if self.busy.lock().insert(market_id) {
            Some(MarketGuard {
                busy: &self.busy,
                market_id,
            })
        } else {
            None
        }
    }

    /// Guarded liquidity injection. The first two misses are silent no-ops
    /// by design; breached loss/reserve limits are real errors so callers
    /// and monitoring see them.
    async fn place_platform_bet(
        &self,
        market_id: Uuid,
        direction: Direction,
        amount: Decimal,
        reason: &str,
    ) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        if amount < self.cfg.mm.min_mm_bet {
            return Ok(());
        }

        let mut conn = self.ledger.lock().await;

        let daily_spend = mm_positions::daily_spend(&conn, chrono::Utc::now())?;
        if daily_spend + amount > self.cfg.mm.max_daily_loss {
            warn!(daily_spend = %daily_spend, limit = %self.cfg.mm.max_daily_loss,
                  "mm daily loss limit reached, suspending injections for today");
            return Err(DomainError::MmDailyLossExceeded.into());
        }

        let platform = wallets::get_platform(&conn)?;
        if platform.balance - amount < self.cfg.mm.min_reserve {
            warn!(reserve = %platform.balance, floor = %self.cfg.mm.min_reserve,
                  "platform reserve below minimum, mm blocked");
            return Err(DomainError::MmReserveInsufficient.into());
        }

        let exposure = mm_positions::market_exposure(&conn, market_id)?;
        if exposure + amount > self.cfg.mm.max_exposure_per_market {
            return Ok(());
        }

        let tx = conn.transaction().context("mm injection: begin tx")?;
        let wallet_before = wallets::deduct_platform_balance(&tx, amount)?;
        wallets::audit(
            &tx,
            &wallet_before,
            TxKind::BetLock,
            -amount,
            Some(market_id),
            format!("MM injection: {} ({reason})", direction.as_str()),
        )?;
        markets::adjust_pool(&tx, market_id, direction, amount)?;
        mm_positions::insert(&tx, market_id, direction, amount, reason)?;
        tx.commit().context("mm injection: commit")?;

        info!(market_id = %market_id, direction = direction.as_str(), amount = %amount,
              reason, "mm liquidity injected");
        Ok(())
    }

    pub async fn stats(&self) -> Result<MmStats> {
        let conn = self.ledger.lock().await;
        let now = chrono::Utc::now();
        Ok(MmStats {
            daily_spend: mm_positions::daily_spend(&conn, now)?,
            daily_pnl: mm_positions::daily_pnl(&conn, now)?,
            total_interventions: mm_positions::daily_intervention_count(&conn, now)?,
            platform_reserve: wallets::get_platform(&conn)?.balance,
            enabled: self.is_enabled(),
        })
    }
}

#[async_trait]
impl Rebalancer for MmService {
    /// Inspect the pool and act on imbalance. Skips silently when another
    /// rebalance for the same market is in flight.
    async fn rebalance(&self, market_id: Uuid) -> Result<()> {
        let Some(_guard) = self.try_acquire(market_id) else {
            return Ok(());
        };

        let market = {
            let conn = self.ledger.lock().await;
            markets::get_by_id(&conn, market_id)?
        };
        if !market.is_open() {
            return Ok(());
        }

        let up = market.pool_up;
        let down = market.pool_down;
        let threshold = self.cfg.mm.trigger_threshold;

        if down.is_zero() && !up.is_zero() {
            let seed = floor4(up * seed_ratio());
            self.place_platform_bet(market_id, Direction::Down, seed, "seed_down")
                .await?;
        } else if up.is_zero() && !down.is_zero() {
            let seed = floor4(down * seed_ratio());
            self.place_platform_bet(market_id, Direction::Up, seed, "seed_up")
                .await?;
        } else if !up.is_zero() && down / up < threshold {
            let needed = floor4(up * target_ratio()) - down;
            if needed > self.cfg.mm.min_mm_bet {
                self.place_platform_bet(market_id, Direction::Down, needed, "rebalance_down")
                    .await?;
            }
        } else if !down.is_zero() && up / down < threshold {
            let needed = floor4(down * target_ratio()) - up;
            if needed > self.cfg.mm.min_mm_bet {
                self.place_platform_bet(market_id, Direction::Up, needed, "rebalance_up")
                    .await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests_support::test_config;
    use crate::domain::{Market, MarketStatus};
    use rust_decimal_macros::dec;

    async fn service() -> MmService {
        MmService::new(Ledger::open_in_memory().unwrap(), Arc::new(test_config()))
            .await
            .unwrap()
    }

    async fn insert_open_market(ledger: &Ledger) -> Uuid {
        let now = chrono::Utc::now();
        let market = Market {
            id: Uuid::new_v4(),
            status: MarketStatus::Open,
            open_price: Some(dec!(90000)),
            close_price: None,
            result: None,
            pool_up: Decimal::ZERO,
            pool_down: Decimal::ZERO,
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
        market.id
    }

    // One holder per market; distinct markets rebalance in parallel.
    #[tokio::test]
    async fn per_market_try_lock_is_exclusive_until_released() {
        let mm = service().await;
        let market_a = Uuid::new_v4();
        let market_b = Uuid::new_v4();

        let guard = mm.try_acquire(market_a).expect("first acquire wins");
        assert!(mm.try_acquire(market_a).is_none());
        assert!(mm.try_acquire(market_b).is_some());

        drop(guard);
        assert!(mm.try_acquire(market_a).is_some());
    }

    #[tokio::test]
    async fn injection_below_minimum_is_silent() {
        let mm = service().await;
        let market_id = insert_open_market(&mm.ledger).await;
        {
            let conn = mm.ledger.lock().await;
            wallets::add_platform_balance(&conn, dec!(50000)).unwrap();
        }

        mm.place_platform_bet(market_id, Direction::Down, dec!(5), "seed_down")
            .await
            .unwrap();

        let conn = mm.ledger.lock().await;
        assert!(mm_positions::open_by_market(&conn, market_id).unwrap().is_empty());
        assert_eq!(wallets::get_platform(&conn).unwrap().balance, dec!(50000));
    }

    #[tokio::test]
    async fn kill_switch_short_circuits_injections() {
        let mm = service().await;
        let market_id = insert_open_market(&mm.ledger).await;
        {
            let conn = mm.ledger.lock().await;
            wallets::add_platform_balance(&conn, dec!(200000)).unwrap();
        }

        mm.set_enabled(false).await.unwrap();
        mm.place_platform_bet(market_id, Direction::Down, dec!(300), "seed_down")
            .await
            .unwrap();
        {
            let conn = mm.ledger.lock().await;
            assert!(mm_positions::open_by_market(&conn, market_id).unwrap().is_empty());
        }

        mm.set_enabled(true).await.unwrap();
        mm.place_platform_bet(market_id, Direction::Down, dec!(300), "seed_down")
            .await
            .unwrap();
        let conn = mm.ledger.lock().await;
        let positions = mm_positions::open_by_market(&conn, market_id).unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].amount, dec!(300));
    }

    #[tokio::test]
    async fn rebalance_skips_markets_that_are_not_open() {
        let mm = service().await;
        let market_id = insert_open_market(&mm.ledger).await;
        {
            let conn = mm.ledger.lock().await;
            wallets::add_platform_balance(&conn, dec!(200000)).unwrap();
            markets::adjust_pool(&conn, market_id, Direction::Up, dec!(1000)).unwrap();
            markets::suspend(&conn, market_id, "maintenance").unwrap();
        }

        // A lopsided pool on a suspended market draws no injection.
        mm.rebalance(market_id).await.unwrap();
        let conn = mm.ledger.lock().await;
        assert!(mm_positions::open_by_market(&conn, market_id).unwrap().is_empty());
    }
}
