//! Market lifecycle service: creation, querying, suspension, cancellation.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{Market, MarketStatus, MarketSummary};
use crate::price::PriceOracle;
use crate::store::{markets, Ledger};

/// The slice of the resolution engine the market service needs for
/// cancellation. Injected after both services exist.
#[async_trait]
pub trait Refunder: Send + Sync {
    async fn refund_all(&self, market_id: Uuid) -> Result<()>;
}

/// How long a `get_active` result may be served from memory. Absorbs the
/// once-a-second broadcast reads without touching the ledger.
const ACTIVE_CACHE_TTL: Duration = Duration::from_millis(500);

pub struct MarketService {
    ledger: Ledger,
    oracle: Arc<PriceOracle>,
    cfg: Arc<Config>,
    refunder: OnceLock<Arc<dyn Refunder>>,
    active_cache: RwLock<Option<(Market, Instant)>>,
}

impl MarketService {
    pub fn new(ledger: Ledger, oracle: Arc<PriceOracle>, cfg: Arc<Config>) -> Self {
        Self {
            ledger,
            oracle,
            cfg,
            refunder: OnceLock::new(),
            active_cache: RwLock::new(None),
        }
    }

    /// Inject the resolution service once it has been constructed.
    pub fn set_refunder(&self, refunder: Arc<dyn Refunder>) {
        let _ = self.refunder.set(refunder);
    }

    /// Open a new round: capture the weighted open price and insert the
    /// market with status `open`. Price unavailability propagates — a round
    /// never opens without a reference price.
    pub async fn create_market(
        &self,
        opens_at: DateTime<Utc>,
        closes_at: DateTime<Utc>,
    ) -> Result<Market> {
        anyhow::ensure!(closes_at > opens_at, "market window must close after it opens");

        let (open_price, _) = self
            .oracle
            .get_weighted_price()
            .await
            .context("create market: fetch open price")?;

        let now = Utc::now();
        let market = Market {
            id: Uuid::new_v4(),
            status: MarketStatus::Open,
            open_price: Some(open_price),
            close_price: None,
            result: None,
            pool_up: Decimal::ZERO,
            pool_down: Decimal::ZERO,
            commission_rate: self.cfg.wallet.commission_rate,
            commission_taken: Decimal::ZERO,
            opens_at,
            closes_at,
            resolved_at: None,
            suspend_reason: None,
            created_at: now,
            updated_at: now,
        };

        {
            let conn = self.ledger.lock().await;
            markets::insert(&conn, &market)?;
        }
        self.invalidate_active_cache();

        info!(market_id = %market.id, open_price = %open_price, closes_at = %closes_at, "market opened");
        Ok(market)
    }

    /// The single currently-open market, served from a short-lived cache.
    pub async fn get_active(&self) -> Result<Market> {
        {
            let cache = self.active_cache.read();
            if let Some((market, at)) = cache.as_ref() {
                if at.elapsed() < ACTIVE_CACHE_TTL {
                    return Ok(market.clone());
                }
            }
        }

        let market = {
            let conn = self.ledger.lock().await;
            markets::get_active(&conn)?
        };
        *self.active_cache.write() = Some((market.clone(), Instant::now()));
        Ok(market)
    }

    pub async fn get_market(&self, id: Uuid) -> Result<Market> {
        let conn = self.ledger.lock().await;
        markets::get_by_id(&conn, id)
    }

    pub async fn list_markets(
        &self,
        limit: usize,
        offset: usize,
        status: Option<MarketStatus>,
    ) -> Result<(Vec<Market>, usize)> {
        let conn = self.ledger.lock().await;
        markets::list(&conn, limit, offset, status)
    }

    pub async fn get_history(&self, limit: usize, offset: usize) -> Result<Vec<Market>> {
        let conn = self.ledger.lock().await;
        markets::history(&conn, limit, offset)
    }

    pub async fn suspend(&self, market_id: Uuid, reason: &str) -> Result<()> {
        {
            let conn = self.ledger.lock().await;
            markets::suspend(&conn, market_id, reason)?;
        }
        self.invalidate_active_cache();
        Ok(())
    }

    /// Void a market. Refunds run first; if they fail the market status is
    /// left untouched so the operator can retry.
    pub async fn cancel(&self, market_id: Uuid) -> Result<()> {
        let refunder = self
            .refunder
            .get()
            .context("cancel market: refunder not injected")?;

        refunder
            .refund_all(market_id)
            .await
            .context("cancel market: refund")?;

        {
            let conn = self.ledger.lock().await;
            markets::cancel(&conn, market_id)?;
        }
        self.invalidate_active_cache();
        info!(market_id = %market_id, "market cancelled and refunded");
        Ok(())
    }

    /// Active market enriched with the live price: the broadcast read model.
    pub async fn get_summary(&self) -> Result<MarketSummary> {
        let market = self.get_active().await?;
        let price = match self.oracle.get_cached_price() {
            Some(price) => price,
            None => self.oracle.get_weighted_price().await?.0,
        };
        Ok(market.to_summary(price, Utc::now()))
    }

    pub fn invalidate_active_cache(&self) {
        *self.active_cache.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests_support::test_config;
    use crate::domain::DomainError;
    use rust_decimal_macros::dec;

    // The oracle points at unset URLs; these tests only exercise paths
    // that never reach it.
    fn service() -> MarketService {
        let cfg = Arc::new(test_config());
        let oracle = Arc::new(PriceOracle::new(cfg.price.clone()).unwrap());
        MarketService::new(Ledger::open_in_memory().unwrap(), oracle, cfg)
    }

    async fn insert_open_market(service: &MarketService) -> Market {
        let now = Utc::now();
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
        let conn = service.ledger.lock().await;
        markets::insert(&conn, &market).unwrap();
        market
    }

    #[tokio::test]
    async fn create_market_rejects_inverted_window() {
        let service = service();
        let now = Utc::now();
        // Fails validation before any price fetch is attempted.
        assert!(service.create_market(now, now).await.is_err());
        assert!(service
            .create_market(now, now - chrono::Duration::minutes(5))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn get_active_serves_from_micro_cache_until_invalidated() {
        let service = service();

        let err = service.get_active().await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<DomainError>(),
            Some(&DomainError::NoOpenMarket)
        );

        let market = insert_open_market(&service).await;
        assert_eq!(service.get_active().await.unwrap().id, market.id);

        // Suspend behind the service's back: the cached row is still served.
        {
            let conn = service.ledger.lock().await;
            markets::suspend(&conn, market.id, "maintenance").unwrap();
        }
        assert_eq!(service.get_active().await.unwrap().id, market.id);

        // Invalidation forces a fresh read.
        service.invalidate_active_cache();
        let err = service.get_active().await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<DomainError>(),
            Some(&DomainError::NoOpenMarket)
        );
    }

    #[tokio::test]
    async fn suspend_records_reason_and_drops_from_active() {
        let service = service();
        let market = insert_open_market(&service).await;
        assert_eq!(service.get_active().await.unwrap().id, market.id);

        service.suspend(market.id, "oracle outage").await.unwrap();

        let stored = service.get_market(market.id).await.unwrap();
        assert_eq!(stored.status, MarketStatus::Suspended);
        assert_eq!(stored.suspend_reason.as_deref(), Some("oracle outage"));
        assert!(service.get_active().await.is_err());
    }

    #[tokio::test]
    async fn cancel_requires_injected_refunder() {
        let service = service();
        let market = insert_open_market(&service).await;
        // The capability seam is wired at boot; calling before then is an error.
        assert!(service.cancel(market.id).await.is_err());
        assert_eq!(
            service.get_market(market.id).await.unwrap().status,
            MarketStatus::Open
        );
    }
}
