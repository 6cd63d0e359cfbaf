//! The three background loops that run the market lifecycle:
//!  1. market creation on every exact 5-minute wall-clock boundary,
//!  2. a resolution sweep every 5 seconds,
//!  3. a price + odds broadcast every second.
//!
//! Each loop runs on its own task, so one failing cannot take down the
//! others, and all of them exit on the shared shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::market::MarketService;
use crate::price::PriceOracle;
use crate::resolution::ResolutionService;
use crate::ws::messages::{MsgType, NewMarketMessage};
use crate::ws::{price_update_message, Hub};

const ROUND_DURATION: Duration = Duration::from_secs(5 * 60);
const RESOLUTION_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
const PRICE_BROADCAST_INTERVAL: Duration = Duration::from_secs(1);
const CREATE_MAX_ATTEMPTS: u32 = 3;
const CREATE_RETRY_DELAY: Duration = Duration::from_secs(30);

pub struct Scheduler {
    markets: Arc<MarketService>,
    resolution: Arc<ResolutionService>,
    oracle: Arc<PriceOracle>,
    hub: Arc<Hub>,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        markets: Arc<MarketService>,
        resolution: Arc<ResolutionService>,
        oracle: Arc<PriceOracle>,
        hub: Arc<Hub>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            markets,
            resolution,
            oracle,
            hub,
            shutdown,
        }
    }

    /// Spawn the three loops and return. They run until shutdown.
    pub fn start(self: Arc<Self>) {
        let creation = Arc::clone(&self);
        tokio::spawn(async move { creation.market_creation_loop().await });

        let sweep = Arc::clone(&self);
        tokio::spawn(async move { sweep.resolution_loop().await });

        let broadcast = Arc::clone(&self);
        tokio::spawn(async move { broadcast.price_broadcast_loop().await });

        info!("scheduler started");
    }

    async fn market_creation_loop(&self) {
        let mut shutdown = self.shutdown.clone();
        loop {
            let now = Utc::now();
            let boundary = next_boundary(now);
            let wait = (boundary - now)
                .to_std()
                .unwrap_or(Duration::from_millis(0));
            info!(next = %boundary, wait_secs = wait.as_secs(), "next market boundary");

            tokio::select! {
                _ = shutdown.changed() => {
                    info!("market creation loop: shutting down");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            let closes = boundary + chrono::Duration::seconds(ROUND_DURATION.as_secs() as i64);
            if let Err(e) = self.create_market_with_retry(boundary, closes).await {
                error!(error = %e, "failed to create market after retries");
            }
        }
    }

    async fn create_market_with_retry(
        &self,
        opens: DateTime<Utc>,
        closes: DateTime<Utc>,
    ) -> Result<()> {
        let mut shutdown = self.shutdown.clone();
        let mut last_err = None;
        for attempt in 1..=CREATE_MAX_ATTEMPTS {
            match self.markets.create_market(opens, closes).await {
                Ok(market) => {
                    self.hub.broadcast_new_market(NewMarketMessage {
                        msg_type: MsgType::NewMarket,
                        market_id: market.id,
                        opens_at: market.opens_at,
                        closes_at: market.closes_at,
                        open_price: market.open_price,
                        timestamp: Utc::now(),
                    });
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, max = CREATE_MAX_ATTEMPTS, error = %e,
                          "market creation failed, retrying");
                    last_err = Some(e);
                }
            }
            if attempt < CREATE_MAX_ATTEMPTS {
                tokio::select! {
                    _ = shutdown.changed() => return Ok(()),
                    _ = tokio::time::sleep(CREATE_RETRY_DELAY) => {}
                }
            }
        }
        Err(last_err.expect("at least one attempt ran"))
    }

    async fn resolution_loop(&self) {
        let mut shutdown = self.shutdown.clone();
        let mut tick = tokio::time::interval(RESOLUTION_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("resolution loop: shutting down");
                    return;
                }
                _ = tick.tick() => {
                    if let Err(e) = self.resolution.resolve_expired().await {
                        error!(error = %e, "resolution sweep failed");
                    }
                }
            }
        }
    }

    async fn price_broadcast_loop(&self) {
        let mut shutdown = self.shutdown.clone();
        let mut tick = tokio::time::interval(PRICE_BROADCAST_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("price broadcast loop: shutting down");
                    return;
                }
                _ = tick.tick() => self.broadcast_price().await,
            }
        }
    }

    async fn broadcast_price(&self) {
        // Prefer the cheap cached read; fall back to a fresh fetch.
        let price = match self.oracle.get_cached_price() {
            Some(price) => price,
            None => match self.oracle.get_weighted_price().await {
                Ok((price, _)) => price,
                Err(e) => {
                    warn!(error = %e, "price broadcast: fetch failed");
                    return;
                }
            },
        };

        // Silent when no market is open.
        let Ok(market) = self.markets.get_active().await else {
            return;
        };

        self.hub
            .broadcast_price_update(price_update_message(&market, price));
    }
}

/// The next exact 5-minute wall-clock boundary strictly after `now`.
pub fn next_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    let secs = now.timestamp();
    let step = ROUND_DURATION.as_secs() as i64;
    let next = (secs.div_euclid(step) + 1) * step;
    Utc.timestamp_opt(next, 0).unwrap()
}
