//! Multi-exchange BTC/USDT price oracle.
//!
//! Fetches the spot price from Binance, Bybit and OKX style endpoints in
//! parallel, computes a weighted average, and caches the result for a short
//! TTL. A subset of exchanges failing re-normalises the weights over the
//! sources that answered; only a full outage is an error.

use std::collections::HashMap;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::config::PriceConfig;
use crate::domain::{DomainError, PriceSource};

const EXCHANGE_BINANCE: &str = "binance";
const EXCHANGE_BYBIT: &str = "bybit";
const EXCHANGE_OKX: &str = "okx";

/// Healthy = a successful fetch within this window.
const HEALTH_WINDOW_SECS: i64 = 5;

struct CachedPrice {
    price: Decimal,
    sources: Vec<PriceSource>,
    fetched_at: Instant,
}

pub struct PriceOracle {
    client: reqwest::Client,
    cfg: PriceConfig,
    cache: RwLock<Option<CachedPrice>>,
    last_success: RwLock<HashMap<&'static str, DateTime<Utc>>>,
}

impl PriceOracle {
    pub fn new(cfg: PriceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.fetch_timeout)
            .user_agent("updown-backend/0.1")
            .build()
            .context("build price http client")?;
        Ok(Self {
            client,
            cfg,
            cache: RwLock::new(None),
            last_success: RwLock::new(HashMap::new()),
        })
    }

    /// Current weighted BTC/USDT price plus the exchanges that contributed.
    /// Serves from cache while it is younger than the configured TTL.
    pub async fn get_weighted_price(&self) -> Result<(Decimal, Vec<PriceSource>)> {
        {
            let cache = self.cache.read();
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.cfg.cache_ttl {
                    return Ok((cached.price, cached.sources.clone()));
                }
            }
        }

        let (binance, bybit, okx) = tokio::join!(
            self.fetch_binance(),
            self.fetch_bybit(),
            self.fetch_okx(),
        );

        let now = Utc::now();
        let mut sources = Vec::with_capacity(3);
        let attempts = [
            (EXCHANGE_BINANCE, self.cfg.binance_weight, binance),
            (EXCHANGE_BYBIT, self.cfg.bybit_weight, bybit),
            (EXCHANGE_OKX, self.cfg.okx_weight, okx),
        ];
        for (exchange, weight, outcome) in attempts {
            match outcome {
                Ok(price) => {
                    sources.push(PriceSource {
                        exchange,
                        price,
                        weight: Decimal::from(weight),
                        fetched_at: now,
                    });
                    self.last_success.write().insert(exchange, now);
                }
                Err(e) => debug!(exchange, error = %e, "price fetch failed"),
            }
        }

        let price = weighted_average(&sources).ok_or(DomainError::AllSourcesDown)?;

        *self.cache.write() = Some(CachedPrice {
            price,
            sources: sources.clone(),
            fetched_at: Instant::now(),
        });

        Ok((price, sources))
    }

    /// Most recent cached price, or `None` once the cache has gone stale.
    pub fn get_cached_price(&self) -> Option<Decimal> {
        let cache = self.cache.read();
        cache
            .as_ref()
            .filter(|c| c.fetched_at.elapsed() < self.cfg.cache_ttl)
            .map(|c| c.price)
    }

    /// Per-exchange reachability for the health dashboard.
    pub fn exchange_status(&self) -> HashMap<&'static str, bool> {
        let now = Utc::now();
        let last = self.last_success.read();
        [EXCHANGE_BINANCE, EXCHANGE_BYBIT, EXCHANGE_OKX]
            .into_iter()
            .map(|name| {
                let healthy = last
                    .get(name)
                    .map(|t| (now - *t).num_seconds() < HEALTH_WINDOW_SECS)
                    .unwrap_or(false);
                (name, healthy)
            })
            .collect()
    }

    // GET /api/v3/ticker/price?symbol=BTCUSDT → {"symbol":"BTCUSDT","price":"87350.00"}
    async fn fetch_binance(&self) -> Result<Decimal> {
        #[derive(Deserialize)]
        struct Ticker {
            #[serde(default)]
            price: String,
        }
        let url = format!("{}/api/v3/ticker/price?symbol=BTCUSDT", self.cfg.binance_url);
        let ticker: Ticker = self.get_json(&url).await.context("binance")?;
        parse_price(&ticker.price).context("binance price")
    }

    // GET /v5/market/tickers?category=spot&symbol=BTCUSDT
    //   → {"result":{"list":[{"lastPrice":"87350.00"}]}}
    async fn fetch_bybit(&self) -> Result<Decimal> {
        #[derive(Deserialize)]
        struct Ticker {
            #[serde(rename = "lastPrice", default)]
            last_price: String,
        }
        #[derive(Deserialize)]
        struct ResultBlock {
            #[serde(default)]
            list: Vec<Ticker>,
        }
        #[derive(Deserialize)]
        struct Response {
            #[serde(default)]
            result: Option<ResultBlock>,
        }
        let url = format!(
            "{}/v5/market/tickers?category=spot&symbol=BTCUSDT",
            self.cfg.bybit_url
        );
        let resp: Response = self.get_json(&url).await.context("bybit")?;
        let ticker = resp
            .result
            .and_then(|r| r.list.into_iter().next())
            .ok_or_else(|| anyhow!("bybit: empty result list"))?;
        parse_price(&ticker.last_price).context("bybit price")
    }

    // GET /api/v5/market/ticker?instId=BTC-USDT → {"data":[{"last":"87350.00"}]}
    async fn fetch_okx(&self) -> Result<Decimal> {
        #[derive(Deserialize)]
        struct Ticker {
            #[serde(default)]
            last: String,
        }
        #[derive(Deserialize)]
        struct Response {
            #[serde(default)]
            data: Vec<Ticker>,
        }
        let url = format!("{}/api/v5/market/ticker?instId=BTC-USDT", self.cfg.okx_url);
        let resp: Response = self.get_json(&url).await.context("okx")?;
        let ticker = resp
            .data
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("okx: empty data field"))?;
        parse_price(&ticker.last).context("okx price")
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self.client.get(url).send().await.context("http get")?;
        if !resp.status().is_success() {
            return Err(anyhow!("unexpected status {}", resp.status()));
        }
        resp.json::<T>().await.context("decode body")
    }
}

/// A missing or zero price is a failed source, never a default.
fn parse_price(raw: &str) -> Result<Decimal> {
    if raw.is_empty() {
        return Err(anyhow!("empty price field"));
    }
    let price: Decimal = raw.parse().context("parse decimal")?;
    if price <= Decimal::ZERO {
        return Err(anyhow!("non-positive price {price}"));
    }
    Ok(price)
}

/// `Σ(priceᵢ × weightᵢ) / Σ weightᵢ` over the sources that answered.
/// Dividing by the sum of *available* weights is what keeps the average
/// unbiased when an exchange is down. `None` when no source contributed.
pub fn weighted_average(sources: &[PriceSource]) -> Option<Decimal> {
    let mut sum_weighted = Decimal::ZERO;
    let mut sum_weights = Decimal::ZERO;
    for source in sources {
        if source.price.is_zero() || source.weight.is_zero() {
            continue;
        }
        sum_weighted += source.price * source.weight;
        sum_weights += source.weight;
    }
    if sum_weights.is_zero() {
        return None;
    }
    Some(sum_weighted / sum_weights)
}
