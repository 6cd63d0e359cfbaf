//! Oracle behaviour against live (mock) exchange endpoints.

mod common;

use common::MockExchanges;
use rust_decimal_macros::dec;
use std::time::Duration;
use updown_backend::domain::DomainError;
use updown_backend::price::PriceOracle;

fn oracle_for(exchanges: &MockExchanges, cache_ttl: Duration) -> PriceOracle {
    let mut cfg = common::test_config(&exchanges.base_url).price;
    cfg.cache_ttl = cache_ttl;
    PriceOracle::new(cfg).unwrap()
}

// Weights (50, 30, 20); prices (90 000, 91 000, 92 000) → 90 700.
#[tokio::test]
async fn weighted_price_across_all_sources() {
    let exchanges = MockExchanges::spawn().await;
    exchanges.set(Some(dec!(90000)), Some(dec!(91000)), Some(dec!(92000)));
    let oracle = oracle_for(&exchanges, Duration::ZERO);

    let (price, sources) = oracle.get_weighted_price().await.unwrap();
    assert_eq!(price, dec!(90700));
    assert_eq!(sources.len(), 3);
}

// Binance 503: re-normalise over Bybit+OKX (50 weight points) → 91 400.
#[tokio::test]
async fn one_source_down_renormalises() {
    let exchanges = MockExchanges::spawn().await;
    exchanges.set(None, Some(dec!(91000)), Some(dec!(92000)));
    let oracle = oracle_for(&exchanges, Duration::ZERO);

    let (price, sources) = oracle.get_weighted_price().await.unwrap();
    assert_eq!(price, dec!(91400));
    assert_eq!(sources.len(), 2);
    assert!(sources.iter().all(|s| s.exchange != "binance"));
}

#[tokio::test]
async fn all_sources_down_is_an_error() {
    let exchanges = MockExchanges::spawn().await;
    exchanges.fail_all();
    let oracle = oracle_for(&exchanges, Duration::ZERO);

    let err = oracle.get_weighted_price().await.unwrap_err();
    assert_eq!(
        err.downcast_ref::<DomainError>(),
        Some(&DomainError::AllSourcesDown)
    );
    assert!(oracle.get_cached_price().is_none());
}

#[tokio::test]
async fn cache_serves_within_ttl() {
    let exchanges = MockExchanges::spawn().await;
    exchanges.set_all(dec!(90000));
    let oracle = oracle_for(&exchanges, Duration::from_secs(60));

    let (first, _) = oracle.get_weighted_price().await.unwrap();
    assert_eq!(first, dec!(90000));

    // The exchanges move, but the cache is still fresh.
    exchanges.set_all(dec!(95000));
    let (second, _) = oracle.get_weighted_price().await.unwrap();
    assert_eq!(second, dec!(90000));
    assert_eq!(oracle.get_cached_price(), Some(dec!(90000)));
}

#[tokio::test]
async fn health_reflects_recent_successes() {
    let exchanges = MockExchanges::spawn().await;
    exchanges.set(Some(dec!(90000)), None, Some(dec!(90000)));
    let oracle = oracle_for(&exchanges, Duration::ZERO);

    oracle.get_weighted_price().await.unwrap();
    let status = oracle.exchange_status();
    assert_eq!(status["binance"], true);
    assert_eq!(status["bybit"], false);
    assert_eq!(status["okx"], true);
}
