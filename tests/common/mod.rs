//! Shared fixtures: a full service graph wired against an in-memory ledger
//! and a local mock exchange server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde_json::json;
use tokio::net::TcpListener;
use uuid::Uuid;

use updown_backend::bet::BetService;
use updown_backend::config::{
    Config, DbConfig, MmConfig, PriceConfig, ServerConfig, TokenConfig, WalletConfig,
};
use updown_backend::domain::{Market, TxKind, UserRole};
use updown_backend::market::MarketService;
use updown_backend::mm::MmService;
use updown_backend::price::PriceOracle;
use updown_backend::resolution::ResolutionService;
use updown_backend::store::{users, wallets, Ledger};

/// One HTTP server that impersonates all three exchanges. `None` for a
/// slot makes that exchange answer 503.
#[derive(Clone)]
pub struct MockExchanges {
    prices: Arc<RwLock<ExchangePrices>>,
    pub base_url: String,
}

#[derive(Clone, Copy)]
pub struct ExchangePrices {
    pub binance: Option<Decimal>,
    pub bybit: Option<Decimal>,
    pub okx: Option<Decimal>,
}

impl MockExchanges {
    pub async fn spawn() -> Self {
        let prices = Arc::new(RwLock::new(ExchangePrices {
            binance: Some(Decimal::from(90000)),
            bybit: Some(Decimal::from(90000)),
            okx: Some(Decimal::from(90000)),
        }));

        let app = Router::new()
            .route("/api/v3/ticker/price", get(binance_handler))
            .route("/v5/market/tickers", get(bybit_handler))
            .route("/api/v5/market/ticker", get(okx_handler))
            .with_state(prices.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            prices,
            base_url: format!("http://{addr}"),
        }
    }

    pub fn set_all(&self, price: Decimal) {
        *self.prices.write() = ExchangePrices {
            binance: Some(price),
            bybit: Some(price),
            okx: Some(price),
        };
    }

    pub fn set(&self, binance: Option<Decimal>, bybit: Option<Decimal>, okx: Option<Decimal>) {
        *self.prices.write() = ExchangePrices {
            binance,
            bybit,
            okx,
        };
    }

    pub fn fail_all(&self) {
        self.set(None, None, None);
    }
}

async fn binance_handler(State(prices): State<Arc<RwLock<ExchangePrices>>>) -> Response {
    match prices.read().binance {
        Some(p) => Json(json!({ "symbol": "BTCUSDT", "price": p.to_string() })).into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn bybit_handler(State(prices): State<Arc<RwLock<ExchangePrices>>>) -> Response {
    match prices.read().bybit {
        Some(p) => Json(json!({ "result": { "list": [{ "lastPrice": p.to_string() }] } }))
            .into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn okx_handler(State(prices): State<Arc<RwLock<ExchangePrices>>>) -> Response {
    match prices.read().okx {
        Some(p) => Json(json!({ "data": [{ "last": p.to_string() }] })).into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

pub fn test_config(exchange_base: &str) -> Config {
    Config {
        server: ServerConfig {
            port: 0,
            backoffice_port: 0,
            env: "development".into(),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            backoffice_allowed_ips: vec![],
        },
        db: DbConfig {
            path: ":memory:".into(),
        },
        token: TokenConfig {
            access_secret: "test-access-secret".into(),
            refresh_secret: "test-refresh-secret".into(),
            access_ttl: Duration::from_secs(900),
            refresh_ttl: Duration::from_secs(3600),
        },
        price: PriceConfig {
            binance_url: exchange_base.to_string(),
            bybit_url: exchange_base.to_string(),
            okx_url: exchange_base.to_string(),
            fetch_timeout: Duration::from_secs(2),
            // Zero TTL: every oracle call hits the mock server, so tests can
            // move the price between calls.
            cache_ttl: Duration::from_secs(0),
            binance_weight: 50,
            bybit_weight: 30,
            okx_weight: 20,
        },
        mm: MmConfig {
            max_exposure_per_market: Decimal::from(10000),
            max_daily_loss: Decimal::from(50000),
            min_reserve: Decimal::from(1000),
            trigger_threshold: Decimal::new(8, 1), // 0.8
            min_mm_bet: Decimal::from(10),
        },
        wallet: WalletConfig {
            min_bet: Decimal::from(10),
            min_withdraw: Decimal::from(10),
            max_daily_withdraw: Decimal::from(50000),
            commission_rate: Decimal::new(3, 2),  // 0.03
            cashout_fee_rate: Decimal::new(5, 2), // 0.05
            signup_bonus: Decimal::from(1000),
        },
    }
}

/// Fully wired service graph over an in-memory ledger.
pub struct TestApp {
    pub cfg: Arc<Config>,
    pub ledger: Ledger,
    pub exchanges: MockExchanges,
    pub oracle: Arc<PriceOracle>,
    pub markets: Arc<MarketService>,
    pub bets: Arc<BetService>,
    pub resolution: Arc<ResolutionService>,
    pub mm: Arc<MmService>,
}

impl TestApp {
    pub async fn new() -> Self {
        let exchanges = MockExchanges::spawn().await;
        let cfg = Arc::new(test_config(&exchanges.base_url));
        let ledger = Ledger::open_in_memory().unwrap();
        let oracle = Arc::new(PriceOracle::new(cfg.price.clone()).unwrap());
        let markets = Arc::new(MarketService::new(
            ledger.clone(),
            oracle.clone(),
            cfg.clone(),
        ));
        let bets = Arc::new(BetService::new(ledger.clone(), cfg.clone()));
        let resolution = Arc::new(ResolutionService::new(ledger.clone(), oracle.clone()));
        let mm = Arc::new(MmService::new(ledger.clone(), cfg.clone()).await.unwrap());

        markets.set_refunder(resolution.clone());

        Self {
            cfg,
            ledger,
            exchanges,
            oracle,
            markets,
            bets,
            resolution,
            mm,
        }
    }

    /// Register a user and credit an initial balance, with its audit row.
    pub async fn fund_user(&self, name: &str, amount: Decimal) -> Uuid {
        let conn = self.ledger.lock().await;
        let user = users::create(
            &conn,
            &format!("{name}@example.com"),
            name,
            "password-hash",
            UserRole::User,
        )
        .unwrap();
        if amount > Decimal::ZERO {
            let before = wallets::add_balance(&conn, user.id, amount).unwrap();
            wallets::audit(
                &conn,
                &before,
                TxKind::Deposit,
                amount,
                None,
                "Test deposit".into(),
            )
            .unwrap();
        }
        user.id
    }

    pub async fn fund_platform(&self, amount: Decimal) {
        let conn = self.ledger.lock().await;
        let before = wallets::add_platform_balance(&conn, amount).unwrap();
        wallets::audit(
            &conn,
            &before,
            TxKind::Deposit,
            amount,
            None,
            "Platform float".into(),
        )
        .unwrap();
    }

    pub async fn user_balance(&self, user_id: Uuid) -> Decimal {
        let conn = self.ledger.lock().await;
        wallets::get_by_user(&conn, user_id).unwrap().balance
    }

    pub async fn platform_balance(&self) -> Decimal {
        let conn = self.ledger.lock().await;
        wallets::get_platform(&conn).unwrap().balance
    }

    /// Open a market whose betting window is already over, ready for the
    /// resolution sweep.
    pub async fn create_expired_market(&self) -> Market {
        let opens = Utc::now() - ChronoDuration::minutes(5);
        let closes = Utc::now() - ChronoDuration::seconds(1);
        self.markets.create_market(opens, closes).await.unwrap()
    }

    /// Open a market with a live 5-minute window.
    pub async fn create_open_market(&self) -> Market {
        let opens = Utc::now();
        let closes = opens + ChronoDuration::minutes(5);
        self.markets.create_market(opens, closes).await.unwrap()
    }
}
