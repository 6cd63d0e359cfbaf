//! HTTP surface: public API, back-office API, and the WebSocket endpoint.

pub mod backoffice;
pub mod error;
pub mod extract;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::auth::AuthService;
use crate::bet::BetService;
use crate::config::Config;
use crate::market::MarketService;
use crate::mm::MmService;
use crate::price::PriceOracle;
use crate::resolution::ResolutionService;
use crate::store::Ledger;
use crate::wallet::WalletService;
use crate::ws::Hub;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub ledger: Ledger,
    pub auth: Arc<AuthService>,
    pub bets: Arc<BetService>,
    pub markets: Arc<MarketService>,
    pub wallets: Arc<WalletService>,
    pub mm: Arc<MmService>,
    pub resolution: Arc<ResolutionService>,
    pub oracle: Arc<PriceOracle>,
    pub hub: Arc<Hub>,
}

/// Public router: auth, markets, bets, wallet, live stream.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ws", get(handlers::ws_upgrade))
        .route("/api/auth/register", post(handlers::register))
        .route("/api/auth/login", post(handlers::login))
        .route("/api/auth/refresh", post(handlers::refresh))
        .route("/api/markets", get(handlers::list_markets))
        .route("/api/markets/active", get(handlers::active_market))
        .route("/api/markets/history", get(handlers::market_history))
        .route("/api/markets/:id", get(handlers::get_market))
        .route("/api/bets", post(handlers::place_bet))
        .route("/api/bets/mine", get(handlers::my_bets))
        .route("/api/bets/:id/cashout", post(handlers::cashout_bet))
        .route("/api/wallet", get(handlers::get_wallet))
        .route("/api/wallet/deposit", post(handlers::deposit))
        .route("/api/wallet/withdraw", post(handlers::request_withdraw))
        .route("/api/wallet/transactions", get(handlers::transactions))
        .layer(middleware::from_fn(request_logging))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Back-office router, served on its own port.
pub fn backoffice_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/dashboard", get(backoffice::dashboard))
        .route("/admin/mm/stats", get(backoffice::mm_stats))
        .route("/admin/mm/toggle", post(backoffice::mm_toggle))
        .route("/admin/risk", get(backoffice::risk_overview))
        .route("/admin/withdrawals", get(backoffice::list_withdrawals))
        .route(
            "/admin/withdrawals/:id/review",
            post(backoffice::review_withdrawal),
        )
        .route("/admin/markets/:id/suspend", post(backoffice::suspend_market))
        .route("/admin/markets/:id/cancel", post(backoffice::cancel_market))
        .route("/admin/markets/:id/resolve", post(backoffice::resolve_market))
        .route("/admin/users/:id/role", post(backoffice::set_user_role))
        .route(
            "/admin/users/:id/balance",
            post(backoffice::adjust_user_balance),
        )
        .route("/admin/finance/report", get(backoffice::finance_report))
        .layer(middleware::from_fn(request_logging))
        .with_state(state)
}

/// Log method, path, status and latency for every request except /health.
async fn request_logging(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if path == "/health" {
        return next.run(request).await;
    }

    let start = Instant::now();
    let response = next.run(request).await;
    let latency = start.elapsed();
    let status = response.status().as_u16();

    if status >= 500 {
        warn!(
            method = %method,
            path = %path,
            status,
            latency_ms = latency.as_millis() as u64,
            "request failed"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            status,
            latency_ms = latency.as_millis() as u64,
            "request completed"
        );
    }

    response
}
