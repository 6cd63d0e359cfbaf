//! Public API handlers.

use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::Response;
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::RegisterRequest;
use crate::bet::PlaceBetRequest;
use crate::domain::{Direction, DomainError, MarketStatus};

use super::error::ApiResult;
use super::extract::AuthUser;
use super::AppState;

#[derive(Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    20
}

// ── Auth ─────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RegisterBody {
    pub email: String,
    pub username: String,
    pub password: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> ApiResult<Json<Value>> {
    let (user, tokens) = state
        .auth
        .register(RegisterRequest {
            email: body.email,
            username: body.username,
            password: body.password,
        })
        .await?;
    Ok(Json(json!({ "user": user, "tokens": tokens })))
}

#[derive(Deserialize)]
pub struct LoginBody {
    pub email: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> ApiResult<Json<Value>> {
    let (user, tokens) = state.auth.login(&body.email, &body.password).await?;
    Ok(Json(json!({ "user": user, "tokens": tokens })))
}

#[derive(Deserialize)]
pub struct RefreshBody {
    pub refresh_token: String,
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshBody>,
) -> ApiResult<Json<Value>> {
    let tokens = state.auth.refresh(&body.refresh_token).await?;
    Ok(Json(json!({ "tokens": tokens })))
}

// ── Markets ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ListMarketsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    pub status: Option<String>,
}

pub async fn list_markets(
    State(state): State<AppState>,
    Query(query): Query<ListMarketsQuery>,
) -> ApiResult<Json<Value>> {
    let status = query.status.as_deref().and_then(MarketStatus::parse);
    let (markets, total) = state
        .markets
        .list_markets(query.limit.min(100), query.offset, status)
        .await?;
    Ok(Json(json!({ "markets": markets, "total": total })))
}

pub async fn market_history(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Value>> {
    let markets = state
        .markets
        .get_history(page.limit.min(100), page.offset)
        .await?;
    Ok(Json(json!({ "markets": markets })))
}

/// The open market with its live odds and price — the polled counterpart
/// of the WebSocket stream.
pub async fn active_market(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let summary = state.markets.get_summary().await?;
    Ok(Json(json!({ "market": summary })))
}

pub async fn get_market(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let market = state.markets.get_market(id).await?;
    let summary = market.to_summary(
        state.oracle.get_cached_price().unwrap_or(Decimal::ZERO),
        chrono::Utc::now(),
    );
    Ok(Json(json!({ "market": market, "odds": summary })))
}

// ── Bets ─────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct PlaceBetBody {
    pub market_id: Uuid,
    pub direction: String,
    pub amount: Decimal,
}

pub async fn place_bet(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<PlaceBetBody>,
) -> ApiResult<Json<Value>> {
    let direction =
        Direction::parse(&body.direction).ok_or(DomainError::InvalidDirection)?;
    let bet = state
        .bets
        .place_bet(PlaceBetRequest {
            user_id: user.id,
            market_id: body.market_id,
            direction,
            amount: body.amount,
        })
        .await?;
    Ok(Json(json!({ "bet": bet })))
}

pub async fn cashout_bet(
    State(state): State<AppState>,
    user: AuthUser,
    Path(bet_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let bet = state.bets.exit_bet(bet_id, user.id).await?;
    Ok(Json(json!({ "bet": bet })))
}

pub async fn my_bets(
    State(state): State<AppState>,
    user: AuthUser,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Value>> {
    let bets = state
        .bets
        .my_bets(user.id, page.limit.min(100), page.offset)
        .await?;
    Ok(Json(json!({ "bets": bets })))
}

// ── Wallet ───────────────────────────────────────────────────────────────────

pub async fn get_wallet(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Value>> {
    let wallet = state.wallets.get_wallet(user.id).await?;
    Ok(Json(json!({ "wallet": wallet })))
}

#[derive(Deserialize)]
pub struct DepositBody {
    pub amount: Decimal,
}

pub async fn deposit(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<DepositBody>,
) -> ApiResult<Json<Value>> {
    let wallet = state.wallets.deposit(user.id, body.amount).await?;
    Ok(Json(json!({ "wallet": wallet })))
}

#[derive(Deserialize)]
pub struct WithdrawBody {
    pub amount: Decimal,
    pub iban: String,
    #[serde(default)]
    pub note: String,
}

pub async fn request_withdraw(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<WithdrawBody>,
) -> ApiResult<Json<Value>> {
    let request = state
        .wallets
        .request_withdraw(user.id, body.amount, &body.iban, &body.note)
        .await?;
    Ok(Json(json!({ "request": request })))
}

pub async fn transactions(
    State(state): State<AppState>,
    user: AuthUser,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Value>> {
    let txns = state
        .wallets
        .transactions(user.id, page.limit.min(100), page.offset)
        .await?;
    Ok(Json(json!({ "transactions": txns })))
}

// ── Misc ─────────────────────────────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "exchanges": state.oracle.exchange_status(),
        "ws_clients": state.hub.connected_count(),
    }))
}

pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| async move { state.hub.handle_socket(socket).await })
}
