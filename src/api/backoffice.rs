//! Back-office handlers: operator surface over markets, the market maker,
//! withdrawals and user administration. All routes require a back-office
//! role; mutating user accounts additionally requires `admin`.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::{UserRole, WithdrawStatus};
use crate::store::{treasury, users, withdrawals};

use super::error::ApiResult;
use super::extract::AuthUser;
use super::handlers::Pagination;
use super::AppState;

/// Live operational snapshot: active market, MM health, price sources.
pub async fn dashboard(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Value>> {
    user.require_backoffice()?;

    let market = state.markets.get_summary().await.ok();
    let mm = state.mm.stats().await?;
    Ok(Json(json!({
        "active_market": market,
        "mm": mm,
        "exchanges": state.oracle.exchange_status(),
        "ws_clients": state.hub.connected_count(),
    })))
}

pub async fn mm_stats(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Value>> {
    user.require_backoffice()?;
    Ok(Json(json!({ "mm": state.mm.stats().await? })))
}

#[derive(Deserialize)]
pub struct ToggleBody {
    pub enabled: bool,
}

pub async fn mm_toggle(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<ToggleBody>,
) -> ApiResult<Json<Value>> {
    user.require_admin()?;
    state.mm.set_enabled(body.enabled).await?;
    Ok(Json(json!({ "enabled": state.mm.is_enabled() })))
}

// ── Markets ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SuspendBody {
    pub reason: String,
}

pub async fn suspend_market(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<SuspendBody>,
) -> ApiResult<Json<Value>> {
    user.require_backoffice()?;
    state.markets.suspend(id, &body.reason).await?;
    Ok(Json(json!({ "status": "suspended" })))
}

pub async fn cancel_market(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    user.require_backoffice()?;
    state.markets.cancel(id).await?;
    Ok(Json(json!({ "status": "cancelled" })))
}

/// Operator-initiated settlement, e.g. for a market suspended on a price
/// outage once the oracle is healthy again.
pub async fn resolve_market(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    user.require_backoffice()?;
    state.resolution.resolve_one(id).await?;
    Ok(Json(json!({ "status": "resolved" })))
}

// ── Withdrawals ──────────────────────────────────────────────────────────────

fn default_limit() -> usize {
    20
}

#[derive(Deserialize)]
pub struct ListWithdrawalsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    pub status: Option<String>,
}

pub async fn list_withdrawals(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListWithdrawalsQuery>,
) -> ApiResult<Json<Value>> {
    user.require_backoffice()?;
    let status = query.status.as_deref().and_then(WithdrawStatus::parse);
    let requests = state
        .wallets
        .list_withdrawals(status, query.limit.min(100), query.offset)
        .await?;
    Ok(Json(json!({ "requests": requests })))
}

#[derive(Deserialize)]
pub struct ReviewBody {
    /// "approved", "rejected" or "completed".
    pub decision: WithdrawStatus,
    #[serde(default)]
    pub note: String,
}

pub async fn review_withdrawal(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<ReviewBody>,
) -> ApiResult<Json<Value>> {
    user.require_backoffice()?;
    let request = state
        .wallets
        .review_withdraw(id, body.decision, user.id, &body.note)
        .await?;
    Ok(Json(json!({ "request": request })))
}

// ── Users ────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RoleBody {
    pub role: UserRole,
}

pub async fn set_user_role(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<RoleBody>,
) -> ApiResult<Json<Value>> {
    user.require_admin()?;
    {
        let conn = state.ledger.lock().await;
        users::set_role(&conn, id, body.role)?;
    }
    Ok(Json(json!({ "status": "updated" })))
}

#[derive(Deserialize)]
pub struct AdjustBody {
    /// Signed: positive credits, negative debits.
    pub delta: Decimal,
    pub reason: String,
}

pub async fn adjust_user_balance(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<AdjustBody>,
) -> ApiResult<Json<Value>> {
    user.require_admin()?;
    let wallet = state
        .wallets
        .admin_adjust(id, body.delta, user.id, &body.reason)
        .await?;
    Ok(Json(json!({ "wallet": wallet })))
}

// ── Finance ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ReportQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub async fn finance_report(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Json<Value>> {
    user.require_backoffice()?;
    let to = query.to.unwrap_or_else(Utc::now);
    let from = query.from.unwrap_or(to - Duration::days(1));
    let report = {
        let conn = state.ledger.lock().await;
        treasury::finance_report(&conn, from, to)?
    };
    Ok(Json(json!({ "report": report })))
}

/// Pending requests count plus today's figures, for the risk view.
pub async fn risk_overview(
    State(state): State<AppState>,
    user: AuthUser,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Value>> {
    user.require_backoffice()?;
    let pending = {
        let conn = state.ledger.lock().await;
        withdrawals::list(&conn, Some(WithdrawStatus::Pending), page.limit.min(100), 0)?
    };
    let mm = state.mm.stats().await?;
    Ok(Json(json!({
        "pending_withdrawals": pending,
        "mm": mm,
    })))
}
