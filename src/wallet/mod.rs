//! Wallet operations outside the bet path: deposits, withdrawal requests
//! and their review, history, and audited admin adjustments.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{
    DomainError, Transaction, TxKind, Wallet, WithdrawRequest, WithdrawStatus,
};
use crate::store::{wallets, withdrawals, Ledger};

pub struct WalletService {
    ledger: Ledger,
    cfg: Arc<Config>,
}

impl WalletService {
    pub fn new(ledger: Ledger, cfg: Arc<Config>) -> Self {
        Self { ledger, cfg }
    }

    pub async fn get_wallet(&self, user_id: Uuid) -> Result<Wallet> {
        let conn = self.ledger.lock().await;
        wallets::get_by_user(&conn, user_id)
    }

    /// Credit a deposit with its audit entry, atomically.
    pub async fn deposit(&self, user_id: Uuid, amount: Decimal) -> Result<Wallet> {
        if amount <= Decimal::ZERO {
            return Err(DomainError::NonPositiveAmount.into());
        }

        let mut conn = self.ledger.lock().await;
        let tx = conn.transaction().context("deposit: begin tx")?;
        let before = wallets::add_balance(&tx, user_id, amount)?;
        wallets::audit(
            &tx,
            &before,
            TxKind::Deposit,
            amount,
            None,
            format!("Deposit: {amount} TRY"),
        )?;
        tx.commit().context("deposit: commit")?;

        wallets::get_by_user(&conn, user_id)
    }

    /// Record a withdrawal request. Funds leave the balance immediately so
    /// the user cannot wager them while review is pending; a rejection
    /// credits them back.
    pub async fn request_withdraw(
        &self,
        user_id: Uuid,
        amount: Decimal,
        iban: &str,
        note: &str,
    ) -> Result<WithdrawRequest> {
        if amount < self.cfg.wallet.min_withdraw {
            return Err(DomainError::BelowMinWithdraw.into());
        }
        if !iban_looks_valid(iban) {
            return Err(DomainError::InvalidIban.into());
        }

        let mut conn = self.ledger.lock().await;

        let today = withdrawals::daily_total(&conn, user_id, Utc::now())?;
        if today + amount > self.cfg.wallet.max_daily_withdraw {
            return Err(DomainError::WithdrawLimitExceeded.into());
        }

        let request = WithdrawRequest {
            id: Uuid::new_v4(),
            user_id,
            amount,
            status: WithdrawStatus::Pending,
            iban: iban.trim().to_string(),
            note: note.to_string(),
            reviewed_by: None,
            review_note: String::new(),
            requested_at: Utc::now(),
            reviewed_at: None,
        };

        let tx = conn.transaction().context("withdraw request: begin tx")?;
        let before = wallets::deduct_balance(&tx, user_id, amount)?;
        wallets::audit(
            &tx,
            &before,
            TxKind::Withdraw,
            -amount,
            Some(request.id),
            format!("Withdraw request: {amount} TRY to {}", request.iban),
        )?;
        withdrawals::insert(&tx, &request)?;
        tx.commit().context("withdraw request: commit")?;

        info!(user_id = %user_id, amount = %amount, "withdraw requested");
        Ok(request)
    }

    /// Back-office review. Rejection refunds the held amount; approval and
    /// completion leave the books as they are (the money already left).
    pub async fn review_withdraw(
        &self,
        request_id: Uuid,
        decision: WithdrawStatus,
        reviewer: Uuid,
        review_note: &str,
    ) -> Result<WithdrawRequest> {
        if decision == WithdrawStatus::Pending {
            return Err(DomainError::WithdrawAlreadyReviewed.into());
        }

        let mut conn = self.ledger.lock().await;
        let request = withdrawals::get_by_id(&conn, request_id)?;

        let tx = conn.transaction().context("withdraw review: begin tx")?;
        withdrawals::review(&tx, request_id, decision, reviewer, review_note)?;
        if decision == WithdrawStatus::Rejected {
            let before = wallets::add_balance(&tx, request.user_id, request.amount)?;
            wallets::audit(
                &tx,
                &before,
                TxKind::Refund,
                request.amount,
                Some(request_id),
                "Withdraw request rejected".to_string(),
            )?;
        }
        tx.commit().context("withdraw review: commit")?;

        withdrawals::get_by_id(&conn, request_id)
    }

    pub async fn list_withdrawals(
        &self,
        status: Option<WithdrawStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WithdrawRequest>> {
        let conn = self.ledger.lock().await;
        withdrawals::list(&conn, status, limit, offset)
    }

    pub async fn transactions(
        &self,
        user_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        let conn = self.ledger.lock().await;
        wallets::transactions_for_user(&conn, user_id, limit, offset)
    }

    /// Signed manual adjustment from the back-office, always audited.
    pub async fn admin_adjust(
        &self,
        user_id: Uuid,
        delta: Decimal,
        admin_id: Uuid,
        reason: &str,
    ) -> Result<Wallet> {
        if delta.is_zero() {
            return Err(DomainError::NonPositiveAmount.into());
        }

        let mut conn = self.ledger.lock().await;
        let tx = conn.transaction().context("admin adjust: begin tx")?;
        let before = if delta > Decimal::ZERO {
            wallets::add_balance(&tx, user_id, delta)?
        } else {
            wallets::deduct_balance(&tx, user_id, -delta)?
        };
        wallets::audit(
            &tx,
            &before,
            TxKind::Bonus,
            delta,
            Some(admin_id),
            format!("Admin adjustment: {reason}"),
        )?;
        tx.commit().context("admin adjust: commit")?;

        wallets::get_by_user(&conn, user_id)
    }
}

/// Shape check only: country prefix, two check digits, alphanumeric body.
/// Full mod-97 validation belongs to the payment provider.
fn iban_looks_valid(iban: &str) -> bool {
    let iban = iban.trim();
    if iban.len() < 15 || iban.len() > 34 {
        return false;
    }
    let bytes = iban.as_bytes();
    bytes[..2].iter().all(|b| b.is_ascii_uppercase())
        && bytes[2..4].iter().all(|b| b.is_ascii_digit())
        && bytes[4..].iter().all(|b| b.is_ascii_alphanumeric())
}
