//! Registration, login, and token refresh.

pub mod jwt;

use std::sync::Arc;

use anyhow::{Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{DomainError, TxKind, User, UserRole};
use crate::store::{users, wallets, Ledger};

pub use jwt::{Claims, JwtHandler, TokenPair};

pub struct AuthService {
    ledger: Ledger,
    cfg: Arc<Config>,
    jwt: JwtHandler,
}

pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

impl AuthService {
    pub fn new(ledger: Ledger, cfg: Arc<Config>) -> Self {
        let jwt = JwtHandler::new(cfg.token.clone());
        Self { ledger, cfg, jwt }
    }

    pub fn jwt(&self) -> &JwtHandler {
        &self.jwt
    }

    /// Create the account, its wallet, and the signup bonus — one atomic
    /// unit — then sign the first token pair.
    pub async fn register(&self, req: RegisterRequest) -> Result<(User, TokenPair)> {
        let password_hash =
            hash(&req.password, DEFAULT_COST).context("hash registration password")?;

        let user = {
            let mut conn = self.ledger.lock().await;
            let tx = conn.transaction().context("register: begin tx")?;
            let user = users::create(
                &tx,
                req.email.trim(),
                req.username.trim(),
                &password_hash,
                UserRole::User,
            )?;

            let bonus = self.cfg.wallet.signup_bonus;
            if bonus > Decimal::ZERO {
                let wallet_before = wallets::add_balance(&tx, user.id, bonus)?;
                wallets::audit(
                    &tx,
                    &wallet_before,
                    TxKind::Bonus,
                    bonus,
                    None,
                    "Signup bonus".to_string(),
                )?;
            }

            tx.commit().context("register: commit")?;
            user
        };

        let pair = self.jwt.issue_pair(user.id, user.role)?;
        Ok((user, pair))
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<(User, TokenPair)> {
        let user = {
            let conn = self.ledger.lock().await;
            users::get_by_email(&conn, email.trim())?
        }
        .ok_or(DomainError::InvalidCredentials)?;

        let valid = verify(password, &user.password_hash).context("verify password")?;
        if !valid {
            return Err(DomainError::InvalidCredentials.into());
        }
        if !user.is_active {
            return Err(DomainError::UserInactive.into());
        }

        let pair = self.jwt.issue_pair(user.id, user.role)?;
        Ok((user, pair))
    }

    /// Exchange a refresh token for a fresh pair. The user row is re-read
    /// so role changes and deactivations take effect on rotation.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let claims = self.jwt.verify_refresh(refresh_token)?;
        let user_id: Uuid = claims.sub.parse().map_err(|_| DomainError::TokenInvalid)?;

        let user = {
            let conn = self.ledger.lock().await;
            users::get_by_id(&conn, user_id)?
        };
        if !user.is_active {
            return Err(DomainError::UserInactive.into());
        }
        self.jwt.issue_pair(user.id, user.role)
    }
}
