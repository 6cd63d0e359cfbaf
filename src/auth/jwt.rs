//! Access / refresh token pairs signed with separate HMAC secrets.

use anyhow::Result;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::domain::{DomainError, UserRole};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub role: UserRole,
    /// "access" or "refresh"; a refresh token can never authorise a request.
    #[serde(rename = "type")]
    pub token_type: String,
    pub exp: usize,
    pub iat: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

pub struct JwtHandler {
    cfg: TokenConfig,
}

impl JwtHandler {
    pub fn new(cfg: TokenConfig) -> Self {
        Self { cfg }
    }

    pub fn issue_pair(&self, user_id: Uuid, role: UserRole) -> Result<TokenPair> {
        Ok(TokenPair {
            access_token: self.sign(
                user_id,
                role,
                "access",
                self.cfg.access_ttl.as_secs(),
                &self.cfg.access_secret,
            )?,
            refresh_token: self.sign(
                user_id,
                role,
                "refresh",
                self.cfg.refresh_ttl.as_secs(),
                &self.cfg.refresh_secret,
            )?,
        })
    }

    fn sign(
        &self,
        user_id: Uuid,
        role: UserRole,
        token_type: &str,
        ttl_secs: u64,
        secret: &str,
    ) -> Result<String> {
        let now = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            token_type: token_type.to_string(),
            exp: now + ttl_secs as usize,
            iat: now,
        };
        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?)
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims> {
        self.verify(token, "access", &self.cfg.access_secret)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims> {
        self.verify(token, "refresh", &self.cfg.refresh_secret)
    }

    fn verify(&self, token: &str, expected_type: &str, secret: &str) -> Result<Claims> {
        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => DomainError::TokenExpired,
            _ => DomainError::TokenInvalid,
        })?;
        if decoded.claims.token_type != expected_type {
            return Err(DomainError::TokenInvalid.into());
        }
        Ok(decoded.claims)
    }
}
