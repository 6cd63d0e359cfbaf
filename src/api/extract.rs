//! Bearer-token authentication extractor.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::domain::{DomainError, UserRole};

use super::error::ApiError;
use super::AppState;

/// The authenticated caller, extracted from `Authorization: Bearer <jwt>`.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: UserRole,
}

impl AuthUser {
    /// Back-office surface: any non-standard role.
    pub fn require_backoffice(&self) -> Result<(), ApiError> {
        if self.role.can_access_backoffice() {
            Ok(())
        } else {
            Err(DomainError::Forbidden.into())
        }
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.role.is_admin() {
            Ok(())
        } else {
            Err(DomainError::Forbidden.into())
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(DomainError::Unauthorized)?;

        let claims = state.auth.jwt().verify_access(token)?;
        let id: Uuid = claims
            .sub
            .parse()
            .map_err(|_| DomainError::TokenInvalid)?;

        Ok(AuthUser {
            id,
            role: claims.role,
        })
    }
}
