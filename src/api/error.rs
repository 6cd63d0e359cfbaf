//! Maps domain errors onto HTTP responses by family.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::domain::DomainError;

/// Handler-level error wrapper. Sentinel domain errors translate to their
/// family's status code; anything else is a 500 with a generic body.
pub struct ApiError(pub anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<DomainError>() {
            Some(e) if e.is_validation() => StatusCode::BAD_REQUEST,
            Some(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            Some(e) if e.is_conflict() => StatusCode::CONFLICT,
            Some(DomainError::Forbidden) => StatusCode::FORBIDDEN,
            Some(e) if e.is_auth() => StatusCode::UNAUTHORIZED,
            Some(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = ?self.0, "internal error");
            "internal server error".to_string()
        } else {
            self.0.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
