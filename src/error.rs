//! Request-boundary error type.
//!
//! Failures are rendered in the JSON error contract the web client
//! consumes: `{"detail": "<message>"}` with a category-stable status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::storage::StorageError;
use crate::token::AuthError;
use crate::vault::CryptoError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid process configuration. Fatal to the operation,
    /// never to the process.
    #[error("{0}")]
    Config(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    BadRequest(String),
    /// Unknown id, or an id owned by another tenant. The two are
    /// indistinguishable on the wire.
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Unauthorized(err.to_string())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Config(_) | ApiError::Crypto(_) | ApiError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
