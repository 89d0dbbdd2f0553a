//! Request authentication: the API-key gate, the bearer-token gate and the
//! tenant-scope header, plus admin credential checks.
//!
//! Gates are middleware; the tenant scope is an extractor. None of them look
//! at each other, so a route gets exactly the checks its router layer names.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use ring::constant_time;

use crate::error::ApiError;
use crate::rest::AppState;
use crate::token;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Authenticated admin session, inserted by the bearer gate as a request
/// extension.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub subject: String,
    pub role: String,
}

/// Static API-key gate. When no key is configured the gate is a no-op, the
/// documented "open" development mode (warned about at startup).
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = state.settings.api_key.as_deref() {
        let supplied = req
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("missing API key".into()))?;
        if !constant_time_eq(supplied, expected) {
            return Err(ApiError::Unauthorized("invalid API key".into()));
        }
    }
    Ok(next.run(req).await)
}

/// Bearer-token gate for the admin session endpoints.
pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;
    let raw = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;

    let claims = token::verify(state.settings.auth_secret.as_bytes(), raw)?;
    let session = AuthSession {
        subject: claim_str(&claims, "sub"),
        role: claim_str(&claims, "role"),
    };
    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}

fn claim_str(claims: &token::Claims, key: &str) -> String {
    claims
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Tenant scope taken from the `x-tenant-id` header. Presence is required
/// here; whether the tenant exists is checked by the operation using it.
#[derive(Debug, Clone)]
pub struct TenantScope(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for TenantScope
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| TenantScope(v.to_string()))
            .ok_or_else(|| ApiError::BadRequest(format!("missing {} header", TENANT_HEADER)))
    }
}

/// Check a supplied admin password. A configured value with a bcrypt prefix
/// is verified as a hash; anything else is compared in constant time.
pub fn verify_admin_password(configured: &str, supplied: &str) -> bool {
    if configured.starts_with("$2") {
        bcrypt::verify(supplied, configured).unwrap_or(false)
    } else {
        constant_time_eq(supplied, configured)
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    constant_time::verify_slices_are_equal(a.as_bytes(), b.as_bytes()).is_ok()
}
