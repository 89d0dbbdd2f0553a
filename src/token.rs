//! Signed bearer tokens: a compact HMAC scheme instead of a session store.
//!
//! Wire format: `base64url_nopad(claims JSON) + "." + hex(HMAC-SHA256)`,
//! where the MAC is computed over the base64 body string. Verification is a
//! pure function of the signing secret and the clock, so a request carries
//! everything the server needs and nothing is kept between calls.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::{constant_time, hmac};
use serde_json::{Map, Value};
use thiserror::Error;

/// Token claims. serde_json's map is BTreeMap-backed, so the JSON body is
/// deterministic (sorted keys, compact separators) no matter the insertion
/// order.
pub type Claims = Map<String, Value>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("malformed token")]
    MalformedToken,
    #[error("invalid token signature")]
    BadSignature,
    #[error("token expired")]
    TokenExpired,
}

/// Current unix time in seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Standard claim set for an admin session.
pub fn admin_claims(username: &str, ttl_secs: u64) -> Claims {
    let mut claims = Claims::new();
    claims.insert("sub".into(), Value::from(username));
    claims.insert("role".into(), Value::from("admin"));
    claims.insert("exp".into(), Value::from(now_secs() + ttl_secs));
    claims
}

/// Sign a claim set into a transportable token string.
pub fn sign(secret: &[u8], claims: &Claims) -> String {
    let body = URL_SAFE_NO_PAD.encode(Value::Object(claims.clone()).to_string());
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    let tag = hmac::sign(&key, body.as_bytes());
    format!("{}.{}", body, hex::encode(tag.as_ref()))
}

/// Verify a token and return its claims.
///
/// The signature is checked before the body is decoded, and the comparison
/// must not leak how many tag bytes matched.
pub fn verify(secret: &[u8], token: &str) -> Result<Claims, AuthError> {
    let (body, tag) = token.split_once('.').ok_or(AuthError::MalformedToken)?;

    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    let expected = hex::encode(hmac::sign(&key, body.as_bytes()).as_ref());
    constant_time::verify_slices_are_equal(expected.as_bytes(), tag.as_bytes())
        .map_err(|_| AuthError::BadSignature)?;

    let raw = URL_SAFE_NO_PAD
        .decode(body)
        .map_err(|_| AuthError::MalformedToken)?;
    let claims: Claims =
        serde_json::from_slice(&raw).map_err(|_| AuthError::MalformedToken)?;

    // A token without an expiry is treated as already expired.
    let exp = claims
        .get("exp")
        .and_then(Value::as_u64)
        .ok_or(AuthError::TokenExpired)?;
    if exp < now_secs() {
        return Err(AuthError::TokenExpired);
    }

    Ok(claims)
}
