//! HTTP Basic auth against a single configured credential.
//!
//! Parsing follows the standard `Authorization: Basic <base64(user:pass)>`
//! scheme: base64-decode, then split once on `:` so a password containing
//! a colon still parses correctly.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::STANDARD, Engine};

use crate::errors::Error;

use super::AppState;

fn parse_basic_auth(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let mut parts = decoded.splitn(2, ':');
    let username = parts.next()?.to_string();
    let password = parts.next()?.to_string();
    Some((username, password))
}

/// Constant-time comparison so a failed credential check doesn't leak
/// timing information proportional to the number of matching prefix bytes.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub async fn require_basic_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, Error> {
    let config = &state.config;
    let header_value = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(Error::Unauthorized)?;

    let (username, password) = parse_basic_auth(header_value).ok_or(Error::Unauthorized)?;

    if username != config.auth_username || !constant_time_eq(&password, &config.auth_password) {
        return Err(Error::Unauthorized);
    }

    Ok(next.run(request).await)
}
