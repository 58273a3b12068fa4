//! Request authentication for the proxy and admin surfaces.
//!
//! When an auth token is configured, `/v1/*` and `/api/*` require either an
//! `Authorization: Bearer <token>` header (scheme matched case-insensitively)
//! or a `?token=<token>` query parameter. Without a configured token the
//! proxy is open, which is the expected mode on localhost.

use crate::api::handlers::AppState;
use crate::core::error::AppError;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Extract a bearer token, accepting any casing of the scheme.
fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("authorization")?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        Some(token.trim())
    } else {
        None
    }
}

/// Extract `token` from a raw query string.
fn extract_query_token(query: &str) -> Option<&str> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == "token").then_some(value)
    })
}

/// Middleware guarding the proxy and admin routes.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.config.auth_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let header_token = extract_bearer(request.headers());
    let query_token = request.uri().query().and_then(extract_query_token);

    if header_token == Some(expected) || query_token == Some(expected) {
        Ok(next.run(request).await)
    } else {
        Err(AppError::Unauthorized)
    }
}
