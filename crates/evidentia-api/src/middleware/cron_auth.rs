//! Shared-secret check for the cron trigger endpoints.
//!
//! Triggers must carry `Authorization: Bearer <CRON_SECRET>`. Anything else
//! is rejected before the pipeline is touched.

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use crate::error::ApiError;
use crate::AppState;

/// Extract the bearer token from the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Byte comparison that does not stop at the first mismatch.
fn secrets_match(given: &str, expected: &str) -> bool {
    let (a, b) = (given.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub async fn require_cron_secret(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let rejection = match bearer_token(request.headers()) {
        Some(token) if secrets_match(token, &state.cron_secret) => None,
        Some(_) => Some("invalid cron secret"),
        None => Some("missing bearer token"),
    };
    if let Some(reason) = rejection {
        warn!(path = %request.uri().path(), reason, "Cron trigger rejected");
        return Err(ApiError::Unauthorized(reason.to_string()));
    }
    Ok(next.run(request).await)
}
