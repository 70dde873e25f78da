use axum::http::HeaderMap;

use crate::error::IngestError;

const BEARER_PREFIX: &str = "Bearer ";

/// Verify `Authorization: Bearer <token>` against the configured token set.
/// An empty `tokens` list disables authentication entirely (local dev).
pub fn check_bearer(headers: &HeaderMap, tokens: &[String]) -> Result<(), IngestError> {
    if tokens.is_empty() {
        return Ok(());
    }

    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix(BEARER_PREFIX));

    match token {
        Some(t) if tokens.iter().any(|known| known == t) => Ok(()),
        _ => Err(IngestError::Unauthorized),
    }
}
