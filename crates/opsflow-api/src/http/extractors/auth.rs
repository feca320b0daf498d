//! Credential extraction and admin authentication.
//!
//! Credentials are read from:
//! - `Authorization: Bearer <key>` header
//! - `X-API-Key: <key>` header
//!
//! The admin token guards the organization-scoped routes. API keys used by
//! `POST /trigger` are not checked here; the trigger pipeline resolves them.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use secrecy::ExposeSecret;

use opsflow_core::service::TokenHasher;
use opsflow_infra::crypto::Sha256TokenHasher;

use crate::http::error::AppError;
use crate::state::AppState;

/// Authenticated admin request marker. Extracting this validates the token.
pub struct Authenticated;

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = &state.admin_token else {
            return Err(AppError::Unauthorized(
                "Admin API disabled. Start the server with OPSFLOW_ADMIN_TOKEN set.".to_string(),
            ));
        };
        let presented = extract_credential(&parts.headers)?;

        if tokens_match(expected.expose_secret(), &presented) {
            Ok(Authenticated)
        } else {
            tracing::warn!(path = %parts.uri.path(), "rejected admin request");
            Err(AppError::Unauthorized("Invalid admin token.".to_string()))
        }
    }
}

/// Extract a bearer credential from request headers.
pub fn extract_credential(headers: &HeaderMap) -> Result<String, AppError> {
    if let Some(auth) = headers.get("authorization") {
        let auth_str = auth.to_str().map_err(|_| {
            AppError::Unauthorized("Invalid Authorization header encoding".to_string())
        })?;
        if let Some(key) = auth_str.strip_prefix("Bearer ") {
            return Ok(key.trim().to_string());
        }
    }

    if let Some(key) = headers.get("x-api-key") {
        let key_str = key.to_str().map_err(|_| {
            AppError::Unauthorized("Invalid X-API-Key header encoding".to_string())
        })?;
        return Ok(key_str.trim().to_string());
    }

    Err(AppError::Unauthorized(
        "Missing credential. Provide via 'Authorization: Bearer <key>' or 'X-API-Key: <key>' header.".to_string(),
    ))
}

/// Compare two tokens through their SHA-256 digests in constant time.
fn tokens_match(expected: &str, presented: &str) -> bool {
    let hasher = Sha256TokenHasher::new();
    let a = hasher.hash_token(expected);
    let b = hasher.hash_token(presented);
    a.len() == b.len()
        && a.bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}
