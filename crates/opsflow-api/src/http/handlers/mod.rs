//! HTTP request handlers for the REST API.
//!
//! Ingress routes (`/hooks`, `/trigger`) authenticate with the trigger's own
//! credential. Everything under `/orgs/{org}` requires the admin token.

pub mod approval;
pub mod execution;
pub mod health;
pub mod trigger;
pub mod workflow;

use axum::body::Bytes;
use axum::http::HeaderMap;
use serde_json::Value;

use crate::http::error::AppError;

/// Caller-chosen deduplication key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
/// HMAC-SHA256 of the raw body, hex or `sha256=<hex>`.
pub const SIGNATURE_HEADER: &str = "x-opsflow-signature";
/// Conversational correlation id copied onto the execution.
pub const THREAD_HEADER: &str = "x-opsflow-thread";

/// A header value as an owned string, ignoring non-UTF-8 and blank values.
pub(crate) fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Parse a JSON request body. An empty body is `null`.
pub(crate) fn parse_payload(body: &Bytes) -> Result<Value, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("request body is not valid JSON: {e}")))
}
