//! Liveness endpoint.

use std::time::Instant;

use axum::extract::State;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/health - Liveness plus a few engine facts. No auth.
pub async fn health(State(state): State<AppState>) -> ApiResponse<Value> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "workers": state.dispatcher.config().worker_count,
    });

    ApiResponse::success(data, request_id, start.elapsed().as_millis() as u64)
}
