//! Human-approval review handlers.

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use opsflow_core::repository::execution::ExecutionRepository;
use opsflow_types::approval::{Approval, ApprovalDecision};

use super::parse_payload;
use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::extractors::query::ApprovalListQuery;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Reviewer recorded when the request body names none.
const DEFAULT_REVIEWER: &str = "admin";

/// Optional body of an approve/reject call.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub resolved_by: Option<String>,
}

/// Approval routes, mounted at `/api/v1`.
pub fn approval_routes() -> Router<AppState> {
    Router::new()
        .route("/orgs/{org}/approvals", get(list_approvals))
        .route("/orgs/{org}/approvals/{id}/approve", post(approve))
        .route("/orgs/{org}/approvals/{id}/reject", post(reject))
}

/// GET /api/v1/orgs/{org}/approvals - Approvals, pending by default.
pub async fn list_approvals(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(org): Path<String>,
    Query(query): Query<ApprovalListQuery>,
) -> Result<ApiResponse<Vec<Approval>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let approvals = state.store.list_approvals(&org, query.status()?).await?;

    Ok(ApiResponse::success(approvals, request_id, start.elapsed().as_millis() as u64))
}

/// POST /api/v1/orgs/{org}/approvals/{id}/approve
pub async fn approve(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path((org, id)): Path<(String, Uuid)>,
    body: Bytes,
) -> Result<ApiResponse<Approval>, AppError> {
    resolve(state, org, id, ApprovalDecision::Approve, body).await
}

/// POST /api/v1/orgs/{org}/approvals/{id}/reject
pub async fn reject(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path((org, id)): Path<(String, Uuid)>,
    body: Bytes,
) -> Result<ApiResponse<Approval>, AppError> {
    resolve(state, org, id, ApprovalDecision::Reject, body).await
}

async fn resolve(
    state: AppState,
    org: String,
    id: Uuid,
    decision: ApprovalDecision,
    body: Bytes,
) -> Result<ApiResponse<Approval>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let request: ResolveRequest = match parse_payload(&body)? {
        serde_json::Value::Null => ResolveRequest::default(),
        value => serde_json::from_value(value)
            .map_err(|e| AppError::Validation(format!("invalid resolve request: {e}")))?,
    };
    let resolved_by = request.resolved_by.as_deref().unwrap_or(DEFAULT_REVIEWER);

    let approval = state
        .dispatcher
        .resolve_approval(&org, &id, decision, resolved_by)
        .await?;
    let execution_link = format!("/api/v1/orgs/{org}/executions/{}", approval.wf_execution_id);

    Ok(
        ApiResponse::success(approval, request_id, start.elapsed().as_millis() as u64)
            .with_link("execution", &execution_link),
    )
}
