//! Execution handlers: manual start, inspection and cancellation.

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use serde_json::Value;
use uuid::Uuid;

use opsflow_core::repository::execution::ExecutionRepository;
use opsflow_types::execution::Execution;
use opsflow_types::secure::redact_secure;

use super::{header_string, parse_payload, THREAD_HEADER};
use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::extractors::query::ExecutionListQuery;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Execution routes, mounted at `/api/v1`.
pub fn execution_routes() -> Router<AppState> {
    Router::new()
        .route("/orgs/{org}/workflows/{root_id}/executions", post(start_execution))
        .route("/orgs/{org}/executions", get(list_executions))
        .route("/orgs/{org}/executions/{id}", get(get_execution))
        .route("/orgs/{org}/executions/{id}/cancel", post(cancel_execution))
}

/// Execution as served over HTTP, with secure values in the variables
/// replaced by the redaction marker.
fn redacted(mut execution: Execution) -> Execution {
    if let Value::Object(variables) = redact_secure(&Value::Object(execution.variables)) {
        execution.variables = variables;
    } else {
        execution.variables = Default::default();
    }
    execution
}

fn execution_link(execution: &Execution) -> String {
    format!(
        "/api/v1/orgs/{}/executions/{}",
        execution.organization_id, execution.id
    )
}

/// POST /api/v1/orgs/{org}/workflows/{root_id}/executions - Start the active
/// version of a workflow with the request body as payload.
pub async fn start_execution(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path((org, root_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ApiResponse<Execution>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let payload = parse_payload(&body)?;
    let thread_id = header_string(&headers, THREAD_HEADER);

    let execution = state
        .dispatcher
        .start_execution(&org, &root_id, payload, thread_id)
        .await?;
    let link = execution_link(&execution);

    Ok(
        ApiResponse::success(redacted(execution), request_id, start.elapsed().as_millis() as u64)
            .with_status(StatusCode::ACCEPTED)
            .with_link("self", &link),
    )
}

/// GET /api/v1/orgs/{org}/executions - List recent executions.
pub async fn list_executions(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(org): Path<String>,
    Query(query): Query<ExecutionListQuery>,
) -> Result<ApiResponse<Vec<Execution>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let executions = state
        .store
        .list_executions(&org, query.status()?, query.limit())
        .await?;
    let executions = executions.into_iter().map(redacted).collect();

    Ok(ApiResponse::success(executions, request_id, start.elapsed().as_millis() as u64))
}

/// GET /api/v1/orgs/{org}/executions/{id} - Status, variables and history.
pub async fn get_execution(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path((org, id)): Path<(String, Uuid)>,
) -> Result<ApiResponse<Execution>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let execution = state
        .store
        .get_execution(&org, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Execution {id} not found")))?;
    let link = execution_link(&execution);

    Ok(
        ApiResponse::success(redacted(execution), request_id, start.elapsed().as_millis() as u64)
            .with_link("self", &link)
            .with_link("cancel", &format!("{link}/cancel")),
    )
}

/// POST /api/v1/orgs/{org}/executions/{id}/cancel - Cancel an execution.
///
/// A step in flight is signalled and the run ends `cancelled` once it
/// returns, so the execution in the response may still show `running`.
pub async fn cancel_execution(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path((org, id)): Path<(String, Uuid)>,
) -> Result<ApiResponse<Execution>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    state.dispatcher.cancel(&org, &id).await?;
    let execution = state
        .store
        .get_execution(&org, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Execution {id} not found")))?;

    tracing::info!(organization_id = org.as_str(), execution_id = %id, "execution cancel requested");

    Ok(
        ApiResponse::success(redacted(execution), request_id, start.elapsed().as_millis() as u64)
            .with_status(StatusCode::ACCEPTED),
    )
}
