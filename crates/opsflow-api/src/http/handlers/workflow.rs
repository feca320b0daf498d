//! Workflow definition handlers (read-only; definitions are published
//! through the CLI).

use std::time::Instant;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::Router;
use uuid::Uuid;

use opsflow_core::repository::workflow::WorkflowRepository;
use opsflow_types::workflow::{StepDefinition, WorkflowDefinition};

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Workflow routes, mounted at `/api/v1`.
pub fn workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/orgs/{org}/workflows", get(list_workflows))
        .route("/orgs/{org}/workflows/{id}/steps", get(get_steps))
}

/// GET /api/v1/orgs/{org}/workflows - Every stored version.
pub async fn list_workflows(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(org): Path<String>,
) -> Result<ApiResponse<Vec<WorkflowDefinition>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let definitions = state.store.list_definitions(&org).await?;

    Ok(ApiResponse::success(definitions, request_id, start.elapsed().as_millis() as u64))
}

/// GET /api/v1/orgs/{org}/workflows/{id}/steps - Steps of one version.
pub async fn get_steps(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path((org, id)): Path<(String, Uuid)>,
) -> Result<ApiResponse<Vec<StepDefinition>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    state
        .store
        .get_definition(&org, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Workflow version {id} not found")))?;
    let steps = state.store.get_steps(&id).await?;

    Ok(ApiResponse::success(steps, request_id, start.elapsed().as_millis() as u64))
}
