//! Trigger ingress handlers.
//!
//! Webhook and API-key calls authenticate with the trigger's own credential
//! and run through the `TriggerIngestor` pipeline. Every attempt that
//! resolves to a trigger leaves a trigger log row; the HTTP status reflects
//! the logged outcome.

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use opsflow_core::repository::trigger::TriggerRepository;
use opsflow_core::workflow::trigger::{TriggerInput, TriggerOutcome};
use opsflow_types::trigger::{TriggerKind, TriggerLog, TriggerLogStatus, TriggerRecord, TriggerType};

use super::{header_string, parse_payload, IDEMPOTENCY_KEY_HEADER, SIGNATURE_HEADER, THREAD_HEADER};
use crate::http::error::AppError;
use crate::http::extractors::auth::{extract_credential, Authenticated};
use crate::http::extractors::query::LogListQuery;
use crate::http::response::ApiResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Wire form of a trigger attempt's outcome.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeView {
    pub log_id: Uuid,
    pub status: TriggerLogStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<TriggerOutcome> for OutcomeView {
    fn from(outcome: TriggerOutcome) -> Self {
        Self {
            log_id: outcome.log_id,
            status: outcome.status,
            execution_id: outcome.execution_id,
            reason: outcome.reason,
        }
    }
}

/// HTTP status for a logged trigger outcome.
pub fn outcome_status(status: TriggerLogStatus) -> StatusCode {
    match status {
        TriggerLogStatus::Accepted => StatusCode::ACCEPTED,
        TriggerLogStatus::Duplicate => StatusCode::OK,
        TriggerLogStatus::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        TriggerLogStatus::Rejected => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

/// Listing form of a trigger. Hashes and signing secrets are left out.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerView {
    pub id: Uuid,
    pub workflow_root_id: Uuid,
    pub trigger_type: TriggerType,
    pub is_active: bool,
    pub details: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&TriggerRecord> for TriggerView {
    fn from(trigger: &TriggerRecord) -> Self {
        let details = match &trigger.kind {
            TriggerKind::Schedule {
                cron_expression,
                timezone,
            } => json!({ "cronExpression": cron_expression, "timezone": timezone }),
            TriggerKind::Webhook { signing_secret, .. } => {
                json!({ "signed": signing_secret.is_some() })
            }
            TriggerKind::ApiKey {
                key_prefix,
                expires_at,
                ..
            } => json!({ "keyPrefix": key_prefix, "expiresAt": expires_at }),
            TriggerKind::Event {
                event_type,
                event_filter,
            } => json!({ "eventType": event_type, "eventFilter": event_filter }),
        };
        Self {
            id: trigger.id,
            workflow_root_id: trigger.workflow_root_id,
            trigger_type: trigger.kind.trigger_type(),
            is_active: trigger.is_active,
            details,
            last_triggered_at: trigger.last_triggered_at,
            created_at: trigger.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Trigger ingress and trigger administration routes, mounted at `/api/v1`.
pub fn trigger_routes() -> Router<AppState> {
    Router::new()
        .route("/hooks/{token}", post(receive_webhook))
        .route("/trigger", post(receive_api_key))
        .route("/orgs/{org}/events/{event_type}", post(publish_event))
        .route("/orgs/{org}/triggers", get(list_triggers))
        .route("/orgs/{org}/trigger-logs", get(list_trigger_logs))
}

fn trigger_input(headers: &HeaderMap, payload: Value) -> TriggerInput {
    TriggerInput {
        payload,
        idempotency_key: header_string(headers, IDEMPOTENCY_KEY_HEADER),
        thread_id: header_string(headers, THREAD_HEADER),
    }
}

fn outcome_response(outcome: TriggerOutcome, request_id: String, start: Instant) -> ApiResponse<OutcomeView> {
    let status = outcome_status(outcome.status);
    ApiResponse::success(OutcomeView::from(outcome), request_id, start.elapsed().as_millis() as u64)
        .with_status(status)
}

// ---------------------------------------------------------------------------
// Ingress handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/hooks/{token} - Fire a webhook trigger.
///
/// Requires an `Idempotency-Key` header. Triggers with a signing secret
/// also require `X-Opsflow-Signature` over the raw body.
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ApiResponse<OutcomeView>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let payload = parse_payload(&body)?;
    let signature = header_string(&headers, SIGNATURE_HEADER);
    let input = trigger_input(&headers, payload);

    let outcome = state
        .ingestor
        .fire_webhook(&token, &body, signature.as_deref(), input)
        .await?;

    tracing::info!(
        request_id = request_id.as_str(),
        status = %outcome.status,
        execution_id = ?outcome.execution_id,
        "webhook received"
    );

    Ok(outcome_response(outcome, request_id, start))
}

/// POST /api/v1/trigger - Fire the API-key trigger named by the credential.
///
/// `Idempotency-Key` is optional here.
pub async fn receive_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ApiResponse<OutcomeView>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let api_key = extract_credential(&headers)?;
    let payload = parse_payload(&body)?;
    let input = trigger_input(&headers, payload);

    let outcome = state.ingestor.fire_api_key(&api_key, input).await?;

    tracing::info!(
        request_id = request_id.as_str(),
        status = %outcome.status,
        execution_id = ?outcome.execution_id,
        "api key trigger received"
    );

    Ok(outcome_response(outcome, request_id, start))
}

/// POST /api/v1/orgs/{org}/events/{event_type} - Publish an event to every
/// matching subscription in the organization.
pub async fn publish_event(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path((org, event_type)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ApiResponse<Vec<OutcomeView>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let payload = parse_payload(&body)?;
    let input = trigger_input(&headers, payload);

    let outcomes = state.ingestor.fire_event(&org, &event_type, input).await?;
    let status = if outcomes.iter().any(TriggerOutcome::is_accepted) {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };

    tracing::info!(
        organization_id = org.as_str(),
        event_type = event_type.as_str(),
        subscriptions = outcomes.len(),
        "event published"
    );

    let views: Vec<OutcomeView> = outcomes.into_iter().map(OutcomeView::from).collect();
    Ok(ApiResponse::success(views, request_id, start.elapsed().as_millis() as u64).with_status(status))
}

// ---------------------------------------------------------------------------
// Administration
// ---------------------------------------------------------------------------

/// GET /api/v1/orgs/{org}/triggers - List the organization's triggers.
pub async fn list_triggers(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(org): Path<String>,
) -> Result<ApiResponse<Vec<TriggerView>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let triggers = state.store.list_triggers(&org).await?;
    let views = triggers.iter().map(TriggerView::from).collect();

    Ok(ApiResponse::success(views, request_id, start.elapsed().as_millis() as u64))
}

/// GET /api/v1/orgs/{org}/trigger-logs - Most recent trigger attempts.
pub async fn list_trigger_logs(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(org): Path<String>,
    Query(query): Query<LogListQuery>,
) -> Result<ApiResponse<Vec<TriggerLog>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let logs = state.store.list_logs(&org, query.limit()).await?;

    Ok(ApiResponse::success(logs, request_id, start.elapsed().as_millis() as u64))
}
