//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use opsflow_core::workflow::checkpoint::CheckpointError;
use opsflow_core::workflow::executor::DispatchError;
use opsflow_core::workflow::trigger::TriggerError;
use opsflow_types::error::RepositoryError;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Dispatcher errors (executions, approvals, cancellation).
    Dispatch(DispatchError),
    /// Trigger ingestion errors that prevented logging the attempt.
    Trigger(TriggerError),
    /// Storage errors surfaced directly by read endpoints.
    Repository(RepositoryError),
    /// Authentication failure.
    Unauthorized(String),
    /// Malformed request.
    Validation(String),
    NotFound(String),
    /// Generic internal error.
    Internal(String),
}

impl From<DispatchError> for AppError {
    fn from(e: DispatchError) -> Self {
        AppError::Dispatch(e)
    }
}

impl From<TriggerError> for AppError {
    fn from(e: TriggerError) -> Self {
        AppError::Trigger(e)
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        AppError::Repository(e)
    }
}

impl AppError {
    /// Status, machine-readable code and message for this error.
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Dispatch(e) => dispatch_parts(e),
            AppError::Trigger(TriggerError::NotFound) => {
                (StatusCode::NOT_FOUND, "TRIGGER_NOT_FOUND", "Trigger not found".to_string())
            }
            AppError::Trigger(TriggerError::Repository(e)) => repository_parts(e),
            AppError::Trigger(TriggerError::Dispatch(e)) => dispatch_parts(e),
            AppError::Repository(e) => repository_parts(e),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        }
    }
}

fn dispatch_parts(e: &DispatchError) -> (StatusCode, &'static str, String) {
    match e {
        DispatchError::ExecutionNotFound(_) => {
            (StatusCode::NOT_FOUND, "EXECUTION_NOT_FOUND", e.to_string())
        }
        DispatchError::ApprovalNotFound(_) => {
            (StatusCode::NOT_FOUND, "APPROVAL_NOT_FOUND", e.to_string())
        }
        DispatchError::DefinitionNotFound(_) => {
            (StatusCode::NOT_FOUND, "WORKFLOW_NOT_FOUND", e.to_string())
        }
        DispatchError::NoActiveVersion(_) => {
            (StatusCode::CONFLICT, "NO_ACTIVE_VERSION", e.to_string())
        }
        DispatchError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        DispatchError::Definition(e) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "DEFINITION_ERROR", e.to_string())
        }
        DispatchError::Checkpoint(CheckpointError::Repository(e)) | DispatchError::Repository(e) => {
            repository_parts(e)
        }
    }
}

fn repository_parts(e: &RepositoryError) -> (StatusCode, &'static str, String) {
    match e {
        RepositoryError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string()),
        RepositoryError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        RepositoryError::Duplicate(msg) => (StatusCode::CONFLICT, "DUPLICATE", msg.clone()),
        RepositoryError::Connection | RepositoryError::Query(_) => {
            tracing::error!(error = %e, "storage error");
            (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR", "Storage error".to_string())
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        let body = json!({
            "data": null,
            "meta": {
                "request_id": uuid::Uuid::now_v7().to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AppError::from(DispatchError::ExecutionNotFound(Uuid::now_v7())), StatusCode::NOT_FOUND),
            (AppError::from(DispatchError::Conflict("busy".into())), StatusCode::CONFLICT),
            (AppError::from(DispatchError::NoActiveVersion(Uuid::now_v7())), StatusCode::CONFLICT),
            (AppError::from(TriggerError::NotFound), StatusCode::NOT_FOUND),
            (AppError::from(RepositoryError::Query("x".into())), StatusCode::INTERNAL_SERVER_ERROR),
            (AppError::Validation("bad".into()), StatusCode::BAD_REQUEST),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[test]
    fn test_storage_errors_hide_details() {
        let (_, code, message) =
            AppError::Repository(RepositoryError::Query("no such table".into())).parts();
        assert_eq!(code, "STORAGE_ERROR");
        assert!(!message.contains("no such table"));
    }
}
