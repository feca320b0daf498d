//! Durable checkpoints for execution state.
//!
//! Wraps `ExecutionRepository` with the state transitions the dispatcher
//! performs after each step. Every transition is a single `save_execution`,
//! so a step's variables, history record, and the new `current_step_slug`
//! become visible together or not at all.

use std::mem;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use opsflow_types::error::RepositoryError;
use opsflow_types::execution::{Execution, ExecutionStatus, StepRecord};
use opsflow_types::secure::redact_secure;
use opsflow_types::workflow::StepDefinition;

use crate::repository::execution::ExecutionRepository;

use super::context::VariableScope;
use super::step_runner::{StepError, StepOutput};

/// History outcome recorded when an action pauses for review.
pub const APPROVAL_REQUESTED: &str = "approval_requested";
/// History outcome recorded when a reviewer rejects the action.
pub const APPROVAL_REJECTED: &str = "approval_rejected";

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Persists execution state transitions.
///
/// Generic over `R: ExecutionRepository` so it works with any storage
/// backend (SQLite, in-memory store).
pub struct CheckpointManager<R: ExecutionRepository> {
    repo: Arc<R>,
}

impl<R: ExecutionRepository> CheckpointManager<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Record a completed step and move to `next`.
    ///
    /// With no `next` the execution succeeds. Secure values anywhere in the
    /// resulting variables are redacted before the write.
    pub async fn commit_step(
        &self,
        execution: &mut Execution,
        step: &StepDefinition,
        output: StepOutput,
        next: Option<&str>,
        started_at: DateTime<Utc>,
    ) -> Result<(), CheckpointError> {
        let mut scope = VariableScope::new(mem::take(&mut execution.variables));
        scope.set_step_output(&step.step_slug, output.output.clone());
        scope.merge(output.variables);
        execution.variables = scope
            .into_map()
            .into_iter()
            .map(|(key, value)| (key, redact_secure(&value)))
            .collect();

        let now = Utc::now();
        execution.history.push(StepRecord {
            step_slug: step.step_slug.clone(),
            step_type: step.step_type.clone(),
            outcome: output.outcome.label().to_string(),
            attempts: output.attempts,
            started_at,
            finished_at: now,
            error: output.output.get("error").and_then(|e| e.as_str()).map(str::to_string),
        });

        match next {
            Some(slug) => execution.current_step_slug = Some(slug.to_string()),
            None => {
                execution.current_step_slug = None;
                execution.status = ExecutionStatus::Succeeded;
                execution.finished_at = Some(now);
            }
        }

        self.repo.save_execution(execution).await?;
        tracing::debug!(
            execution_id = %execution.id,
            step_slug = step.step_slug.as_str(),
            next = next.unwrap_or("<end>"),
            "checkpointed step"
        );
        Ok(())
    }

    /// Pause the execution at `step` until its approval is resolved.
    pub async fn mark_waiting(
        &self,
        execution: &mut Execution,
        step: &StepDefinition,
        started_at: DateTime<Utc>,
    ) -> Result<(), CheckpointError> {
        execution.status = ExecutionStatus::WaitingApproval;
        execution.history.push(StepRecord {
            step_slug: step.step_slug.clone(),
            step_type: step.step_type.clone(),
            outcome: APPROVAL_REQUESTED.to_string(),
            attempts: 0,
            started_at,
            finished_at: Utc::now(),
            error: None,
        });
        self.repo.save_execution(execution).await?;
        tracing::debug!(
            execution_id = %execution.id,
            step_slug = step.step_slug.as_str(),
            "checkpointed waiting approval"
        );
        Ok(())
    }

    /// Finish the execution after a step error that was not routed.
    ///
    /// Rejections and cancellations end `cancelled`; everything else ends
    /// `failed` with the error kind and message recorded.
    pub async fn finalize_error(
        &self,
        execution: &mut Execution,
        step: Option<&StepDefinition>,
        error: &StepError,
        started_at: DateTime<Utc>,
    ) -> Result<(), CheckpointError> {
        let now = Utc::now();
        let (status, outcome) = match error {
            StepError::ApprovalRejected { .. } => (ExecutionStatus::Cancelled, APPROVAL_REJECTED),
            StepError::Cancelled => (ExecutionStatus::Cancelled, "cancelled"),
            _ => (ExecutionStatus::Failed, "failed"),
        };

        if let Some(step) = step {
            execution.history.push(StepRecord {
                step_slug: step.step_slug.clone(),
                step_type: step.step_type.clone(),
                outcome: outcome.to_string(),
                attempts: error.attempts(),
                started_at,
                finished_at: now,
                error: Some(error.to_string()),
            });
        }

        execution.status = status;
        execution.finished_at = Some(now);
        if status == ExecutionStatus::Failed {
            execution.error = Some(error.to_execution_error());
        }

        self.repo.save_execution(execution).await?;
        tracing::debug!(
            execution_id = %execution.id,
            status = %status,
            error_kind = %error.kind(),
            "checkpointed terminal error"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying repository operation failed.
    #[error("checkpoint repository error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
