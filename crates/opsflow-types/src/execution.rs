//! Execution state types: one run of a workflow version.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::trigger::TriggerType;

/// Status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    WaitingApproval,
    Succeeded,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::WaitingApproval => "waiting_approval",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal once the status leaves `running` / `waiting_approval`.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            ExecutionStatus::Running | ExecutionStatus::WaitingApproval
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ExecutionStatus::Running),
            "waiting_approval" => Ok(ExecutionStatus::WaitingApproval),
            "succeeded" => Ok(ExecutionStatus::Succeeded),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("invalid execution status: '{other}'")),
        }
    }
}

/// Error taxonomy surfaced on failed executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Dangling edge, unknown step type, malformed condition. Never retried.
    Definition,
    /// Missing or null required action parameters.
    Validation,
    /// Timeout or 5xx from a connector (before retries are exhausted).
    TransientExternal,
    /// Step failed for good (retries exhausted, permanent connector error).
    ExecutionFailed,
    /// A reviewer rejected the gated action.
    ApprovalRejected,
    /// The run was cancelled externally.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Definition => "definition",
            ErrorKind::Validation => "validation",
            ErrorKind::TransientExternal => "transient_external",
            ErrorKind::ExecutionFailed => "execution_failed",
            ErrorKind::ApprovalRejected => "approval_rejected",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Kind + message recorded on a failed execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
    /// Structured detail (e.g. the expected parameter list for validation errors).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// One executed step in an execution's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub step_slug: String,
    pub step_type: String,
    /// Outcome label, or a terminal marker such as `approval_requested`.
    pub outcome: String,
    /// Invocation attempts (1 unless retried).
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One run instance of a workflow version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: Uuid,
    pub wf_definition_id: Uuid,
    pub organization_id: String,
    pub status: ExecutionStatus,
    /// The only authoritative position in the graph.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_slug: Option<String>,
    /// Accumulated variables; step outputs are keyed by step slug.
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub history: Vec<StepRecord>,
    /// Conversational correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_type: Option<TriggerType>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Set only on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
}

impl Execution {
    /// A fresh running execution positioned at `entry_step`.
    pub fn new(
        organization_id: impl Into<String>,
        wf_definition_id: Uuid,
        entry_step: Option<String>,
        variables: Map<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            wf_definition_id,
            organization_id: organization_id.into(),
            status: ExecutionStatus::Running,
            current_step_slug: entry_step,
            variables,
            history: Vec::new(),
            thread_id: None,
            trigger_type: None,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    /// Total attempts recorded for a step slug across the history.
    pub fn attempts_for(&self, step_slug: &str) -> u32 {
        self.history
            .iter()
            .filter(|r| r.step_slug == step_slug)
            .map(|r| r.attempts)
            .sum()
    }
}

/// Exclusive single-writer lease on an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLease {
    pub execution_id: Uuid,
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::WaitingApproval.is_terminal());
        assert!(ExecutionStatus::Succeeded.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&ExecutionStatus::WaitingApproval).unwrap();
        assert_eq!(json, "\"waiting_approval\"");
        assert_eq!(
            "waiting_approval".parse::<ExecutionStatus>().unwrap(),
            ExecutionStatus::WaitingApproval
        );
    }

    #[test]
    fn attempts_sum_across_history() {
        let mut exec = Execution::new("org-1", Uuid::now_v7(), Some("a".into()), Map::new());
        let now = Utc::now();
        for attempts in [2, 1] {
            exec.history.push(StepRecord {
                step_slug: "a".into(),
                step_type: "action".into(),
                outcome: "success".into(),
                attempts,
                started_at: now,
                finished_at: now,
                error: None,
            });
        }
        assert_eq!(exec.attempts_for("a"), 3);
        assert_eq!(exec.attempts_for("b"), 0);
    }
}
