//! Events broadcast by the engine during execution and trigger ingestion.
//!
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.
//! Payloads never carry secure values; outputs are redacted before emission.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::{ErrorKind, ExecutionStatus};
use crate::trigger::{TriggerLogStatus, TriggerType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    ExecutionStarted {
        organization_id: String,
        execution_id: Uuid,
        wf_definition_id: Uuid,
        trigger_type: Option<TriggerType>,
    },

    StepCompleted {
        organization_id: String,
        execution_id: Uuid,
        step_slug: String,
        outcome: String,
        attempts: u32,
        duration_ms: u64,
    },

    /// A transient failure will be retried after `delay_ms`.
    StepRetrying {
        organization_id: String,
        execution_id: Uuid,
        step_slug: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },

    ApprovalRequested {
        organization_id: String,
        execution_id: Uuid,
        approval_id: Uuid,
        step_slug: String,
    },

    ExecutionFinished {
        organization_id: String,
        execution_id: Uuid,
        status: ExecutionStatus,
        error_kind: Option<ErrorKind>,
    },

    TriggerRecorded {
        organization_id: String,
        trigger_type: TriggerType,
        status: TriggerLogStatus,
        execution_id: Option<Uuid>,
    },
}

impl ExecutionEvent {
    pub fn organization_id(&self) -> &str {
        match self {
            ExecutionEvent::ExecutionStarted { organization_id, .. }
            | ExecutionEvent::StepCompleted { organization_id, .. }
            | ExecutionEvent::StepRetrying { organization_id, .. }
            | ExecutionEvent::ApprovalRequested { organization_id, .. }
            | ExecutionEvent::ExecutionFinished { organization_id, .. }
            | ExecutionEvent::TriggerRecorded { organization_id, .. } => organization_id,
        }
    }

    /// The execution this event concerns, if any.
    pub fn execution_id(&self) -> Option<Uuid> {
        match self {
            ExecutionEvent::ExecutionStarted { execution_id, .. }
            | ExecutionEvent::StepCompleted { execution_id, .. }
            | ExecutionEvent::StepRetrying { execution_id, .. }
            | ExecutionEvent::ApprovalRequested { execution_id, .. }
            | ExecutionEvent::ExecutionFinished { execution_id, .. } => Some(*execution_id),
            ExecutionEvent::TriggerRecorded { execution_id, .. } => *execution_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_retrying_serde_tag() {
        let event = ExecutionEvent::StepRetrying {
            organization_id: "org-1".to_string(),
            execution_id: Uuid::now_v7(),
            step_slug: "charge".to_string(),
            attempt: 1,
            delay_ms: 1000,
            error: "503".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step_retrying");
        let parsed: ExecutionEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_trigger_recorded_without_execution() {
        let event = ExecutionEvent::TriggerRecorded {
            organization_id: "org-1".to_string(),
            trigger_type: TriggerType::Webhook,
            status: TriggerLogStatus::Duplicate,
            execution_id: None,
        };
        assert_eq!(event.organization_id(), "org-1");
        assert!(event.execution_id().is_none());
    }
}
