//! Workflow repository trait definition.
//!
//! Defines the storage interface for workflow definitions (versions) and
//! their step definitions.

use opsflow_types::error::RepositoryError;
use opsflow_types::workflow::{StepDefinition, WorkflowDefinition, WorkflowStatus};
use uuid::Uuid;

/// Repository trait for workflow definitions and steps.
///
/// Invariants enforced by every implementation:
/// - at most one `Active` version per `root_id` (activating a version
///   demotes the previous active one to `Inactive`);
/// - non-draft versions are immutable apart from their status.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    /// Insert or update a definition. Returns `Conflict` when the update
    /// would change the content of a non-draft version.
    fn save_definition(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Replace all steps of a definition. Returns `Conflict` for non-draft
    /// versions and `NotFound` when the definition does not exist.
    fn save_steps(
        &self,
        wf_definition_id: &Uuid,
        steps: &[StepDefinition],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_definition(
        &self,
        organization_id: &str,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// The version currently `Active` for a workflow root.
    fn get_active_definition(
        &self,
        organization_id: &str,
        root_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    fn list_definitions(
        &self,
        organization_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    /// Change a version's status. Activating demotes any other active
    /// version of the same root.
    fn set_definition_status(
        &self,
        organization_id: &str,
        id: &Uuid,
        status: WorkflowStatus,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Steps of a definition, ordered by `order` (display order only).
    fn get_steps(
        &self,
        wf_definition_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StepDefinition>, RepositoryError>> + Send;
}

/// Whether `incoming` changes anything other than the status of `existing`.
pub fn is_content_change(existing: &WorkflowDefinition, incoming: &WorkflowDefinition) -> bool {
    let mut normalized = incoming.clone();
    normalized.status = existing.status;
    &normalized != existing
}

/// Reject content edits of non-draft versions.
pub fn check_mutable(
    existing: &WorkflowDefinition,
    incoming: &WorkflowDefinition,
) -> Result<(), RepositoryError> {
    if existing.status != WorkflowStatus::Draft && is_content_change(existing, incoming) {
        return Err(RepositoryError::Conflict(format!(
            "workflow version {} is {} and cannot be modified",
            existing.id, existing.status
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use opsflow_types::workflow::WorkflowConfig;

    fn def(status: WorkflowStatus) -> WorkflowDefinition {
        WorkflowDefinition {
            id: Uuid::now_v7(),
            root_id: Uuid::now_v7(),
            organization_id: "org-1".to_string(),
            name: "refunds".to_string(),
            version: "1".to_string(),
            status,
            workflow_type: "automation".to_string(),
            config: WorkflowConfig::default(),
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn status_only_change_is_allowed_on_active() {
        let existing = def(WorkflowStatus::Active);
        let mut incoming = existing.clone();
        incoming.status = WorkflowStatus::Inactive;
        assert!(check_mutable(&existing, &incoming).is_ok());
    }

    #[test]
    fn content_change_rejected_on_active() {
        let existing = def(WorkflowStatus::Active);
        let mut incoming = existing.clone();
        incoming.name = "renamed".to_string();
        assert!(matches!(
            check_mutable(&existing, &incoming),
            Err(RepositoryError::Conflict(_))
        ));
    }

    #[test]
    fn drafts_are_mutable() {
        let existing = def(WorkflowStatus::Draft);
        let mut incoming = existing.clone();
        incoming.name = "renamed".to_string();
        assert!(check_mutable(&existing, &incoming).is_ok());
    }
}
