//! CLI approval subcommands: list, approve and reject.
//!
//! Resolving an approval continues its execution in this process, the same
//! way `executions start` does.

use anyhow::Result;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use serde_json::json;
use uuid::Uuid;

use opsflow_core::repository::execution::ExecutionRepository;
use opsflow_types::approval::{ApprovalDecision, ApprovalStatus};
use opsflow_types::execution::Execution;

use super::{execution_status_label, short_id};
use crate::state::AppState;

fn approval_status_cell(status: ApprovalStatus) -> Cell {
    let color = match status {
        ApprovalStatus::Pending => Color::Yellow,
        ApprovalStatus::Approved => Color::Green,
        ApprovalStatus::Rejected => Color::Red,
    };
    Cell::new(status.as_str()).fg(color)
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

pub async fn list(
    state: &AppState,
    org: &str,
    status: Option<ApprovalStatus>,
    json: bool,
) -> Result<()> {
    let status = status.or(Some(ApprovalStatus::Pending));
    let approvals = state
        .store
        .list_approvals(org, status)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list approvals: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&approvals)?);
        return Ok(());
    }

    if approvals.is_empty() {
        println!();
        println!("  No {} approvals for '{org}'.", status.map_or("", |s| s.as_str()));
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Id").fg(Color::Cyan),
            Cell::new("Execution"),
            Cell::new("Step"),
            Cell::new("Action"),
            Cell::new("Resource"),
            Cell::new("Status"),
            Cell::new("Requested"),
        ]);

    for a in &approvals {
        let action = match (
            a.metadata.get("integration").and_then(|v| v.as_str()),
            a.metadata.get("operation").and_then(|v| v.as_str()),
        ) {
            (Some(integration), Some(operation)) => format!("{integration}.{operation}"),
            _ => "-".to_string(),
        };
        let resource = match (&a.resource_type, &a.resource_id) {
            (Some(kind), Some(id)) => format!("{kind}/{id}"),
            (Some(kind), None) => kind.clone(),
            (None, Some(id)) => id.clone(),
            (None, None) => "-".to_string(),
        };
        table.add_row(vec![
            Cell::new(a.id),
            Cell::new(short_id(&a.wf_execution_id)),
            Cell::new(&a.step_slug),
            Cell::new(action),
            Cell::new(resource),
            approval_status_cell(a.status),
            Cell::new(a.created_at.format("%Y-%m-%d %H:%M")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Approve / reject
// ---------------------------------------------------------------------------

/// Record a decision, then drive the execution until it finishes or parks
/// on its next approval.
pub async fn resolve(
    state: &AppState,
    org: &str,
    id: &Uuid,
    decision: ApprovalDecision,
    resolved_by: &str,
    json: bool,
) -> Result<Execution> {
    let approval = state
        .dispatcher
        .resolve_approval(org, id, decision, resolved_by)
        .await?;
    let execution = state
        .dispatcher
        .run_to_completion(org, &approval.wf_execution_id)
        .await?;

    if json {
        let out = json!({ "approval": approval, "execution": execution });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(execution);
    }

    let verb = match decision {
        ApprovalDecision::Approve => style("Approved").green().bold(),
        ApprovalDecision::Reject => style("Rejected").red().bold(),
    };
    println!();
    println!(
        "  {verb} step '{}' of execution {} as {}",
        approval.step_slug,
        short_id(&approval.wf_execution_id),
        style(resolved_by).cyan()
    );
    println!("  Execution is now {}", execution_status_label(execution.status));
    println!();
    Ok(execution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::execution;
    use crate::cli::workflow::publish_yaml;
    use crate::state::tests::{gated_crm_connector, test_state_with_connectors};
    use opsflow_types::execution::ExecutionStatus;

    const REFUND: &str = r#"
name: refund
organizationId: org-1
steps:
  - slug: start
    type: start
    next: { default: refund }
  - slug: refund
    type: action
    config: { integration: crm, operation: refund, resourceType: order, resourceId: "42" }
"#;

    async fn waiting(state: &AppState) -> Execution {
        let definition = publish_yaml(state, REFUND).await.unwrap();
        execution::start(state, "org-1", &definition.root_id, None, None, true)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_gated_action_creates_pending_approval() {
        let state = test_state_with_connectors(None, vec![gated_crm_connector()]).await;
        let execution = waiting(&state).await;
        assert_eq!(execution.status, ExecutionStatus::WaitingApproval);

        let pending = state
            .store
            .list_approvals("org-1", Some(ApprovalStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].wf_execution_id, execution.id);
        assert_eq!(pending[0].resource_type.as_deref(), Some("order"));
        assert_eq!(pending[0].metadata["operation"], "refund");
    }

    #[tokio::test]
    async fn test_reject_cancels_execution() {
        let state = test_state_with_connectors(None, vec![gated_crm_connector()]).await;
        let execution = waiting(&state).await;
        let approval = state
            .store
            .find_approval("org-1", &execution.id, "refund")
            .await
            .unwrap()
            .unwrap();

        let finished = resolve(&state, "org-1", &approval.id, ApprovalDecision::Reject, "dana", true)
            .await
            .unwrap();
        assert_eq!(finished.status, ExecutionStatus::Cancelled);
        assert_eq!(finished.history.last().unwrap().outcome, "approval_rejected");

        let resolved = state.store.get_approval("org-1", &approval.id).await.unwrap().unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Rejected);
        assert_eq!(resolved.resolved_by.as_deref(), Some("dana"));

        // A second decision on the same approval is refused.
        assert!(
            resolve(&state, "org-1", &approval.id, ApprovalDecision::Approve, "dana", true)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_unknown_approval() {
        let state = test_state_with_connectors(None, Vec::new()).await;
        assert!(
            resolve(&state, "org-1", &Uuid::now_v7(), ApprovalDecision::Approve, "dana", true)
                .await
                .is_err()
        );
    }
}
