//! Organization status dashboard command.

use anyhow::Result;
use console::style;

use opsflow_core::repository::execution::ExecutionRepository;
use opsflow_core::repository::trigger::TriggerRepository;
use opsflow_core::repository::workflow::WorkflowRepository;
use opsflow_types::approval::ApprovalStatus;
use opsflow_types::execution::ExecutionStatus;
use opsflow_types::workflow::WorkflowStatus;

use crate::state::AppState;

/// Display the status dashboard for one organization.
///
/// Shows workflow and trigger counts, executions by status, and pending
/// approvals.
pub async fn status(state: &AppState, org: &str, json: bool) -> Result<()> {
    let workflows = state
        .store
        .list_definitions(org)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list workflows: {e}"))?;
    let active_workflows = workflows
        .iter()
        .filter(|d| d.status == WorkflowStatus::Active)
        .count();

    let triggers = state
        .store
        .list_triggers(org)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list triggers: {e}"))?;
    let active_triggers = triggers.iter().filter(|t| t.is_active).count();

    let counts = state
        .store
        .count_executions(org)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to count executions: {e}"))?;
    let count_of = |status: ExecutionStatus| {
        counts
            .iter()
            .find(|(s, _)| *s == status)
            .map_or(0, |(_, n)| *n)
    };
    let total: u64 = counts.iter().map(|(_, n)| n).sum();

    let pending = state
        .store
        .list_approvals(org, Some(ApprovalStatus::Pending))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list approvals: {e}"))?;

    if json {
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "organizationId": org,
            "database": state.config.database_url,
            "workflows": {
                "total": workflows.len(),
                "active": active_workflows,
            },
            "triggers": {
                "total": triggers.len(),
                "active": active_triggers,
            },
            "executions": {
                "total": total,
                "running": count_of(ExecutionStatus::Running),
                "waitingApproval": count_of(ExecutionStatus::WaitingApproval),
                "succeeded": count_of(ExecutionStatus::Succeeded),
                "failed": count_of(ExecutionStatus::Failed),
                "cancelled": count_of(ExecutionStatus::Cancelled),
            },
            "pendingApprovals": pending.len(),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} opsflow v{}  {}",
        style("⚡").bold(),
        env!("CARGO_PKG_VERSION"),
        style(org).cyan()
    );
    println!();

    println!("  {}", style("── Workflows ──").dim());
    println!("  Versions: {}", style(workflows.len()).bold());
    println!("  Active:   {}", style(active_workflows).green());
    println!("  Triggers: {} ({} active)", triggers.len(), active_triggers);
    println!();

    println!("  {}", style("── Executions ──").dim());
    println!("  Total:     {}", style(total).bold());
    println!("  Running:   {}", style(count_of(ExecutionStatus::Running)).cyan());
    let waiting = count_of(ExecutionStatus::WaitingApproval);
    if waiting > 0 {
        println!("  Waiting:   {}", style(waiting).yellow());
    }
    println!("  Succeeded: {}", style(count_of(ExecutionStatus::Succeeded)).green());
    let failed = count_of(ExecutionStatus::Failed);
    if failed > 0 {
        println!("  Failed:    {}", style(failed).red());
    }
    let cancelled = count_of(ExecutionStatus::Cancelled);
    if cancelled > 0 {
        println!("  Cancelled: {}", style(cancelled).dim());
    }
    println!();

    println!("  {}", style("── Approvals ──").dim());
    if pending.is_empty() {
        println!("  Pending: {}", style(0).dim());
    } else {
        println!("  Pending: {}", style(pending.len()).yellow().bold());
        println!(
            "  Review with: {}",
            style(format!("opsflow approvals list --org {org}")).dim()
        );
    }
    println!();

    println!("  {}", style("── System ──").dim());
    println!("  Database: {}", style(&state.config.database_url).dim());
    println!("  Workers:  {}", state.config.worker_count);
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;

    #[tokio::test]
    async fn test_status_on_empty_org() {
        let state = test_state(None).await;
        status(&state, "org-1", true).await.unwrap();
        status(&state, "org-1", false).await.unwrap();
    }
}
