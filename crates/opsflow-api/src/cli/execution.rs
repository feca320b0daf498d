//! CLI execution subcommands: list, show, start and cancel.

use anyhow::{Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use uuid::Uuid;

use opsflow_core::repository::execution::ExecutionRepository;
use opsflow_types::execution::{Execution, ExecutionStatus};

use super::{execution_status_cell, execution_status_label, parse_json_arg, short_id};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

pub async fn list(
    state: &AppState,
    org: &str,
    status: Option<ExecutionStatus>,
    limit: u32,
    json: bool,
) -> Result<()> {
    let executions = state
        .store
        .list_executions(org, status, limit)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list executions: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&executions)?);
        return Ok(());
    }

    if executions.is_empty() {
        println!();
        println!("  No executions for '{org}'.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Id").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Step"),
            Cell::new("Trigger"),
            Cell::new("Started"),
            Cell::new("Duration"),
        ]);

    for e in &executions {
        let duration = e
            .finished_at
            .map(|end| format!("{}ms", (end - e.started_at).num_milliseconds()))
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(e.id),
            execution_status_cell(e.status),
            Cell::new(e.current_step_slug.as_deref().unwrap_or("-")),
            Cell::new(e.trigger_type.map(|t| t.as_str()).unwrap_or("-")),
            Cell::new(e.started_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(duration),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Show
// ---------------------------------------------------------------------------

fn print_execution(execution: &Execution) {
    println!();
    println!(
        "  {} {}",
        style("Execution").bold(),
        style(execution.id).cyan()
    );
    println!("  Status:    {}", execution_status_label(execution.status));
    println!("  Workflow:  {}", execution.wf_definition_id);
    if let Some(step) = &execution.current_step_slug {
        println!("  Step:      {step}");
    }
    if let Some(trigger) = execution.trigger_type {
        println!("  Trigger:   {trigger}");
    }
    if let Some(thread) = &execution.thread_id {
        println!("  Thread:    {thread}");
    }
    println!(
        "  Started:   {}",
        execution.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(finished) = execution.finished_at {
        println!("  Finished:  {}", finished.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(error) = &execution.error {
        println!(
            "  Error:     {} {}",
            style(error.kind).red().bold(),
            error.message
        );
    }

    if !execution.history.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Step").fg(Color::Cyan),
                Cell::new("Type"),
                Cell::new("Outcome"),
                Cell::new("Attempts"),
                Cell::new("Duration"),
                Cell::new("Error"),
            ]);
        for record in &execution.history {
            let outcome = if record.error.is_some() {
                Cell::new(&record.outcome).fg(Color::Red)
            } else {
                Cell::new(&record.outcome).fg(Color::Green)
            };
            table.add_row(vec![
                Cell::new(&record.step_slug),
                Cell::new(&record.step_type),
                outcome,
                Cell::new(record.attempts),
                Cell::new(format!(
                    "{}ms",
                    (record.finished_at - record.started_at).num_milliseconds()
                )),
                Cell::new(record.error.as_deref().unwrap_or("")),
            ]);
        }
        println!();
        println!("{table}");
    }
    println!();
}

pub async fn show(state: &AppState, org: &str, id: &Uuid, json: bool) -> Result<()> {
    let execution = state
        .store
        .get_execution(org, id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load execution: {e}"))?
        .with_context(|| format!("Execution {id} not found in '{org}'"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&execution)?);
        return Ok(());
    }

    print_execution(&execution);
    Ok(())
}

// ---------------------------------------------------------------------------
// Start
// ---------------------------------------------------------------------------

/// Start the active version of a workflow and drive it in this process.
///
/// Returns once the run finishes or parks on an approval.
pub async fn start(
    state: &AppState,
    org: &str,
    workflow: &Uuid,
    payload: Option<&str>,
    thread: Option<String>,
    json: bool,
) -> Result<Execution> {
    let payload = parse_json_arg(payload, "payload")?;

    let started = state
        .dispatcher
        .start_execution(org, workflow, payload, thread)
        .await?;
    let execution = state
        .dispatcher
        .run_to_completion(org, &started.id)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&execution)?);
    } else {
        print_execution(&execution);
        if execution.status == ExecutionStatus::WaitingApproval {
            println!(
                "  Review with: {}",
                style(format!("opsflow approvals list --org {org}")).dim()
            );
            println!();
        }
    }
    Ok(execution)
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

pub async fn cancel(state: &AppState, org: &str, id: &Uuid, json: bool) -> Result<()> {
    state.dispatcher.cancel(org, id).await?;
    let execution = state
        .store
        .get_execution(org, id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load execution: {e}"))?
        .with_context(|| format!("Execution {id} not found in '{org}'"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&execution)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Execution {} is {}",
        style("✓").green().bold(),
        short_id(id),
        execution_status_label(execution.status)
    );
    println!();
    Ok(())
}
