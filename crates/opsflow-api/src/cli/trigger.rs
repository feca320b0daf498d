//! CLI trigger subcommands: create, list and logs.
//!
//! Webhook tokens and API keys are generated here, printed once and stored
//! only as SHA-256 digests.

use anyhow::{bail, Result};
use chrono::{Duration, Utc};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use serde_json::{json, Value};
use uuid::Uuid;

use opsflow_core::repository::trigger::TriggerRepository;
use opsflow_core::repository::workflow::WorkflowRepository;
use opsflow_core::service::TokenHasher;
use opsflow_core::workflow::scheduler::validate_schedule;
use opsflow_infra::crypto::{generate_credential, Sha256TokenHasher};
use opsflow_types::trigger::{TriggerKind, TriggerLogStatus, TriggerRecord};

use super::{short_id, CreateTrigger};
use crate::http::handlers::trigger::TriggerView;
use crate::state::AppState;

/// Characters of an API key kept as its listing prefix.
const KEY_PREFIX_LEN: usize = 8;

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// A freshly created trigger and the one-time credential it was issued.
struct Created {
    record: TriggerRecord,
    credential: Option<String>,
}

/// Build the trigger record for a create command.
fn build_trigger(kind: CreateTrigger) -> Result<(String, Uuid, Created)> {
    let hasher = Sha256TokenHasher::new();

    let (org, workflow, kind, credential) = match kind {
        CreateTrigger::Webhook {
            org,
            workflow,
            signing_secret,
        } => {
            let token = generate_credential("whk_");
            let kind = TriggerKind::Webhook {
                token_hash: hasher.hash_token(&token),
                signing_secret,
            };
            (org, workflow, kind, Some(token))
        }
        CreateTrigger::ApiKey {
            org,
            workflow,
            expires_in_days,
        } => {
            if expires_in_days.is_some_and(|d| d <= 0) {
                bail!("--expires-in-days must be positive");
            }
            let key = generate_credential("ofk_");
            let kind = TriggerKind::ApiKey {
                key_hash: hasher.hash_token(&key),
                key_prefix: key.chars().take(KEY_PREFIX_LEN).collect(),
                expires_at: expires_in_days.map(|d| Utc::now() + Duration::days(d)),
            };
            (org, workflow, kind, Some(key))
        }
        CreateTrigger::Event {
            org,
            workflow,
            event_type,
            filter,
        } => {
            if event_type.trim().is_empty() {
                bail!("--event-type must not be empty");
            }
            let event_filter = match filter {
                Some(raw) => match serde_json::from_str::<Value>(&raw) {
                    Ok(Value::Object(map)) => Some(map),
                    Ok(_) => bail!("--filter must be a JSON object"),
                    Err(e) => bail!("--filter is not valid JSON: {e}"),
                },
                None => None,
            };
            let kind = TriggerKind::Event {
                event_type,
                event_filter,
            };
            (org, workflow, kind, None)
        }
        CreateTrigger::Schedule {
            org,
            workflow,
            cron,
            timezone,
        } => {
            let cron_expression = validate_schedule(&cron, &timezone)?;
            let kind = TriggerKind::Schedule {
                cron_expression,
                timezone,
            };
            (org, workflow, kind, None)
        }
    };

    let record = TriggerRecord {
        id: Uuid::now_v7(),
        organization_id: org.clone(),
        workflow_root_id: workflow,
        kind,
        is_active: true,
        last_triggered_at: None,
        created_at: Utc::now(),
    };
    Ok((org, workflow, Created { record, credential }))
}

pub async fn create(state: &AppState, kind: CreateTrigger, json: bool) -> Result<()> {
    let (org, workflow, created) = build_trigger(kind)?;

    if state
        .store
        .get_active_definition(&org, &workflow)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to look up workflow: {e}"))?
        .is_none()
    {
        bail!("Workflow {workflow} has no active version in '{org}'");
    }

    state
        .store
        .save_trigger(&created.record)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to save trigger: {e}"))?;

    tracing::info!(
        organization_id = org.as_str(),
        trigger_id = %created.record.id,
        trigger_type = %created.record.kind.trigger_type(),
        "trigger created"
    );

    let endpoint = match &created.record.kind {
        TriggerKind::Webhook { .. } => created
            .credential
            .as_ref()
            .map(|token| format!("/api/v1/hooks/{token}")),
        TriggerKind::ApiKey { .. } => Some("/api/v1/trigger".to_string()),
        TriggerKind::Event { event_type, .. } => {
            Some(format!("/api/v1/orgs/{org}/events/{event_type}"))
        }
        TriggerKind::Schedule { .. } => None,
    };

    if json {
        let out = json!({
            "trigger": TriggerView::from(&created.record),
            "credential": created.credential,
            "endpoint": endpoint,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Created {} trigger {}",
        style("✓").green().bold(),
        style(created.record.kind.trigger_type()).cyan(),
        style(created.record.id).dim()
    );
    if let TriggerKind::Schedule { cron_expression, .. } = &created.record.kind {
        println!("  Cron:      {}", style(cron_expression).bold());
    }
    if let Some(endpoint) = endpoint {
        println!("  Endpoint:  {}", style(endpoint).bold());
    }
    if let Some(credential) = &created.credential {
        println!("  Secret:    {}", style(credential).yellow().bold());
        println!(
            "  {}",
            style("Store it now. Only its hash is kept and it cannot be shown again.").dim()
        );
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

pub async fn list(state: &AppState, org: &str, json: bool) -> Result<()> {
    let triggers = state
        .store
        .list_triggers(org)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list triggers: {e}"))?;

    if json {
        let views: Vec<TriggerView> = triggers.iter().map(TriggerView::from).collect();
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }

    if triggers.is_empty() {
        println!();
        println!("  No triggers for '{org}'.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Id").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Workflow"),
            Cell::new("Details"),
            Cell::new("Active"),
            Cell::new("Last Fired"),
        ]);

    for t in &triggers {
        let details = match &t.kind {
            TriggerKind::Schedule { cron_expression, .. } => cron_expression.clone(),
            TriggerKind::Webhook { signing_secret, .. } => {
                if signing_secret.is_some() { "signed" } else { "unsigned" }.to_string()
            }
            TriggerKind::ApiKey {
                key_prefix,
                expires_at,
                ..
            } => match expires_at {
                Some(at) => format!("{key_prefix}… expires {}", at.format("%Y-%m-%d")),
                None => format!("{key_prefix}…"),
            },
            TriggerKind::Event { event_type, .. } => event_type.clone(),
        };
        let active = if t.is_active {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::DarkGrey)
        };
        let last = t
            .last_triggered_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            Cell::new(short_id(&t.id)),
            Cell::new(t.kind.trigger_type()),
            Cell::new(short_id(&t.workflow_root_id)),
            Cell::new(details),
            active,
            Cell::new(last),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

fn log_status_cell(status: TriggerLogStatus) -> Cell {
    let color = match status {
        TriggerLogStatus::Accepted => Color::Green,
        TriggerLogStatus::Duplicate => Color::DarkGrey,
        TriggerLogStatus::RateLimited => Color::Yellow,
        TriggerLogStatus::Rejected => Color::Red,
    };
    Cell::new(status.as_str()).fg(color)
}

pub async fn logs(state: &AppState, org: &str, limit: u32, json: bool) -> Result<()> {
    let logs = state
        .store
        .list_logs(org, limit)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list trigger logs: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&logs)?);
        return Ok(());
    }

    if logs.is_empty() {
        println!();
        println!("  No trigger attempts recorded for '{org}'.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Time").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Status"),
            Cell::new("Key"),
            Cell::new("Execution"),
            Cell::new("Reason"),
        ]);

    for log in &logs {
        table.add_row(vec![
            Cell::new(log.created_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(log.trigger_type),
            log_status_cell(log.status),
            Cell::new(log.source_key.as_deref().or(log.idempotency_key.as_deref()).unwrap_or("-")),
            Cell::new(log.wf_execution_id.as_ref().map(short_id).unwrap_or_else(|| "-".into())),
            Cell::new(log.reason.as_deref().unwrap_or("")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}
