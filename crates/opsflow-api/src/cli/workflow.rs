//! CLI workflow subcommands: validate, import and list.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;

use opsflow_core::connector::ConnectorRegistry;
use opsflow_core::event::EventBus;
use opsflow_core::repository::workflow::WorkflowRepository;
use opsflow_core::workflow::action::ActionExecutor;
use opsflow_core::workflow::definition::{
    discover_bundles, load_bundle_file, parse_bundle_yaml, WorkflowGraph,
};
use opsflow_types::workflow::{WorkflowDefinition, WorkflowStatus};

use super::short_id;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Publishing
// ---------------------------------------------------------------------------

/// Store a validated graph and make it the active version of its root.
///
/// The version is written as a draft first, then activated, so a previously
/// active version of the same root is demoted in the same transaction.
pub async fn publish_graph(
    state: &AppState,
    graph: &WorkflowGraph,
    activate: bool,
) -> Result<WorkflowDefinition> {
    let mut definition = graph.definition().clone();
    definition.status = WorkflowStatus::Draft;
    state
        .dispatcher
        .check_graph(graph)
        .map_err(|e| anyhow::anyhow!("Workflow '{}' cannot run: {e}", definition.name))?;

    state
        .store
        .save_definition(&definition)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to save workflow '{}': {e}", definition.name))?;
    state
        .store
        .save_steps(&definition.id, graph.steps())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to save steps of '{}': {e}", definition.name))?;

    if activate {
        state
            .store
            .set_definition_status(&definition.organization_id, &definition.id, WorkflowStatus::Active)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to activate '{}': {e}", definition.name))?;
        definition.status = WorkflowStatus::Active;
    }

    tracing::info!(
        organization_id = definition.organization_id.as_str(),
        wf_definition_id = %definition.id,
        root_id = %definition.root_id,
        status = %definition.status,
        "workflow published"
    );
    Ok(definition)
}

/// Parse, validate and publish a YAML bundle as the active version.
pub async fn publish_yaml(state: &AppState, yaml: &str) -> Result<WorkflowDefinition> {
    let (graph, _) = parse_bundle_yaml(yaml)?;
    publish_graph(state, &graph, true).await
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

/// Validate a bundle file and report warnings. Needs no database.
///
/// With connectors configured, loop bodies are also checked against their
/// operation schemas.
pub fn validate(file: &Path, connectors: ConnectorRegistry, json: bool) -> Result<()> {
    let (graph, report) =
        load_bundle_file(file).with_context(|| format!("Invalid workflow bundle: {}", file.display()))?;
    let definition = graph.definition();

    let checked = !connectors.list_names().is_empty();
    if checked {
        ActionExecutor::new(Arc::new(connectors), None, EventBus::default())
            .check_loop_bodies(&graph)
            .with_context(|| format!("Invalid workflow bundle: {}", file.display()))?;
    }

    if json {
        let out = serde_json::json!({
            "valid": true,
            "name": definition.name,
            "organizationId": definition.organization_id,
            "steps": graph.steps().len(),
            "entryStep": graph.entry_step().ok().map(|s| s.step_slug.clone()),
            "warnings": report.warnings,
            "connectorsChecked": checked,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Workflow '{}' is valid ({} steps)",
        style("✓").green().bold(),
        style(&definition.name).cyan(),
        graph.steps().len()
    );
    for warning in &report.warnings {
        println!("  {} {}", style("!").yellow().bold(), warning);
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

/// Publish one bundle file or every bundle under a directory.
pub async fn import(state: &AppState, path: &Path, draft: bool, json: bool) -> Result<()> {
    let graphs = if path.is_dir() {
        discover_bundles(path)
            .with_context(|| format!("Failed to scan {}", path.display()))?
            .into_iter()
            .map(|(_, graph)| graph)
            .collect::<Vec<_>>()
    } else {
        let (graph, report) = load_bundle_file(path)
            .with_context(|| format!("Invalid workflow bundle: {}", path.display()))?;
        for warning in &report.warnings {
            tracing::warn!(path = %path.display(), warning = warning.as_str(), "workflow bundle warning");
        }
        vec![graph]
    };

    if graphs.is_empty() {
        bail!("No workflow bundles found under {}", path.display());
    }

    let mut published = Vec::with_capacity(graphs.len());
    for graph in &graphs {
        published.push(publish_graph(state, graph, !draft).await?);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&published)?);
        return Ok(());
    }

    println!();
    for def in &published {
        println!(
            "  {} Published '{}' v{} ({}) root {}",
            style("✓").green().bold(),
            style(&def.name).cyan(),
            def.version,
            def.status,
            style(def.root_id).dim()
        );
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

pub async fn list(state: &AppState, org: &str, json: bool) -> Result<()> {
    let defs = state
        .store
        .list_definitions(org)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list workflows: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&defs)?);
        return Ok(());
    }

    if defs.is_empty() {
        println!();
        println!("  No workflows stored for '{org}'.");
        println!(
            "  Publish one with: {}",
            style("opsflow workflows import <file.yaml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Version"),
            Cell::new("Status"),
            Cell::new("Root"),
            Cell::new("Id"),
            Cell::new("Created"),
        ]);

    for d in &defs {
        let status = match d.status {
            WorkflowStatus::Active => Cell::new(d.status.as_str()).fg(Color::Green),
            WorkflowStatus::Draft => Cell::new(d.status.as_str()).fg(Color::Yellow),
            _ => Cell::new(d.status.as_str()).fg(Color::DarkGrey),
        };
        table.add_row(vec![
            Cell::new(&d.name),
            Cell::new(&d.version),
            status,
            Cell::new(d.root_id),
            Cell::new(short_id(&d.id)),
            Cell::new(d.created_at.format("%Y-%m-%d %H:%M")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::connector_registry;
    use crate::state::tests::{gated_crm_connector, test_state, test_state_with_connectors};
    use opsflow_types::config::EngineConfig;
    use uuid::Uuid;

    const LOOPED_REFUND: &str = r#"
name: bulk-refunds
organizationId: org-1
steps:
  - slug: start
    type: start
    next: { default: each }
  - slug: each
    type: loop
    config: { collection: orders, body: refund }
    next: { default: end }
  - slug: refund
    type: action
    config: { integration: crm, operation: refund, parameters: {} }
  - slug: end
    type: start
"#;

    fn bundle(root_id: Uuid, version: &str) -> String {
        format!(
            r#"
name: refunds
organizationId: org-1
version: "{version}"
rootId: {root_id}
steps:
  - slug: start
    type: start
"#
        )
    }

    #[tokio::test]
    async fn test_publish_activates_and_demotes_previous() {
        let state = test_state(None).await;
        let root = Uuid::now_v7();

        let v1 = publish_yaml(&state, &bundle(root, "1")).await.unwrap();
        let v2 = publish_yaml(&state, &bundle(root, "2")).await.unwrap();
        assert_eq!(v2.status, WorkflowStatus::Active);

        let active = state.store.get_active_definition("org-1", &root).await.unwrap().unwrap();
        assert_eq!(active.id, v2.id);
        let old = state.store.get_definition("org-1", &v1.id).await.unwrap().unwrap();
        assert_ne!(old.status, WorkflowStatus::Active);
        assert_eq!(state.store.get_steps(&v2.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_import_directory_as_drafts() {
        let state = test_state(None).await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), bundle(Uuid::now_v7(), "1")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a bundle").unwrap();

        import(&state, dir.path(), true, true).await.unwrap();
        let defs = state.store.list_definitions("org-1").await.unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].status, WorkflowStatus::Draft);
    }

    #[test]
    fn test_validate_rejects_dangling_edge() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.yaml");
        std::fs::write(
            &file,
            r#"
name: broken
organizationId: org-1
steps:
  - slug: start
    type: start
    next: { default: nowhere }
"#,
        )
        .unwrap();
        assert!(validate(&file, ConnectorRegistry::new(), true).is_err());
    }

    #[test]
    fn test_validate_rejects_gated_action_in_loop_body() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bulk.yaml");
        std::fs::write(&file, LOOPED_REFUND).unwrap();

        // Without connector schemas the bundle is structurally valid.
        validate(&file, ConnectorRegistry::new(), true).unwrap();

        let config = EngineConfig {
            connectors: vec![gated_crm_connector()],
            ..EngineConfig::default()
        };
        let err = validate(&file, connector_registry(&config).unwrap(), true).unwrap_err();
        assert!(format!("{err:#}").contains("approval-gated"));
    }

    #[tokio::test]
    async fn test_publish_rejects_gated_action_in_loop_body() {
        let state = test_state_with_connectors(None, vec![gated_crm_connector()]).await;
        let err = publish_yaml(&state, LOOPED_REFUND).await.unwrap_err();
        assert!(err.to_string().contains("cannot run"));
        assert!(state.store.list_definitions("org-1").await.unwrap().is_empty());
    }
}
