//! Read-only access to a workflow graph, wherever it lives.
//!
//! The dispatcher loads graphs through `WorkflowDataSource`. The database
//! source reads rows through `WorkflowRepository`; the static source serves
//! an in-memory graph, typically parsed from a YAML bundle.

use std::path::Path;
use std::sync::Arc;

use opsflow_types::error::RepositoryError;
use opsflow_types::workflow::{StepDefinition, WorkflowDefinition};
use uuid::Uuid;

use crate::repository::workflow::WorkflowRepository;

use super::definition::{load_bundle_file, parse_bundle_yaml, DefinitionError, WorkflowGraph};

#[derive(Debug, thiserror::Error)]
pub enum DataSourceError {
    #[error("workflow definition not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

/// Accessor for one workflow version's definition and steps.
///
/// Implementations are side-effect free.
pub trait WorkflowDataSource: Send + Sync {
    /// `NotFound` if the definition no longer resolves.
    fn get_workflow_definition(
        &self,
    ) -> impl std::future::Future<Output = Result<WorkflowDefinition, DataSourceError>> + Send;

    /// Ordered by `order` (display only; execution follows edges).
    fn get_step_definitions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<StepDefinition>, DataSourceError>> + Send;

    fn get_organization_id(&self) -> &str;

    /// Where the graph came from, for logs and errors.
    fn get_source_identifier(&self) -> String;
}

/// Load and index a graph from any data source.
pub async fn load_graph<D: WorkflowDataSource>(source: &D) -> Result<WorkflowGraph, DataSourceError> {
    let definition = source.get_workflow_definition().await?;
    let steps = source.get_step_definitions().await?;
    Ok(WorkflowGraph::new(definition, steps)?)
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// Reads a stored workflow version through the repository.
pub struct DatabaseWorkflowDataSource<R: WorkflowRepository> {
    repo: Arc<R>,
    organization_id: String,
    definition_id: Uuid,
}

impl<R: WorkflowRepository> DatabaseWorkflowDataSource<R> {
    pub fn new(repo: Arc<R>, organization_id: impl Into<String>, definition_id: Uuid) -> Self {
        Self {
            repo,
            organization_id: organization_id.into(),
            definition_id,
        }
    }
}

impl<R: WorkflowRepository> WorkflowDataSource for DatabaseWorkflowDataSource<R> {
    async fn get_workflow_definition(&self) -> Result<WorkflowDefinition, DataSourceError> {
        self.repo
            .get_definition(&self.organization_id, &self.definition_id)
            .await?
            .ok_or(DataSourceError::NotFound(self.definition_id))
    }

    async fn get_step_definitions(&self) -> Result<Vec<StepDefinition>, DataSourceError> {
        let mut steps = self.repo.get_steps(&self.definition_id).await?;
        steps.sort_by_key(|s| s.order);
        Ok(steps)
    }

    fn get_organization_id(&self) -> &str {
        &self.organization_id
    }

    fn get_source_identifier(&self) -> String {
        format!("database:{}", self.definition_id)
    }
}

// ---------------------------------------------------------------------------
// Static
// ---------------------------------------------------------------------------

/// Serves a graph held in memory.
#[derive(Debug, Clone)]
pub struct StaticWorkflowDataSource {
    graph: Arc<WorkflowGraph>,
    source: String,
}

impl StaticWorkflowDataSource {
    pub fn new(graph: WorkflowGraph, source: impl Into<String>) -> Self {
        Self {
            graph: Arc::new(graph),
            source: source.into(),
        }
    }

    /// Parse and validate a YAML bundle.
    pub fn from_yaml(yaml: &str, source: impl Into<String>) -> Result<Self, DefinitionError> {
        let (graph, report) = parse_bundle_yaml(yaml)?;
        let source = source.into();
        for warning in &report.warnings {
            tracing::warn!(source = source.as_str(), warning = warning.as_str(), "workflow bundle warning");
        }
        Ok(Self::new(graph, source))
    }

    pub fn from_file(path: &Path) -> Result<Self, DefinitionError> {
        let (graph, _) = load_bundle_file(path)?;
        Ok(Self::new(graph, format!("file:{}", path.display())))
    }

    pub fn graph(&self) -> &Arc<WorkflowGraph> {
        &self.graph
    }
}

impl WorkflowDataSource for StaticWorkflowDataSource {
    async fn get_workflow_definition(&self) -> Result<WorkflowDefinition, DataSourceError> {
        Ok(self.graph.definition().clone())
    }

    async fn get_step_definitions(&self) -> Result<Vec<StepDefinition>, DataSourceError> {
        Ok(self.graph.steps().to_vec())
    }

    fn get_organization_id(&self) -> &str {
        &self.graph.definition().organization_id
    }

    fn get_source_identifier(&self) -> String {
        self.source.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryStore;
    use crate::workflow::definition::tests::{definition, step};
    use serde_json::Value;

    const BUNDLE: &str = r#"
name: nightly
organizationId: org-7
steps:
  - slug: b
    type: start
  - slug: a
    type: start
    next: { default: b }
"#;

    #[tokio::test]
    async fn test_database_source_orders_steps() {
        let store = Arc::new(InMemoryStore::new());
        let def = definition("org-1");
        let mut late = step("late", "start", Value::Null, &[]);
        late.order = 5;
        late.wf_definition_id = def.id;
        let mut early = step("early", "start", Value::Null, &[]);
        early.order = 1;
        early.wf_definition_id = def.id;
        store.save_definition(&def).await.unwrap();
        store.save_steps(&def.id, &[late, early]).await.unwrap();

        let source = DatabaseWorkflowDataSource::new(Arc::clone(&store), "org-1", def.id);
        let steps = source.get_step_definitions().await.unwrap();
        assert_eq!(steps[0].step_slug, "early");
        assert_eq!(source.get_organization_id(), "org-1");
        assert!(source.get_source_identifier().starts_with("database:"));

        let graph = load_graph(&source).await.unwrap();
        assert_eq!(graph.entry_step().unwrap().step_slug, "early");
    }

    #[tokio::test]
    async fn test_database_source_not_found_for_other_org() {
        let store = Arc::new(InMemoryStore::new());
        let def = definition("org-1");
        store.save_definition(&def).await.unwrap();

        let source = DatabaseWorkflowDataSource::new(store, "org-2", def.id);
        assert!(matches!(
            source.get_workflow_definition().await,
            Err(DataSourceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_static_source_from_yaml() {
        let source = StaticWorkflowDataSource::from_yaml(BUNDLE, "inline").unwrap();
        assert_eq!(source.get_organization_id(), "org-7");
        assert_eq!(source.get_source_identifier(), "inline");
        let steps = source.get_step_definitions().await.unwrap();
        assert_eq!(steps.len(), 2);
        let graph = load_graph(&source).await.unwrap();
        assert_eq!(graph.get("a").unwrap().next_for("success"), Some("b"));
    }
}
