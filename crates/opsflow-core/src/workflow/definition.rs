//! Workflow graph construction, validation, and YAML bundles.
//!
//! `WorkflowGraph` pairs a definition with its steps indexed by slug and is
//! the unit the dispatcher caches and walks. Validation checks the structural
//! invariants every runnable graph must hold (known step types, typed
//! configs, outcome labels, no dangling edges). Static bundles let a graph be
//! authored as a single YAML file instead of rows in the store.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::Utc;
use opsflow_types::workflow::{
    StepConfig, StepConfigError, StepDefinition, StepType, WorkflowConfig, WorkflowDefinition,
    WorkflowStatus, DEFAULT_OUTCOME,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::graph;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// A graph that cannot be run as authored. Never retried.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// YAML parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("workflow has no steps")]
    Empty,

    #[error("duplicate step slug: '{0}'")]
    DuplicateSlug(String),

    #[error("unknown step: '{0}'")]
    UnknownStep(String),

    #[error(transparent)]
    StepConfig(#[from] StepConfigError),

    #[error("step '{step_slug}' maps unknown outcome '{label}' (valid for {step_type}: {valid})")]
    InvalidOutcome {
        step_slug: String,
        step_type: StepType,
        label: String,
        valid: String,
    },

    #[error("step '{step_slug}' has no default edge and does not map outcomes: {missing:?}")]
    IncompleteOutcomes {
        step_slug: String,
        missing: Vec<String>,
    },

    #[error("step '{step_slug}' edge '{label}' targets unknown step '{target}'")]
    DanglingTarget {
        step_slug: String,
        label: String,
        target: String,
    },

    #[error("loop step '{step_slug}' has invalid body '{body}'")]
    InvalidLoopBody { step_slug: String, body: String },

    /// A loop body reaches an action that would pause for review.
    #[error("loop step '{step_slug}' body reaches approval-gated action '{action}'")]
    GatedLoopBody { step_slug: String, action: String },

    /// An action names an integration or operation that is not registered.
    #[error("action step '{step_slug}': {message}")]
    UnknownAction { step_slug: String, message: String },

    #[error("no entry step")]
    NoEntryStep,

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// WorkflowGraph
// ---------------------------------------------------------------------------

/// A workflow version with its steps indexed by slug.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    definition: WorkflowDefinition,
    steps: Vec<StepDefinition>,
    index: HashMap<String, usize>,
}

/// Non-fatal findings from validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
}

impl WorkflowGraph {
    /// Index `steps` by slug. Steps are kept in `order` for display.
    pub fn new(
        definition: WorkflowDefinition,
        mut steps: Vec<StepDefinition>,
    ) -> Result<Self, DefinitionError> {
        steps.sort_by_key(|s| s.order);
        let mut index = HashMap::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            if index.insert(step.step_slug.clone(), i).is_some() {
                return Err(DefinitionError::DuplicateSlug(step.step_slug.clone()));
            }
        }
        Ok(Self {
            definition,
            steps,
            index,
        })
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    /// Steps ordered by their listing `order`.
    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn get(&self, step_slug: &str) -> Option<&StepDefinition> {
        self.index.get(step_slug).map(|&i| &self.steps[i])
    }

    /// Look up a step that must exist.
    pub fn step(&self, step_slug: &str) -> Result<&StepDefinition, DefinitionError> {
        self.get(step_slug)
            .ok_or_else(|| DefinitionError::UnknownStep(step_slug.to_string()))
    }

    /// Where a new execution starts.
    ///
    /// `config.entryStep` when set, else the lowest-order `start` step, else
    /// the lowest-order step.
    pub fn entry_step(&self) -> Result<&StepDefinition, DefinitionError> {
        if let Some(slug) = &self.definition.config.entry_step {
            return self.step(slug);
        }
        self.steps
            .iter()
            .find(|s| s.step_type == StepType::Start.as_str())
            .or_else(|| self.steps.first())
            .ok_or(DefinitionError::NoEntryStep)
    }

    /// Check every structural invariant. Returns warnings for findings that
    /// do not prevent execution (unreachable steps, cycles).
    pub fn validate(&self) -> Result<ValidationReport, DefinitionError> {
        if self.steps.is_empty() {
            return Err(DefinitionError::Empty);
        }
        let entry = self.entry_step()?;

        for step in &self.steps {
            let kind = step.kind()?;
            let config = step.typed_config()?;
            self.validate_edges(step, kind)?;

            if let StepConfig::Loop(cfg) = &config {
                if cfg.body == step.step_slug || self.get(&cfg.body).is_none() {
                    return Err(DefinitionError::InvalidLoopBody {
                        step_slug: step.step_slug.clone(),
                        body: cfg.body.clone(),
                    });
                }
            }
        }

        let mut report = ValidationReport::default();
        for slug in graph::unreachable_steps(self, &entry.step_slug) {
            report
                .warnings
                .push(format!("step '{slug}' is unreachable from '{}'", entry.step_slug));
        }
        if graph::has_cycle(self) {
            report
                .warnings
                .push("graph contains a cycle; executions may not terminate".to_string());
        }
        Ok(report)
    }

    fn validate_edges(&self, step: &StepDefinition, kind: StepType) -> Result<(), DefinitionError> {
        let labels = kind.outcome_labels();
        for (label, target) in &step.next_steps {
            if label != DEFAULT_OUTCOME && !labels.contains(&label.as_str()) {
                return Err(DefinitionError::InvalidOutcome {
                    step_slug: step.step_slug.clone(),
                    step_type: kind,
                    label: label.clone(),
                    valid: labels.join(", "),
                });
            }
            if self.get(target).is_none() {
                return Err(DefinitionError::DanglingTarget {
                    step_slug: step.step_slug.clone(),
                    label: label.clone(),
                    target: target.clone(),
                });
            }
        }

        if step.is_terminal() || step.next_steps.contains_key(DEFAULT_OUTCOME) {
            return Ok(());
        }
        let missing: Vec<String> = kind
            .exhaustive_labels()
            .iter()
            .filter(|l| !step.next_steps.contains_key(**l))
            .map(|l| l.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DefinitionError::IncompleteOutcomes {
                step_slug: step.step_slug.clone(),
                missing,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Static YAML bundles
// ---------------------------------------------------------------------------

/// A workflow authored as one YAML document.
///
/// ```yaml
/// name: refund-review
/// organizationId: org-1
/// steps:
///   - slug: start
///     type: start
///     next: { default: check }
///   - slug: check
///     type: condition
///     config: { expression: "amount > 100" }
///     next: { "true": refund, "false": end }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowBundle {
    pub name: String,
    pub organization_id: String,
    #[serde(default = "default_bundle_version")]
    pub version: String,
    /// Stable root id. A fresh one is generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_id: Option<Uuid>,
    #[serde(default)]
    pub workflow_type: String,
    #[serde(default)]
    pub config: WorkflowConfig,
    pub steps: Vec<BundleStep>,
}

/// One step inside a `WorkflowBundle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleStep {
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub next: BTreeMap<String, String>,
}

fn default_bundle_version() -> String {
    "1".to_string()
}

impl WorkflowBundle {
    /// Materialize the bundle as an active workflow version.
    ///
    /// Step order follows the order of the YAML list.
    pub fn into_graph(self) -> Result<WorkflowGraph, DefinitionError> {
        let id = Uuid::now_v7();
        let definition = WorkflowDefinition {
            id,
            root_id: self.root_id.unwrap_or(id),
            organization_id: self.organization_id,
            name: self.name,
            version: self.version,
            status: WorkflowStatus::Active,
            workflow_type: self.workflow_type,
            config: self.config,
            metadata: Value::Null,
            created_at: Utc::now(),
        };
        let steps = self
            .steps
            .into_iter()
            .enumerate()
            .map(|(i, s)| StepDefinition {
                id: Uuid::now_v7(),
                wf_definition_id: id,
                name: s.name.unwrap_or_else(|| s.slug.clone()),
                step_slug: s.slug,
                step_type: s.step_type,
                order: i32::try_from(i).unwrap_or(i32::MAX),
                config: s.config,
                next_steps: s.next,
            })
            .collect();
        WorkflowGraph::new(definition, steps)
    }
}

/// Parse a YAML bundle into a graph and validate it.
pub fn parse_bundle_yaml(yaml: &str) -> Result<(WorkflowGraph, ValidationReport), DefinitionError> {
    let bundle: WorkflowBundle =
        serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    let graph = bundle.into_graph()?;
    let report = graph.validate()?;
    Ok((graph, report))
}

/// Load a bundle from a YAML file.
pub fn load_bundle_file(path: &Path) -> Result<(WorkflowGraph, ValidationReport), DefinitionError> {
    let content = std::fs::read_to_string(path)?;
    parse_bundle_yaml(&content)
}

/// Discover all bundle files (`.yaml`/`.yml`) under `base_dir`.
///
/// Files that fail to load are skipped with a warning.
pub fn discover_bundles(base_dir: &Path) -> Result<Vec<(PathBuf, WorkflowGraph)>, DefinitionError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, WorkflowGraph)>,
) -> Result<(), DefinitionError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml")
        {
            match load_bundle_file(&path) {
                Ok((graph, _)) => results.push((path, graph)),
                Err(e) => tracing::warn!(?path, error = %e, "skipping invalid workflow bundle"),
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn step(slug: &str, step_type: &str, config: Value, next: &[(&str, &str)]) -> StepDefinition {
        StepDefinition {
            id: Uuid::now_v7(),
            wf_definition_id: Uuid::nil(),
            step_slug: slug.to_string(),
            name: slug.to_string(),
            step_type: step_type.to_string(),
            order: 0,
            config,
            next_steps: next
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub(crate) fn definition(org: &str) -> WorkflowDefinition {
        let id = Uuid::now_v7();
        WorkflowDefinition {
            id,
            root_id: id,
            organization_id: org.to_string(),
            name: "wf".to_string(),
            version: "1".to_string(),
            status: WorkflowStatus::Active,
            workflow_type: String::new(),
            config: WorkflowConfig::default(),
            metadata: Value::Null,
            created_at: Utc::now(),
        }
    }

    pub(crate) fn graph(steps: Vec<StepDefinition>) -> WorkflowGraph {
        let mut steps = steps;
        for (i, s) in steps.iter_mut().enumerate() {
            s.order = i as i32;
        }
        WorkflowGraph::new(definition("org-1"), steps).unwrap()
    }

    #[test]
    fn test_valid_branching_graph() {
        let g = graph(vec![
            step("start", "start", Value::Null, &[("default", "check")]),
            step(
                "check",
                "condition",
                json!({ "expression": "amount > 100" }),
                &[("true", "refund"), ("false", "end")],
            ),
            step(
                "refund",
                "action",
                json!({ "integration": "shop", "operation": "refund" }),
                &[],
            ),
            step("end", "start", Value::Null, &[]),
        ]);
        let report = g.validate().unwrap();
        assert!(report.warnings.is_empty());
        assert_eq!(g.entry_step().unwrap().step_slug, "start");
    }

    #[test]
    fn test_duplicate_slug_rejected() {
        let def = definition("org-1");
        let err = WorkflowGraph::new(
            def,
            vec![
                step("a", "start", Value::Null, &[]),
                step("a", "start", Value::Null, &[]),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateSlug(s) if s == "a"));
    }

    #[test]
    fn test_dangling_target_rejected() {
        let g = graph(vec![step("start", "start", Value::Null, &[("default", "ghost")])]);
        assert!(matches!(
            g.validate(),
            Err(DefinitionError::DanglingTarget { target, .. }) if target == "ghost"
        ));
    }

    #[test]
    fn test_unknown_step_type_rejected() {
        let g = graph(vec![step("x", "teleport", Value::Null, &[])]);
        assert!(matches!(
            g.validate(),
            Err(DefinitionError::StepConfig(StepConfigError::UnknownStepType(_)))
        ));
    }

    #[test]
    fn test_condition_requires_both_branches_without_default() {
        let g = graph(vec![
            step("check", "condition", json!({ "expression": "true" }), &[("true", "end")]),
            step("end", "start", Value::Null, &[]),
        ]);
        match g.validate() {
            Err(DefinitionError::IncompleteOutcomes { missing, .. }) => {
                assert_eq!(missing, vec!["false".to_string()]);
            }
            other => panic!("expected incomplete outcomes, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_outcome_label_rejected() {
        let g = graph(vec![
            step("check", "condition", json!({ "expression": "true" }), &[("maybe", "end"), ("default", "end")]),
            step("end", "start", Value::Null, &[]),
        ]);
        assert!(matches!(g.validate(), Err(DefinitionError::InvalidOutcome { label, .. }) if label == "maybe"));
    }

    #[test]
    fn test_loop_body_must_exist() {
        let g = graph(vec![step(
            "each",
            "loop",
            json!({ "collection": "orders", "body": "missing" }),
            &[],
        )]);
        assert!(matches!(g.validate(), Err(DefinitionError::InvalidLoopBody { .. })));
    }

    #[test]
    fn test_unreachable_step_is_warning() {
        let g = graph(vec![
            step("start", "start", Value::Null, &[]),
            step("orphan", "start", Value::Null, &[]),
        ]);
        let report = g.validate().unwrap();
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("orphan"));
    }

    #[test]
    fn test_entry_step_prefers_config() {
        let mut def = definition("org-1");
        def.config.entry_step = Some("b".to_string());
        let g = WorkflowGraph::new(
            def,
            vec![
                step("a", "start", Value::Null, &[]),
                step("b", "start", Value::Null, &[]),
            ],
        )
        .unwrap();
        assert_eq!(g.entry_step().unwrap().step_slug, "b");
    }

    #[test]
    fn test_parse_bundle_yaml() {
        let yaml = r#"
name: refund-review
organizationId: org-1
steps:
  - slug: start
    type: start
    next: { default: check }
  - slug: check
    type: condition
    config: { expression: "amount > 100" }
    next: { "true": refund, "false": end }
  - slug: refund
    type: action
    config: { integration: shop, operation: refund, parameters: { orderId: "{{ orderId }}" } }
  - slug: end
    type: start
"#;
        let (g, report) = parse_bundle_yaml(yaml).unwrap();
        assert!(report.warnings.is_empty());
        assert_eq!(g.steps().len(), 4);
        assert_eq!(g.definition().status, WorkflowStatus::Active);
        assert_eq!(g.definition().root_id, g.definition().id);
        assert_eq!(g.get("check").unwrap().next_for("false"), Some("end"));
    }

    #[test]
    fn test_parse_bundle_yaml_invalid() {
        assert!(matches!(
            parse_bundle_yaml("not: [valid"),
            Err(DefinitionError::Parse(_))
        ));
    }

    #[test]
    fn test_discover_bundles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.yaml"),
            "name: a\norganizationId: org-1\nsteps:\n  - slug: start\n    type: start\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.yml"), "steps: 3").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore").unwrap();

        let found = discover_bundles(dir.path()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1.definition().name, "a");
    }

    #[test]
    fn test_discover_nonexistent_dir() {
        let found = discover_bundles(Path::new("/nonexistent/opsflow/bundles")).unwrap();
        assert!(found.is_empty());
    }
}
