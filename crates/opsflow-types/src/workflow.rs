//! Workflow definition types for Opsflow.
//!
//! A workflow is an organization-scoped graph root (`WorkflowDefinition`)
//! plus its nodes (`StepDefinition`). Steps are linked by `next_steps`, a
//! mapping from outcome label to target step slug. Step configuration is
//! stored raw and narrowed to a typed `StepConfig` per step type at dispatch
//! and validation time.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// One version of an organization's workflow graph.
///
/// Every version of the same workflow shares a `root_id`. Triggers reference
/// the root, and resolve to whichever version is `Active` at fire time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// UUIDv7 of this version.
    pub id: Uuid,
    /// Stable identifier shared by all versions (`workflowRootId`).
    pub root_id: Uuid,
    /// Owning organization.
    pub organization_id: String,
    /// Human-readable workflow name.
    pub name: String,
    /// Version string, monotonic per edit.
    pub version: String,
    /// Lifecycle status.
    pub status: WorkflowStatus,
    /// Free-form classification (e.g. "automation", "sync").
    #[serde(default)]
    pub workflow_type: String,
    /// Execution configuration.
    #[serde(default)]
    pub config: WorkflowConfig,
    /// Arbitrary metadata for UI/audit.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
    /// When this version was created.
    pub created_at: DateTime<Utc>,
}

/// Lifecycle status of a workflow version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Inactive,
    Archived,
}

impl WorkflowStatus {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Draft => "draft",
            WorkflowStatus::Active => "active",
            WorkflowStatus::Inactive => "inactive",
            WorkflowStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(WorkflowStatus::Draft),
            "active" => Ok(WorkflowStatus::Active),
            "inactive" => Ok(WorkflowStatus::Inactive),
            "archived" => Ok(WorkflowStatus::Archived),
            other => Err(format!("invalid workflow status: '{other}'")),
        }
    }
}

/// Per-workflow execution configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowConfig {
    /// Per-step invocation timeout in seconds (engine default when unset).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Retry policy for transient connector failures.
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// Seed variables copied into every new execution.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
    /// Explicit entry step slug. Defaults to the lowest-order `start` step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_step: Option<String>,
}

/// Retry policy for transient external failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = no retry).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff in milliseconds, doubled on each retry.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Step Definition
// ---------------------------------------------------------------------------

/// A single node in a workflow graph.
///
/// `step_type` and `config` are kept as authored; `typed_config` narrows them
/// into a `StepConfig`. An unrecognized `step_type` is a definition error,
/// never silently skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    pub id: Uuid,
    /// The workflow version this step belongs to.
    pub wf_definition_id: Uuid,
    /// Unique within a definition.
    pub step_slug: String,
    pub name: String,
    /// Declared step type, as authored.
    pub step_type: String,
    /// Listing order only. Execution order follows `next_steps`.
    #[serde(default)]
    pub order: i32,
    /// Type-specific configuration payload.
    #[serde(default)]
    pub config: Value,
    /// Outcome label -> target step slug.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub next_steps: BTreeMap<String, String>,
}

impl StepDefinition {
    /// Parse the declared step type.
    pub fn kind(&self) -> Result<StepType, StepConfigError> {
        self.step_type
            .parse()
            .map_err(|_| StepConfigError::UnknownStepType(self.step_type.clone()))
    }

    /// Narrow the raw config into the typed view for this step's type.
    ///
    /// `trigger` steps always receive a synthetic manual config: by the time
    /// the dispatcher reaches one, it has already decided to fire.
    pub fn typed_config(&self) -> Result<StepConfig, StepConfigError> {
        let kind = self.kind()?;
        let invalid = |e: serde_json::Error| StepConfigError::InvalidConfig {
            step_slug: self.step_slug.clone(),
            message: e.to_string(),
        };
        let raw = if self.config.is_null() {
            Value::Object(Map::new())
        } else {
            self.config.clone()
        };

        Ok(match kind {
            StepType::Start => StepConfig::Start,
            StepType::Trigger => StepConfig::Trigger(TriggerStepConfig::manual()),
            StepType::Llm => StepConfig::Llm(serde_json::from_value(raw).map_err(invalid)?),
            StepType::Condition => {
                StepConfig::Condition(serde_json::from_value(raw).map_err(invalid)?)
            }
            StepType::Action => StepConfig::Action(serde_json::from_value(raw).map_err(invalid)?),
            StepType::Loop => StepConfig::Loop(serde_json::from_value(raw).map_err(invalid)?),
        })
    }

    /// Whether this step has no outgoing edges.
    pub fn is_terminal(&self) -> bool {
        self.next_steps.is_empty()
    }

    /// Resolve the target for an outcome label, falling back to `default`.
    pub fn next_for(&self, label: &str) -> Option<&str> {
        self.next_steps
            .get(label)
            .or_else(|| self.next_steps.get(DEFAULT_OUTCOME))
            .map(String::as_str)
    }
}

/// Errors narrowing a step definition into its typed config.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepConfigError {
    #[error("unknown step type: '{0}'")]
    UnknownStepType(String),

    #[error("invalid config for step '{step_slug}': {message}")]
    InvalidConfig { step_slug: String, message: String },
}

/// The closed set of step kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Start,
    Trigger,
    Llm,
    Condition,
    Action,
    Loop,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Start => "start",
            StepType::Trigger => "trigger",
            StepType::Llm => "llm",
            StepType::Condition => "condition",
            StepType::Action => "action",
            StepType::Loop => "loop",
        }
    }

    /// Outcome labels this step kind can produce (excluding `default`).
    pub fn outcome_labels(&self) -> &'static [&'static str] {
        match self {
            StepType::Start | StepType::Trigger | StepType::Llm => &["success", "error"],
            StepType::Condition => &["true", "false"],
            StepType::Action => &["success", "error"],
            StepType::Loop => &["completed", "max_iterations_reached", "error"],
        }
    }

    /// Labels that must all be mapped when no `default` edge exists.
    pub fn exhaustive_labels(&self) -> &'static [&'static str] {
        match self {
            StepType::Start | StepType::Trigger | StepType::Llm | StepType::Action => &["success"],
            StepType::Condition => &["true", "false"],
            StepType::Loop => &["completed", "max_iterations_reached"],
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(StepType::Start),
            "trigger" => Ok(StepType::Trigger),
            "llm" => Ok(StepType::Llm),
            "condition" => Ok(StepType::Condition),
            "action" => Ok(StepType::Action),
            "loop" => Ok(StepType::Loop),
            other => Err(format!("unknown step type: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Typed step configs
// ---------------------------------------------------------------------------

/// Typed per-kind step configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum StepConfig {
    Start,
    Trigger(TriggerStepConfig),
    Llm(LlmStepConfig),
    Condition(ConditionStepConfig),
    Action(ActionStepConfig),
    Loop(LoopStepConfig),
}

/// Config seen by `trigger` steps. Always synthetic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerStepConfig {
    #[serde(rename = "type")]
    pub trigger_type: String,
}

impl TriggerStepConfig {
    pub fn manual() -> Self {
        Self {
            trigger_type: "manual".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmStepConfig {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionStepConfig {
    /// JEXL boolean expression evaluated against execution variables.
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionStepConfig {
    /// Integration (connector) name.
    pub integration: String,
    /// Operation name within the integration.
    pub operation: String,
    /// Parameters; string values of the form `{{ path }}` resolve from variables.
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Overrides the operation's approval requirement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_approval: Option<bool>,
    /// Resource descriptor copied onto the approval record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

/// Loop step configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopStepConfig {
    /// Variable path resolving to the collection to iterate.
    pub collection: String,
    /// Entry slug of the loop-body sub-graph.
    pub body: String,
    #[serde(default = "default_item_variable")]
    pub item_variable: String,
    #[serde(default = "default_index_variable")]
    pub index_variable: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
    #[serde(default)]
    pub failure_policy: LoopFailurePolicy,
}

fn default_item_variable() -> String {
    "item".to_string()
}

fn default_index_variable() -> String {
    "index".to_string()
}

fn default_max_iterations() -> u32 {
    100
}

fn default_parallelism() -> u32 {
    1
}

/// What a failing iteration does to the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopFailurePolicy {
    /// One failing iteration fails the loop step.
    #[default]
    FailFast,
    /// Failed iterations are recorded and the loop continues.
    ContinueOnError,
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// The label used when no specific outcome edge matches.
pub const DEFAULT_OUTCOME: &str = "default";

/// Label for the failure edge.
pub const ERROR_OUTCOME: &str = "error";

/// Outcome of a condition step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOutcome {
    True,
    False,
}

impl From<bool> for ConditionOutcome {
    fn from(b: bool) -> Self {
        if b {
            ConditionOutcome::True
        } else {
            ConditionOutcome::False
        }
    }
}

/// Outcome of an action step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Success,
    Error,
}

/// Outcome of a loop step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    Completed,
    MaxIterationsReached,
}

/// Labeled result of a step, used to pick the next edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Plain pass-through steps (start, trigger, llm).
    Success,
    Condition(ConditionOutcome),
    Action(ActionOutcome),
    Loop(LoopOutcome),
    /// A routed failure (only when an explicit `error` edge exists).
    Failed,
}

impl StepOutcome {
    /// The `next_steps` key this outcome selects.
    pub fn label(&self) -> &'static str {
        match self {
            StepOutcome::Success => "success",
            StepOutcome::Condition(ConditionOutcome::True) => "true",
            StepOutcome::Condition(ConditionOutcome::False) => "false",
            StepOutcome::Action(ActionOutcome::Success) => "success",
            StepOutcome::Action(ActionOutcome::Error) => ERROR_OUTCOME,
            StepOutcome::Loop(LoopOutcome::Completed) => "completed",
            StepOutcome::Loop(LoopOutcome::MaxIterationsReached) => "max_iterations_reached",
            StepOutcome::Failed => ERROR_OUTCOME,
        }
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
