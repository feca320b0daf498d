//! Step dispatch for the six workflow step types.
//!
//! `StepRunner` narrows a step's raw config into its typed view and hands it
//! to the matching handler. Each handler returns a `StepOutput` carrying the
//! tagged outcome that selects the next edge. Loop steps re-enter the runner
//! for every step of their body sub-graph.
//!
//! Step types: start, trigger, llm, condition, action, loop.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use opsflow_types::approval::Approval;
use opsflow_types::execution::{ErrorKind, ExecutionError};
use opsflow_types::workflow::{
    ActionOutcome, ConditionOutcome, LlmStepConfig, LoopFailurePolicy, LoopOutcome,
    LoopStepConfig, StepConfig, StepConfigError, StepDefinition, StepOutcome, ERROR_OUTCOME,
};
use serde_json::{json, Map, Value};
use tokio::task::JoinSet;

use crate::llm::{LlmClient, LlmRequest};

use super::action::{ActionExecutor, ActionLimits, ActionRun, ApprovalRequest, ValidationError};
use super::context::ExecutionContext;
use super::definition::{DefinitionError, WorkflowGraph};
use super::expression::{ConditionEvaluator, ExpressionError};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Steps one loop iteration may execute before it is considered runaway.
pub const MAX_LOOP_BODY_STEPS: usize = 1_000;

// ---------------------------------------------------------------------------
// StepOutput
// ---------------------------------------------------------------------------

/// Result of a step that ran to completion.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub outcome: StepOutcome,
    /// Stored in the execution variables under the step slug.
    pub output: Value,
    /// Extra variables to merge (connector `variables`, already redacted).
    pub variables: Map<String, Value>,
    pub attempts: u32,
}

impl StepOutput {
    fn new(outcome: StepOutcome, output: Value) -> Self {
        Self {
            outcome,
            output,
            variables: Map::new(),
            attempts: 1,
        }
    }

    /// Output recorded when a failure is routed through an `error` edge.
    pub fn failed(error: &StepError) -> Self {
        Self {
            outcome: StepOutcome::Failed,
            output: json!({ "error": error.to_string() }),
            variables: Map::new(),
            attempts: error.attempts(),
        }
    }
}

/// What running one step produced.
#[derive(Debug, Clone, PartialEq)]
pub enum StepRun {
    Completed(StepOutput),
    /// A gated action is waiting for a reviewer. Nothing was invoked.
    AwaitingApproval(ApprovalRequest),
}

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Errors that can occur during step execution.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StepError {
    /// The graph or step config cannot run as authored.
    #[error("definition error: {0}")]
    Definition(String),

    /// Malformed condition expression.
    #[error(transparent)]
    Condition(#[from] ExpressionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("approval rejected for step '{step_slug}'")]
    ApprovalRejected { step_slug: String },

    /// Permanent failure or retries exhausted.
    #[error("step execution failed: {message}")]
    ExecutionFailed { message: String, attempts: u32 },

    #[error("execution cancelled")]
    Cancelled,
}

impl StepError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StepError::Definition(_) | StepError::Condition(_) => ErrorKind::Definition,
            StepError::Validation(_) => ErrorKind::Validation,
            StepError::ApprovalRejected { .. } => ErrorKind::ApprovalRejected,
            StepError::ExecutionFailed { .. } => ErrorKind::ExecutionFailed,
            StepError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether an explicit `error` edge may catch this failure.
    pub fn is_routable(&self) -> bool {
        matches!(self, StepError::ExecutionFailed { .. })
    }

    /// Connector invocations made before the failure.
    pub fn attempts(&self) -> u32 {
        match self {
            StepError::ExecutionFailed { attempts, .. } => *attempts,
            _ => 1,
        }
    }

    /// Kind and message recorded on a failed execution.
    pub fn to_execution_error(&self) -> ExecutionError {
        ExecutionError {
            kind: self.kind(),
            message: self.to_string(),
            details: match self {
                StepError::Validation(v) => Some(v.details()),
                _ => None,
            },
        }
    }
}

impl From<StepConfigError> for StepError {
    fn from(e: StepConfigError) -> Self {
        StepError::Definition(e.to_string())
    }
}

impl From<DefinitionError> for StepError {
    fn from(e: DefinitionError) -> Self {
        StepError::Definition(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Executes individual workflow steps by dispatching to type-specific handlers.
#[derive(Clone)]
pub struct StepRunner {
    evaluator: Arc<ConditionEvaluator>,
    actions: ActionExecutor,
    llm: Arc<dyn LlmClient>,
}

impl StepRunner {
    pub fn new(actions: ActionExecutor, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            evaluator: Arc::new(ConditionEvaluator::new()),
            actions,
            llm,
        }
    }

    pub fn actions(&self) -> &ActionExecutor {
        &self.actions
    }

    /// Run one step.
    ///
    /// `approval` is the existing approval for this execution and step; only
    /// action steps look at it.
    pub fn run<'a>(
        &'a self,
        graph: &'a Arc<WorkflowGraph>,
        step: &'a StepDefinition,
        ctx: &'a ExecutionContext,
        limits: ActionLimits,
        approval: Option<&'a Approval>,
    ) -> BoxFuture<'a, Result<StepRun, StepError>> {
        Box::pin(async move {
            if ctx.cancel.is_cancelled() {
                return Err(StepError::Cancelled);
            }
            let output = match step.typed_config()? {
                StepConfig::Start => StepOutput::new(StepOutcome::Success, json!({})),
                StepConfig::Trigger(cfg) => {
                    StepOutput::new(StepOutcome::Success, json!({ "type": cfg.trigger_type }))
                }
                StepConfig::Condition(cfg) => {
                    // Conditions see variables only.
                    let outcome = self.evaluator.evaluate(&cfg.expression, &ctx.scope)?;
                    StepOutput::new(
                        StepOutcome::Condition(outcome),
                        json!({ "result": outcome == ConditionOutcome::True }),
                    )
                }
                StepConfig::Llm(cfg) => self.run_llm(&cfg, ctx, limits).await?,
                StepConfig::Action(cfg) => {
                    match self
                        .actions
                        .execute(&step.step_slug, &cfg, ctx, limits, approval)
                        .await?
                    {
                        ActionRun::Completed(result) => StepOutput {
                            outcome: StepOutcome::Action(ActionOutcome::Success),
                            output: result.output,
                            variables: result.variables,
                            attempts: result.attempts,
                        },
                        ActionRun::AwaitingApproval(request) => {
                            return Ok(StepRun::AwaitingApproval(request));
                        }
                    }
                }
                StepConfig::Loop(cfg) => self.run_loop(graph, step, &cfg, ctx, limits).await?,
            };
            Ok(StepRun::Completed(output))
        })
    }

    async fn run_llm(
        &self,
        cfg: &LlmStepConfig,
        ctx: &ExecutionContext,
        limits: ActionLimits,
    ) -> Result<StepOutput, StepError> {
        let request = LlmRequest {
            organization_id: ctx.organization_id.clone(),
            execution_id: ctx.execution_id,
            thread_id: ctx.thread_id.clone(),
            prompt: ctx.scope.resolve_template(&cfg.prompt),
            model: cfg.model.clone(),
        };
        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(StepError::Cancelled),
            r = tokio::time::timeout(limits.timeout, self.llm.complete(&request)) => r,
        };
        match result {
            Ok(Ok(output)) => Ok(StepOutput::new(StepOutcome::Success, output)),
            Ok(Err(e)) => Err(StepError::ExecutionFailed {
                message: e.to_string(),
                attempts: 1,
            }),
            Err(_) => Err(StepError::ExecutionFailed {
                message: format!("llm step timed out after {}s", limits.timeout.as_secs()),
                attempts: 1,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Loop controller
    // -----------------------------------------------------------------------

    async fn run_loop(
        &self,
        graph: &Arc<WorkflowGraph>,
        step: &StepDefinition,
        cfg: &LoopStepConfig,
        ctx: &ExecutionContext,
        limits: ActionLimits,
    ) -> Result<StepOutput, StepError> {
        let items = match ctx.scope.get(&cfg.collection) {
            Some(Value::Array(items)) => items.clone(),
            other => {
                return Err(StepError::ExecutionFailed {
                    message: format!(
                        "loop collection '{}' is not an array (found {})",
                        cfg.collection,
                        other.map_or("nothing", json_type_name)
                    ),
                    attempts: 1,
                });
            }
        };

        let cap = cfg.max_iterations as usize;
        let capped = items.len() > cap;
        let count = items.len().min(cap);
        let parallelism = cfg.parallelism.max(1) as usize;
        let mut pending = items.into_iter().take(count).enumerate();
        let mut set = JoinSet::new();

        tracing::debug!(
            execution_id = %ctx.execution_id,
            step_slug = step.step_slug.as_str(),
            iterations = count,
            capped,
            parallelism,
            "starting loop"
        );

        // Iterations are spawned only while fewer than `parallelism` are
        // running, so a fail-fast error stops the rest from ever starting.
        let mut results = vec![Value::Null; count];
        let mut failed = 0usize;
        loop {
            while set.len() < parallelism {
                let Some((index, item)) = pending.next() else {
                    break;
                };
                if ctx.cancel.is_cancelled() {
                    set.abort_all();
                    return Err(StepError::Cancelled);
                }
                let scope = ctx.scope.with_bindings([
                    (cfg.item_variable.clone(), item),
                    (cfg.index_variable.clone(), json!(index)),
                ]);
                let iteration = self.clone().run_body(
                    Arc::clone(graph),
                    cfg.body.clone(),
                    ctx.with_scope(scope),
                    limits,
                );
                set.spawn(async move { (index, iteration.await) });
            }

            let Some(joined) = set.join_next().await else {
                break;
            };
            let (index, result) = joined.map_err(|e| StepError::ExecutionFailed {
                message: format!("loop iteration panicked: {e}"),
                attempts: 1,
            })?;
            match result {
                Ok(value) => results[index] = value,
                Err(e @ (StepError::ExecutionFailed { .. } | StepError::Validation(_)))
                    if cfg.failure_policy == LoopFailurePolicy::ContinueOnError =>
                {
                    tracing::warn!(
                        execution_id = %ctx.execution_id,
                        step_slug = step.step_slug.as_str(),
                        index,
                        error = %e,
                        "loop iteration failed, continuing"
                    );
                    failed += 1;
                    results[index] = json!({ "error": e.to_string(), "index": index });
                }
                Err(e) => {
                    set.abort_all();
                    tracing::debug!(
                        execution_id = %ctx.execution_id,
                        step_slug = step.step_slug.as_str(),
                        index,
                        "loop stopped at first failure"
                    );
                    return Err(e);
                }
            }
        }

        let mut output = json!({
            "iterations": count,
            "results": results,
        });
        if cfg.failure_policy == LoopFailurePolicy::ContinueOnError {
            output["failed"] = json!(failed);
        }
        let outcome = if capped {
            LoopOutcome::MaxIterationsReached
        } else {
            LoopOutcome::Completed
        };
        Ok(StepOutput::new(StepOutcome::Loop(outcome), output))
    }

    /// Run a loop body from `entry` until no edge resolves.
    ///
    /// Returns the output of the last executed body step.
    async fn run_body(
        self,
        graph: Arc<WorkflowGraph>,
        entry: String,
        mut ctx: ExecutionContext,
        limits: ActionLimits,
    ) -> Result<Value, StepError> {
        let mut current = Some(entry);
        let mut last = Value::Null;
        let mut executed = 0usize;

        while let Some(slug) = current.take() {
            executed += 1;
            if executed > MAX_LOOP_BODY_STEPS {
                return Err(StepError::Definition(format!(
                    "loop body exceeded {MAX_LOOP_BODY_STEPS} steps"
                )));
            }
            let step = graph.step(&slug)?;
            let output = match self.run(&graph, step, &ctx, limits, None).await {
                Ok(StepRun::Completed(output)) => output,
                Ok(StepRun::AwaitingApproval(_)) => {
                    return Err(StepError::Definition(format!(
                        "approval-gated action '{slug}' cannot run inside a loop body"
                    )));
                }
                Err(e) if e.is_routable() && step.next_steps.contains_key(ERROR_OUTCOME) => {
                    StepOutput::failed(&e)
                }
                Err(e) => return Err(e),
            };
            ctx.scope.set_step_output(&slug, output.output.clone());
            ctx.scope.merge(output.variables);
            last = output.output;
            current = step.next_for(output.outcome.label()).map(str::to_string);
        }
        Ok(last)
    }
}

impl std::fmt::Debug for StepRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRunner")
            .field("actions", &self.actions)
            .finish()
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
