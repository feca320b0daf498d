//! Action step execution: parameter validation, approval gating, secret
//! handling, retries, and output sanitization around a connector call.
//!
//! The executor never touches the store. When an approval is required it
//! returns `ActionRun::AwaitingApproval` and leaves persisting the
//! `Approval` and pausing the execution to the dispatcher.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opsflow_types::approval::{Approval, ApprovalStatus};
use opsflow_types::connector::{ConnectorResponse, OperationSchema, OperationType};
use opsflow_types::error::CipherError;
use opsflow_types::event::ExecutionEvent;
use opsflow_types::secure::{contains_secure, redact_secure, SecureValue};
use opsflow_types::workflow::{ActionStepConfig, RetryPolicy, StepConfig};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::connector::{ConnectorError, ConnectorRegistry, ConnectorRequest};
use crate::event::EventBus;
use crate::service::cipher::SecretCipher;

use super::context::ExecutionContext;
use super::definition::{DefinitionError, WorkflowGraph};
use super::graph::reachable_from;
use super::retry::RetryHandler;
use super::step_runner::StepError;

/// Reserved key in connector output carrying variables for the execution.
pub const VARIABLES_KEY: &str = "variables";

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// One parameter an operation accepts, as reported back to the author.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    pub required: bool,
}

/// Every missing required parameter of an action, reported at once.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub integration: String,
    pub operation: String,
    pub missing: Vec<String>,
    pub expected: Vec<ExpectedParameter>,
}

impl ValidationError {
    /// `name (type, required): description` for every expected parameter.
    pub fn summary(&self) -> String {
        self.expected
            .iter()
            .map(|p| {
                let req = if p.required { ", required" } else { "" };
                if p.description.is_empty() {
                    format!("{} ({}{req})", p.name, p.param_type)
                } else {
                    format!("{} ({}{req}): {}", p.name, p.param_type, p.description)
                }
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Structured detail persisted on the failed execution.
    pub fn details(&self) -> Value {
        json!({
            "missing": self.missing,
            "expected": self.expected,
        })
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "missing required parameters for {}.{}: {}. Expected: {}",
            self.integration,
            self.operation,
            self.missing.join(", "),
            self.summary()
        )
    }
}

impl std::error::Error for ValidationError {}

/// Check that every required parameter is present and non-empty.
///
/// `null` and `""` count as missing.
pub fn validate_parameters(
    integration: &str,
    schema: &OperationSchema,
    parameters: &Map<String, Value>,
) -> Result<(), ValidationError> {
    let missing: Vec<String> = schema
        .parameters
        .required_names()
        .into_iter()
        .filter(|name| match parameters.get(name) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        })
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    let mut names: Vec<&String> = schema.parameters.properties.keys().collect();
    for name in &schema.parameters.required {
        if !schema.parameters.properties.contains_key(name) {
            names.push(name);
        }
    }
    let expected = names
        .into_iter()
        .map(|name| {
            let property = schema.parameters.properties.get(name).cloned().unwrap_or_default();
            ExpectedParameter {
                name: name.clone(),
                param_type: if property.param_type.is_empty() {
                    "string".to_string()
                } else {
                    property.param_type
                },
                description: property.description,
                required: schema.parameters.is_required(name),
            }
        })
        .collect();

    Err(ValidationError {
        integration: integration.to_string(),
        operation: schema.name.clone(),
        missing,
        expected,
    })
}

/// Step override, then the operation's flag, then write-gated / read-open.
pub fn requires_approval(config: &ActionStepConfig, schema: &OperationSchema) -> bool {
    config
        .requires_approval
        .or(schema.requires_approval)
        .unwrap_or(schema.operation_type == OperationType::Write)
}

// ---------------------------------------------------------------------------
// Sanitization
// ---------------------------------------------------------------------------

/// Strip the reserved `variables` key from a step output and redact secrets.
///
/// Returns the public output and the (redacted) variables to merge. An
/// output without the key passes through unchanged apart from redaction.
pub fn sanitize_output(output: Value) -> (Value, Map<String, Value>) {
    match output {
        Value::Object(mut map) => {
            let variables = match map.remove(VARIABLES_KEY) {
                Some(Value::Object(vars)) => vars
                    .into_iter()
                    .map(|(k, v)| (k, redact_secure(&v)))
                    .collect(),
                _ => Map::new(),
            };
            (redact_secure(&Value::Object(map)), variables)
        }
        other => (redact_secure(&other), Map::new()),
    }
}

// ---------------------------------------------------------------------------
// ActionExecutor
// ---------------------------------------------------------------------------

/// What the dispatcher persists when a gated action pauses.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalRequest {
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    /// Integration, operation, and redacted parameters for the reviewer.
    pub metadata: Value,
}

/// A completed connector call.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    /// Sanitized public output.
    pub output: Value,
    /// Redacted variables lifted out of the output.
    pub variables: Map<String, Value>,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionRun {
    Completed(ActionResult),
    AwaitingApproval(ApprovalRequest),
}

/// Per-call settings taken from the workflow and engine config.
#[derive(Debug, Clone, Copy)]
pub struct ActionLimits {
    pub retry_policy: RetryPolicy,
    pub timeout: Duration,
    pub max_backoff_ms: u64,
}

/// Runs action steps against the connector registry.
#[derive(Clone)]
pub struct ActionExecutor {
    connectors: Arc<ConnectorRegistry>,
    cipher: Option<Arc<dyn SecretCipher>>,
    events: EventBus,
}

impl ActionExecutor {
    pub fn new(
        connectors: Arc<ConnectorRegistry>,
        cipher: Option<Arc<dyn SecretCipher>>,
        events: EventBus,
    ) -> Self {
        Self {
            connectors,
            cipher,
            events,
        }
    }

    /// Whether the action at this config is approval-gated.
    ///
    /// Fails for unknown integrations or operations.
    pub fn is_gated(&self, config: &ActionStepConfig) -> Result<bool, StepError> {
        let connector = self.connectors.get(&config.integration).ok_or_else(|| {
            StepError::Definition(format!("unknown integration '{}'", config.integration))
        })?;
        let schema = connector.operation(&config.operation).ok_or_else(|| {
            StepError::Definition(format!(
                "integration '{}' has no operation '{}'",
                config.integration, config.operation
            ))
        })?;
        Ok(requires_approval(config, schema))
    }

    /// Reject loops whose body can reach an approval-gated action.
    ///
    /// Iterations cannot pause, so such a loop would fail at run time after
    /// sibling iterations already had side effects.
    pub fn check_loop_bodies(&self, graph: &WorkflowGraph) -> Result<(), DefinitionError> {
        for step in graph.steps() {
            let StepConfig::Loop(cfg) = step.typed_config()? else {
                continue;
            };
            let mut body: Vec<&str> = reachable_from(graph, &cfg.body).into_iter().collect();
            body.sort_unstable();
            for slug in body {
                let Some(inner) = graph.get(slug) else {
                    continue;
                };
                let StepConfig::Action(action) = inner.typed_config()? else {
                    continue;
                };
                let gated = self.is_gated(&action).map_err(|e| DefinitionError::UnknownAction {
                    step_slug: slug.to_string(),
                    message: match e {
                        StepError::Definition(message) => message,
                        other => other.to_string(),
                    },
                })?;
                if gated {
                    return Err(DefinitionError::GatedLoopBody {
                        step_slug: step.step_slug.clone(),
                        action: slug.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Run one action step.
    ///
    /// `approval` is the existing approval for this execution and step, if
    /// any. A pending or absent approval on a gated action yields
    /// `AwaitingApproval` without invoking the connector.
    pub async fn execute(
        &self,
        step_slug: &str,
        config: &ActionStepConfig,
        ctx: &ExecutionContext,
        limits: ActionLimits,
        approval: Option<&Approval>,
    ) -> Result<ActionRun, StepError> {
        let connector = self.connectors.get(&config.integration).ok_or_else(|| {
            StepError::Definition(format!("unknown integration '{}'", config.integration))
        })?;
        let schema = connector.operation(&config.operation).ok_or_else(|| {
            StepError::Definition(format!(
                "integration '{}' has no operation '{}'",
                config.integration, config.operation
            ))
        })?;

        let parameters = ctx.scope.resolve_parameters(&config.parameters);
        validate_parameters(&config.integration, schema, &parameters)?;

        let redacted = redact_secure(&Value::Object(parameters.clone()));
        if requires_approval(config, schema) {
            match approval.map(|a| a.status) {
                None | Some(ApprovalStatus::Pending) => {
                    tracing::info!(
                        execution_id = %ctx.execution_id,
                        step_slug,
                        integration = config.integration.as_str(),
                        operation = config.operation.as_str(),
                        "action requires approval"
                    );
                    return Ok(ActionRun::AwaitingApproval(ApprovalRequest {
                        resource_type: config.resource_type.clone(),
                        resource_id: config.resource_id.clone(),
                        metadata: json!({
                            "integration": config.integration,
                            "operation": config.operation,
                            "operationType": schema.operation_type,
                            "parameters": redacted,
                        }),
                    }));
                }
                Some(ApprovalStatus::Rejected) => {
                    return Err(StepError::ApprovalRejected {
                        step_slug: step_slug.to_string(),
                    });
                }
                Some(ApprovalStatus::Approved) => {}
            }
        }

        let revealed = self.reveal(&parameters).map_err(|e| StepError::ExecutionFailed {
            message: format!("secret decryption failed: {e}"),
            attempts: 0,
        })?;
        let request = ConnectorRequest {
            organization_id: ctx.organization_id.clone(),
            execution_id: ctx.execution_id,
            thread_id: ctx.thread_id.clone(),
            operation: config.operation.clone(),
            parameters: revealed,
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let started = Instant::now();
            tracing::debug!(
                execution_id = %ctx.execution_id,
                step_slug,
                integration = config.integration.as_str(),
                operation = config.operation.as_str(),
                attempt,
                parameters = %redacted,
                "invoking connector"
            );

            let result = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(StepError::Cancelled),
                r = tokio::time::timeout(limits.timeout, connector.invoke(&request)) => match r {
                    Ok(r) => r,
                    Err(_) => Err(ConnectorError::Transient(format!(
                        "timed out after {}s",
                        limits.timeout.as_secs()
                    ))),
                },
            };
            let result = result.and_then(|resp| {
                if resp.success {
                    Ok(resp)
                } else {
                    Err(ConnectorError::Permanent(
                        resp.error.unwrap_or_else(|| "operation reported failure".to_string()),
                    ))
                }
            });

            match result {
                Ok(response) => {
                    tracing::info!(
                        execution_id = %ctx.execution_id,
                        step_slug,
                        attempt,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "connector call succeeded"
                    );
                    let value = response_value(response).map_err(|e| StepError::ExecutionFailed {
                        message: e,
                        attempts: attempt,
                    })?;
                    let (output, variables) = sanitize_output(value);
                    return Ok(ActionRun::Completed(ActionResult {
                        output,
                        variables,
                        attempts: attempt,
                    }));
                }
                Err(e) if RetryHandler::should_retry(&limits.retry_policy, attempt, &e) => {
                    let delay = RetryHandler::backoff_delay(
                        &limits.retry_policy,
                        attempt,
                        limits.max_backoff_ms,
                    );
                    tracing::warn!(
                        execution_id = %ctx.execution_id,
                        step_slug,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient connector failure, retrying"
                    );
                    self.events.publish(ExecutionEvent::StepRetrying {
                        organization_id: ctx.organization_id.clone(),
                        execution_id: ctx.execution_id,
                        step_slug: step_slug.to_string(),
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                        error: e.to_string(),
                    });
                    if !RetryHandler::sleep_or_cancel(delay, &ctx.cancel).await {
                        return Err(StepError::Cancelled);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        execution_id = %ctx.execution_id,
                        step_slug,
                        attempt,
                        error = %e,
                        "connector call failed"
                    );
                    return Err(StepError::ExecutionFailed {
                        message: e.to_string(),
                        attempts: attempt,
                    });
                }
            }
        }
    }

    /// Decrypt secure parameters for the connector call.
    fn reveal(&self, parameters: &Map<String, Value>) -> Result<Map<String, Value>, CipherError> {
        parameters
            .iter()
            .map(|(k, v)| Ok((k.clone(), self.reveal_value(v)?)))
            .collect()
    }

    fn reveal_value(&self, value: &Value) -> Result<Value, CipherError> {
        if !contains_secure(value) {
            return Ok(value.clone());
        }
        match SecureValue::parse(value.clone()) {
            SecureValue::Encrypted(ciphertext) => {
                let cipher = self.cipher.as_ref().ok_or(CipherError::NotConfigured)?;
                cipher.decrypt(&ciphertext)
            }
            SecureValue::Plain(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.reveal_value(v)?)))
                .collect::<Result<Map<_, _>, _>>()
                .map(Value::Object),
            SecureValue::Plain(Value::Array(items)) => items
                .iter()
                .map(|v| self.reveal_value(v))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            SecureValue::Plain(other) => Ok(other),
        }
    }
}

impl std::fmt::Debug for ActionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionExecutor")
            .field("connectors", &self.connectors)
            .field("cipher", &self.cipher.is_some())
            .finish()
    }
}

fn response_value(response: ConnectorResponse) -> Result<Value, String> {
    serde_json::to_value(response).map_err(|e| format!("connector response is not valid JSON: {e}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
