//! Execution context with variable scoping and template resolution.
//!
//! `VariableScope` is the variable map a step sees: the execution's
//! accumulated variables, or inside a loop a private copy with the item and
//! index bound. `ExecutionContext` bundles the scope with the identifiers and
//! the cancellation token every step handler receives.

use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use opsflow_types::secure::is_secure_wrapper;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum size of a single step output (1 MB).
pub const MAX_STEP_OUTPUT_SIZE: usize = 1_048_576;

// ---------------------------------------------------------------------------
// VariableScope
// ---------------------------------------------------------------------------

/// Variables visible to a step.
///
/// Step outputs are stored under the step slug. Lookups accept dotted paths
/// (`orders.0.id`) and bracket indexes (`orders[0].id`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableScope {
    vars: Map<String, Value>,
}

impl VariableScope {
    pub fn new(vars: Map<String, Value>) -> Self {
        Self { vars }
    }

    /// Resolve a dotted path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let normalized = path.trim().replace('[', ".").replace(']', "");
        let mut segments = normalized.split('.').filter(|s| !s.is_empty());
        let first = segments.next()?;
        let mut current = self.vars.get(first)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.vars.insert(key.into(), value);
    }

    /// Store a step's output under its slug.
    ///
    /// Outputs larger than `MAX_STEP_OUTPUT_SIZE` are replaced by a
    /// truncation marker.
    pub fn set_step_output(&mut self, step_slug: &str, output: Value) {
        let size = serde_json::to_string(&output).map(|s| s.len()).unwrap_or(0);
        if size > MAX_STEP_OUTPUT_SIZE {
            tracing::warn!(
                step_slug,
                size,
                max = MAX_STEP_OUTPUT_SIZE,
                "step output exceeds size limit, truncating"
            );
            self.vars.insert(
                step_slug.to_string(),
                json!({
                    "_truncated": true,
                    "_original_size": size,
                }),
            );
        } else {
            self.vars.insert(step_slug.to_string(), output);
        }
    }

    /// Merge a map of variables, overwriting existing keys.
    pub fn merge(&mut self, vars: Map<String, Value>) {
        self.vars.extend(vars);
    }

    /// A private copy with extra bindings (loop item/index).
    pub fn with_bindings<I>(&self, bindings: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut child = self.clone();
        child.vars.extend(bindings);
        child
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.vars
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.vars
    }

    /// The variables as a JSON object (expression evaluation context).
    pub fn to_value(&self) -> Value {
        Value::Object(self.vars.clone())
    }

    /// Replace every `{{ path }}` placeholder in a string.
    ///
    /// Unknown references are left as-is (not an error).
    pub fn resolve_template(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start..].find("}}") else {
                break;
            };
            let end = start + len + 2;
            let path = rest[start + 2..end - 2].trim();
            out.push_str(&rest[..start]);
            match self.get(path) {
                Some(value) => out.push_str(&value_to_string(value)),
                None => out.push_str(&rest[start..end]),
            }
            rest = &rest[end..];
        }
        out.push_str(rest);
        out
    }

    /// Resolve placeholders inside a JSON value.
    ///
    /// A string that is exactly one placeholder (`"{{ order.total }}"`)
    /// resolves to the referenced value itself, preserving its type; a
    /// missing reference resolves to `null`. Secure wrappers pass through
    /// untouched.
    pub fn resolve_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => match whole_placeholder(s) {
                Some(path) => self.get(path).cloned().unwrap_or(Value::Null),
                None if s.contains("{{") => Value::String(self.resolve_template(s)),
                None => value.clone(),
            },
            Value::Object(_) if is_secure_wrapper(value) => value.clone(),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_value(v)))
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve_value(v)).collect()),
            other => other.clone(),
        }
    }

    /// Resolve every parameter of an action step.
    pub fn resolve_parameters(&self, parameters: &Map<String, Value>) -> Map<String, Value> {
        parameters
            .iter()
            .map(|(k, v)| (k.clone(), self.resolve_value(v)))
            .collect()
    }
}

/// The inner path if `s` is exactly `{{ path }}`.
fn whole_placeholder(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

/// Convert a JSON value to a display string for template resolution.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Everything a step handler may use besides its own config.
///
/// Condition handlers receive only the scope; the other handlers receive
/// the whole context, including `thread_id`.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub organization_id: String,
    pub execution_id: Uuid,
    pub thread_id: Option<String>,
    pub cancel: CancellationToken,
    pub scope: VariableScope,
}

impl ExecutionContext {
    pub fn new(
        organization_id: impl Into<String>,
        execution_id: Uuid,
        thread_id: Option<String>,
        cancel: CancellationToken,
        scope: VariableScope,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            execution_id,
            thread_id,
            cancel,
            scope,
        }
    }

    /// Same identifiers and cancellation, different scope.
    pub fn with_scope(&self, scope: VariableScope) -> Self {
        Self {
            organization_id: self.organization_id.clone(),
            execution_id: self.execution_id,
            thread_id: self.thread_id.clone(),
            cancel: self.cancel.clone(),
            scope,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> VariableScope {
        let vars = json!({
            "customer": { "id": "c-1", "name": "Ada" },
            "orders": [{ "id": "o-1", "total": 12.5 }, { "id": "o-2", "total": 99 }],
            "amount": 150,
            "token": { "__secure": true, "jwe": "a.b.c.d.e" }
        });
        VariableScope::new(vars.as_object().cloned().unwrap())
    }

    #[test]
    fn test_path_lookup() {
        let s = scope();
        assert_eq!(s.get("customer.name"), Some(&json!("Ada")));
        assert_eq!(s.get("orders.1.id"), Some(&json!("o-2")));
        assert_eq!(s.get("orders[0].total"), Some(&json!(12.5)));
        assert_eq!(s.get("orders.7"), None);
        assert_eq!(s.get("missing.path"), None);
    }

    #[test]
    fn test_resolve_template_embedded() {
        let s = scope();
        assert_eq!(
            s.resolve_template("Hi {{ customer.name }}, order {{orders.0.id}}"),
            "Hi Ada, order o-1"
        );
    }

    #[test]
    fn test_resolve_unknown_reference_left_asis() {
        let s = scope();
        assert_eq!(s.resolve_template("x {{ nope }} y"), "x {{ nope }} y");
        assert_eq!(s.resolve_template("unterminated {{ a"), "unterminated {{ a");
    }

    #[test]
    fn test_whole_placeholder_preserves_type() {
        let s = scope();
        assert_eq!(s.resolve_value(&json!("{{ amount }}")), json!(150));
        assert_eq!(s.resolve_value(&json!("{{ customer }}")), json!({ "id": "c-1", "name": "Ada" }));
        assert_eq!(s.resolve_value(&json!("{{ missing }}")), Value::Null);
    }

    #[test]
    fn test_secure_wrapper_passes_through() {
        let s = scope();
        let resolved = s.resolve_value(&json!("{{ token }}"));
        assert!(is_secure_wrapper(&resolved));
    }

    #[test]
    fn test_resolve_parameters_nested() {
        let s = scope();
        let params = json!({
            "customerId": "{{ customer.id }}",
            "lines": [{ "order": "{{ orders.1.id }}" }],
            "note": "for {{ customer.name }}",
            "fixed": 3
        });
        let resolved = s.resolve_parameters(params.as_object().unwrap());
        assert_eq!(resolved["customerId"], json!("c-1"));
        assert_eq!(resolved["lines"][0]["order"], json!("o-2"));
        assert_eq!(resolved["note"], json!("for Ada"));
        assert_eq!(resolved["fixed"], json!(3));
    }

    #[test]
    fn test_with_bindings_does_not_leak() {
        let parent = scope();
        let child = parent.with_bindings([("item".to_string(), json!(1))]);
        assert_eq!(child.get("item"), Some(&json!(1)));
        assert_eq!(parent.get("item"), None);
    }

    #[test]
    fn test_step_output_size_limit_truncates() {
        let mut s = VariableScope::default();
        let large = "x".repeat(MAX_STEP_OUTPUT_SIZE + 100);
        s.set_step_output("big", json!(large));
        assert_eq!(s.get("big._truncated"), Some(&json!(true)));
    }
}
