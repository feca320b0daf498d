//! Connector operation schemas and the invocation response envelope.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Whether an operation only reads or mutates external state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Read,
    Write,
}

/// One declared parameter of an operation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpec {
    #[serde(rename = "type", default = "default_param_type")]
    pub param_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

fn default_param_type() -> String {
    "string".to_string()
}

/// JSON-schema-like parameter declaration.
///
/// Required-ness comes from either `properties.*.required` or the legacy
/// top-level `required` list; both are honoured.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(default)]
    pub properties: BTreeMap<String, ParameterSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl ParameterSchema {
    pub fn is_required(&self, name: &str) -> bool {
        self.properties.get(name).is_some_and(|p| p.required)
            || self.required.iter().any(|r| r == name)
    }

    /// All required parameter names, sorted and deduplicated.
    pub fn required_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .properties
            .iter()
            .filter(|(_, p)| p.required)
            .map(|(n, _)| n.clone())
            .chain(self.required.iter().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Schema for one connector operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub operation_type: OperationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_approval: Option<bool>,
    #[serde(default)]
    pub parameters: ParameterSchema,
}

/// Result envelope of a connector invocation.
///
/// `variables` is reserved: it is merged into execution variables and never
/// appears in the step's public output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConnectorResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectorResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            variables: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn required_from_both_forms() {
        let schema: ParameterSchema = serde_json::from_value(json!({
            "properties": {
                "customerId": { "type": "string", "description": "Customer", "required": true },
                "amount": { "type": "number", "description": "Amount" },
                "note": { "type": "string" }
            },
            "required": ["amount"]
        }))
        .unwrap();
        assert!(schema.is_required("customerId"));
        assert!(schema.is_required("amount"));
        assert!(!schema.is_required("note"));
        assert_eq!(schema.required_names(), vec!["amount", "customerId"]);
    }

    #[test]
    fn response_omits_empty_variables() {
        let v = serde_json::to_value(ConnectorResponse::ok(json!({ "id": 1 }))).unwrap();
        assert!(v.get("variables").is_none());
        assert_eq!(v["success"], json!(true));
    }
}
