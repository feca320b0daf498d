//! Connector trait definition.
//!
//! A connector is an external integration (a shop backend, a subscription
//! platform, a generic HTTP API) exposing named operations. The action step
//! invokes connectors only through this trait; concrete adapters live in
//! opsflow-infra or in the embedding application.
//!
//! Uses RPITIT for `invoke`. `BoxConnector` provides the object-safe wrapper
//! used by the registry.

pub mod box_connector;
pub mod registry;

use opsflow_types::connector::{ConnectorResponse, OperationSchema};
use serde_json::{Map, Value};
use uuid::Uuid;

pub use box_connector::BoxConnector;
pub use registry::ConnectorRegistry;

/// Errors returned by connector invocations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectorError {
    /// Timeout, 5xx, connection reset. Retried per the workflow retry policy.
    #[error("transient connector error: {0}")]
    Transient(String),

    /// 4xx, malformed request, business rule rejection. Never retried.
    #[error("connector error: {0}")]
    Permanent(String),
}

impl ConnectorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ConnectorError::Transient(_))
    }
}

/// A single operation invocation.
///
/// `parameters` may hold decrypted secrets, so `Debug` omits them.
#[derive(Clone)]
pub struct ConnectorRequest {
    pub organization_id: String,
    pub execution_id: Uuid,
    pub thread_id: Option<String>,
    pub operation: String,
    pub parameters: Map<String, Value>,
}

impl std::fmt::Debug for ConnectorRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRequest")
            .field("organization_id", &self.organization_id)
            .field("execution_id", &self.execution_id)
            .field("operation", &self.operation)
            .field("parameters", &format_args!("<{} redacted>", self.parameters.len()))
            .finish()
    }
}

/// Trait for external integrations invoked by action steps.
pub trait Connector: Send + Sync {
    /// Integration name referenced by action step configs (e.g. "shopify").
    fn name(&self) -> &str;

    /// Declared operations with their parameter schemas.
    fn operations(&self) -> &[OperationSchema];

    /// Look up one operation schema by name.
    fn operation(&self, name: &str) -> Option<&OperationSchema> {
        self.operations().iter().find(|op| op.name == name)
    }

    /// Invoke an operation.
    fn invoke(
        &self,
        request: &ConnectorRequest,
    ) -> impl std::future::Future<Output = Result<ConnectorResponse, ConnectorError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_debug_hides_parameters() {
        let mut parameters = Map::new();
        parameters.insert("apiKey".to_string(), json!("sk-live-123"));
        let req = ConnectorRequest {
            organization_id: "org-1".to_string(),
            execution_id: Uuid::nil(),
            thread_id: None,
            operation: "createRefund".to_string(),
            parameters,
        };
        let debug = format!("{req:?}");
        assert!(!debug.contains("sk-live-123"));
        assert!(debug.contains("createRefund"));
    }

    #[test]
    fn transient_classification() {
        assert!(ConnectorError::Transient("503".into()).is_transient());
        assert!(!ConnectorError::Permanent("400".into()).is_transient());
    }
}
