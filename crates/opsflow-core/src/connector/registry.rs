//! Connector registry for runtime lookup by integration name.

use std::sync::Arc;

use dashmap::DashMap;

use super::box_connector::BoxConnector;
use super::Connector;

/// Registry of available connectors, indexed by integration name.
///
/// Shared across workers; registration may happen while the engine runs.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: DashMap<String, Arc<BoxConnector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector under its own name, replacing any previous one.
    pub fn register<T: Connector + 'static>(&self, connector: T) {
        let name = Connector::name(&connector).to_string();
        tracing::debug!(integration = name.as_str(), "registered connector");
        self.connectors.insert(name, Arc::new(BoxConnector::new(connector)));
    }

    pub fn get(&self, name: &str) -> Option<Arc<BoxConnector>> {
        self.connectors.get(name).map(|c| Arc::clone(c.value()))
    }

    /// All registered integration names, sorted.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connectors.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("connectors", &self.list_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ConnectorError, ConnectorRequest};
    use opsflow_types::connector::{ConnectorResponse, OperationSchema, OperationType, ParameterSchema};
    use serde_json::json;

    struct EchoConnector {
        ops: Vec<OperationSchema>,
    }

    impl Connector for EchoConnector {
        fn name(&self) -> &str {
            "echo"
        }

        fn operations(&self) -> &[OperationSchema] {
            &self.ops
        }

        async fn invoke(
            &self,
            request: &ConnectorRequest,
        ) -> Result<ConnectorResponse, ConnectorError> {
            Ok(ConnectorResponse::ok(json!({ "op": request.operation })))
        }
    }

    #[tokio::test]
    async fn register_and_invoke_through_box() {
        let registry = ConnectorRegistry::new();
        registry.register(EchoConnector {
            ops: vec![OperationSchema {
                name: "ping".to_string(),
                description: String::new(),
                operation_type: OperationType::Read,
                requires_approval: None,
                parameters: ParameterSchema::default(),
            }],
        });

        let connector = registry.get("echo").unwrap();
        assert!(connector.operation("ping").is_some());
        assert!(connector.operation("pong").is_none());

        let response = connector
            .invoke(&ConnectorRequest {
                organization_id: "org-1".to_string(),
                execution_id: uuid::Uuid::nil(),
                thread_id: None,
                operation: "ping".to_string(),
                parameters: Default::default(),
            })
            .await
            .unwrap();
        assert_eq!(response.data, json!({ "op": "ping" }));
        assert_eq!(registry.list_names(), vec!["echo".to_string()]);
        assert!(registry.get("missing").is_none());
    }
}
