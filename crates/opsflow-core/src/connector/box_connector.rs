//! BoxConnector -- object-safe dynamic dispatch wrapper for Connector.
//!
//! Same blanket-impl pattern as the other boxed ports:
//! 1. Define an object-safe `ConnectorDyn` trait with boxed futures
//! 2. Blanket-impl `ConnectorDyn` for all `T: Connector`
//! 3. `BoxConnector` wraps `Box<dyn ConnectorDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use opsflow_types::connector::{ConnectorResponse, OperationSchema};

use super::{Connector, ConnectorError, ConnectorRequest};

/// Object-safe version of [`Connector`] with boxed futures.
pub trait ConnectorDyn: Send + Sync {
    fn name(&self) -> &str;

    fn operations(&self) -> &[OperationSchema];

    fn invoke_boxed<'a>(
        &'a self,
        request: &'a ConnectorRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ConnectorResponse, ConnectorError>> + Send + 'a>>;
}

impl<T: Connector> ConnectorDyn for T {
    fn name(&self) -> &str {
        Connector::name(self)
    }

    fn operations(&self) -> &[OperationSchema] {
        Connector::operations(self)
    }

    fn invoke_boxed<'a>(
        &'a self,
        request: &'a ConnectorRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ConnectorResponse, ConnectorError>> + Send + 'a>> {
        Box::pin(self.invoke(request))
    }
}

/// Type-erased connector for runtime lookup by integration name.
pub struct BoxConnector {
    inner: Box<dyn ConnectorDyn + Send + Sync>,
}

impl BoxConnector {
    pub fn new<T: Connector + 'static>(connector: T) -> Self {
        Self {
            inner: Box::new(connector),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn operations(&self) -> &[OperationSchema] {
        self.inner.operations()
    }

    pub fn operation(&self, name: &str) -> Option<&OperationSchema> {
        self.inner.operations().iter().find(|op| op.name == name)
    }

    pub async fn invoke(
        &self,
        request: &ConnectorRequest,
    ) -> Result<ConnectorResponse, ConnectorError> {
        self.inner.invoke_boxed(request).await
    }
}

impl std::fmt::Debug for BoxConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxConnector")
            .field("name", &self.name())
            .field("operations", &self.operations().len())
            .finish()
    }
}
