use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use uuid::Uuid;

/// Errors from an LLM client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    #[error("no LLM client configured")]
    NotConfigured,

    #[error("LLM request failed: {0}")]
    Failed(String),
}

/// A resolved prompt for one `llm` step.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub organization_id: String,
    pub execution_id: Uuid,
    pub thread_id: Option<String>,
    pub prompt: String,
    pub model: Option<String>,
}

/// Object-safe LLM client.
///
/// Returns the step output directly (typically `{ "text": ... }`).
pub trait LlmClient: Send + Sync {
    fn complete<'a>(
        &'a self,
        request: &'a LlmRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Value, LlmError>> + Send + 'a>>;
}

/// Default client that fails every request.
///
/// Workflows without `llm` steps run fine without wiring a real client.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredLlm;

impl LlmClient for UnconfiguredLlm {
    fn complete<'a>(
        &'a self,
        _request: &'a LlmRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Value, LlmError>> + Send + 'a>> {
        Box::pin(async { Err(LlmError::NotConfigured) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_client_errors() {
        let client = UnconfiguredLlm;
        let req = LlmRequest {
            organization_id: "org-1".to_string(),
            execution_id: Uuid::nil(),
            thread_id: None,
            prompt: "hi".to_string(),
            model: None,
        };
        assert_eq!(client.complete(&req).await, Err(LlmError::NotConfigured));
    }
}
