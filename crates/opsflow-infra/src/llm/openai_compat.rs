//! OpenAI-compatible chat-completions client.
//!
//! Sends the step's resolved prompt as a single user message to
//! `{base_url}/chat/completions` and returns `{text, model, usage}` as the
//! step output.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use opsflow_core::llm::{LlmClient, LlmError, LlmRequest};
use opsflow_types::config::LlmConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatClientError {
    #[error("environment variable {0} for the LLM API key is not set")]
    MissingApiKey(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Value>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// `LlmClient` for any OpenAI-compatible endpoint.
///
/// The API key is stored as a [`SecretString`]; it never appears in Debug
/// output or logs.
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
}

impl std::fmt::Debug for ChatCompletionsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl ChatCompletionsClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<SecretString>,
    ) -> Result<Self, ChatClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| ChatClientError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, ChatClientError> {
        let api_key = config
            .api_key_env
            .as_ref()
            .map(|var| {
                std::env::var(var)
                    .map(SecretString::from)
                    .map_err(|_| ChatClientError::MissingApiKey(var.clone()))
            })
            .transpose()?;
        Self::new(&config.base_url, &config.model, api_key)
    }

    async fn send(&self, request: &LlmRequest) -> Result<Value, LlmError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let body = ChatRequest {
            model,
            messages: [ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::Failed(format!("HTTP request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(LlmError::Failed(format!("HTTP {status}: {error_body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Failed(format!("failed to parse response: {e}")))?;
        to_output(parsed, model)
    }
}

fn to_output(response: ChatResponse, requested_model: &str) -> Result<Value, LlmError> {
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| LlmError::Failed("response contained no choices".to_string()))?;
    Ok(json!({
        "text": text,
        "model": response.model.unwrap_or_else(|| requested_model.to_string()),
        "usage": response.usage.unwrap_or(Value::Null),
    }))
}

impl LlmClient for ChatCompletionsClient {
    fn complete<'a>(
        &'a self,
        request: &'a LlmRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Value, LlmError>> + Send + 'a>> {
        Box::pin(async move {
            tracing::debug!(
                execution_id = %request.execution_id,
                model = request.model.as_deref().unwrap_or(&self.model),
                "sending llm completion"
            );
            self.send(request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let body = ChatRequest {
            model: "small",
            messages: [ChatMessage {
                role: "user",
                content: "Summarize order o-1",
            }],
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({ "model": "small", "messages": [{ "role": "user", "content": "Summarize order o-1" }] })
        );
    }

    #[test]
    fn test_output_takes_first_choice() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [
                { "message": { "role": "assistant", "content": "refund approved" } },
                { "message": { "role": "assistant", "content": "ignored" } }
            ],
            "usage": { "total_tokens": 12 }
        }))
        .unwrap();
        let out = to_output(response, "small").unwrap();
        assert_eq!(out["text"], "refund approved");
        assert_eq!(out["model"], "small");
        assert_eq!(out["usage"]["total_tokens"], 12);
    }

    #[test]
    fn test_output_without_choices_fails() {
        let response: ChatResponse = serde_json::from_value(json!({ "choices": [] })).unwrap();
        assert!(matches!(to_output(response, "m"), Err(LlmError::Failed(_))));
    }

    #[test]
    fn test_debug_hides_key() {
        let client = ChatCompletionsClient::new(
            "https://llm.internal/v1/",
            "small",
            Some(SecretString::from("sk-hidden".to_string())),
        )
        .unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("sk-hidden"));
        assert!(debug.contains("https://llm.internal/v1\""));
    }
}
