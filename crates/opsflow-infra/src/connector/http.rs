//! HTTP connector: each operation is `POST {base_url}/{operation}`.
//!
//! The request body is the (already decrypted) parameter object. Execution
//! identity travels in `X-Opsflow-*` headers. A JSON reply carrying a boolean
//! `success` is read as a full `ConnectorResponse`; any other 2xx body
//! becomes the `data` of a successful response.
//!
//! Failure classification drives the retry policy: timeouts, connection
//! errors, 429 and 5xx are transient; every other status is permanent.

use std::time::Duration;

use opsflow_core::connector::{Connector, ConnectorError, ConnectorRequest};
use opsflow_types::config::HttpConnectorConfig;
use opsflow_types::connector::{ConnectorResponse, OperationSchema};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use thiserror::Error;

/// Errors while building a connector from configuration.
#[derive(Debug, Error)]
pub enum HttpConnectorError {
    #[error("environment variable {0} for connector token is not set")]
    MissingToken(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// A connector whose operations are served by one HTTP endpoint.
///
/// The bearer token is held as a [`SecretString`] and only exposed when
/// building request headers.
pub struct HttpConnector {
    name: String,
    base_url: String,
    token: Option<SecretString>,
    operations: Vec<OperationSchema>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnector")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("operations", &self.operations.len())
            .finish()
    }
}

impl HttpConnector {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        operations: Vec<OperationSchema>,
        timeout: Duration,
    ) -> Result<Self, HttpConnectorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("opsflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HttpConnectorError::Client(e.to_string()))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            operations,
            client,
        })
    }

    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }

    /// Build from a `[[connectors]]` entry, reading the token from its env var.
    pub fn from_config(config: &HttpConnectorConfig) -> Result<Self, HttpConnectorError> {
        let connector = Self::new(
            &config.name,
            &config.base_url,
            config.operations.clone(),
            Duration::from_secs(config.timeout_secs),
        )?;
        match &config.token_env {
            Some(var) => {
                let token = std::env::var(var)
                    .map_err(|_| HttpConnectorError::MissingToken(var.clone()))?;
                Ok(connector.with_token(SecretString::from(token)))
            }
            None => Ok(connector),
        }
    }

    fn url(&self, operation: &str) -> String {
        format!("{}/{}", self.base_url, operation)
    }
}

/// Whether an HTTP status should be retried.
fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn classify_send_error(error: &reqwest::Error) -> ConnectorError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        ConnectorError::Transient(format!("request failed: {error}"))
    } else {
        ConnectorError::Permanent(format!("request failed: {error}"))
    }
}

/// Interpret a successful response body.
fn parse_body(body: &str) -> ConnectorResponse {
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) if body.trim().is_empty() => Value::Null,
        Err(_) => Value::String(body.to_string()),
    };
    let is_envelope = value.get("success").is_some_and(Value::is_boolean);
    if is_envelope {
        if let Ok(response) = serde_json::from_value::<ConnectorResponse>(value.clone()) {
            return response;
        }
    }
    ConnectorResponse::ok(value)
}

impl Connector for HttpConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn operations(&self) -> &[OperationSchema] {
        &self.operations
    }

    async fn invoke(&self, request: &ConnectorRequest) -> Result<ConnectorResponse, ConnectorError> {
        let mut builder = self
            .client
            .post(self.url(&request.operation))
            .header("x-opsflow-organization", &request.organization_id)
            .header("x-opsflow-execution", request.execution_id.to_string())
            .json(&request.parameters);
        if let Some(thread_id) = &request.thread_id {
            builder = builder.header("x-opsflow-thread", thread_id);
        }
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token.expose_secret());
        }

        let response = builder.send().await.map_err(|e| classify_send_error(&e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ConnectorError::Transient(format!("reading response body: {e}")))?;

        if status.is_success() {
            tracing::debug!(
                connector = self.name.as_str(),
                operation = request.operation.as_str(),
                status = status.as_u16(),
                "connector call succeeded"
            );
            return Ok(parse_body(&body));
        }

        tracing::warn!(
            connector = self.name.as_str(),
            operation = request.operation.as_str(),
            status = status.as_u16(),
            "connector call failed"
        );
        let message = format!("HTTP {status}: {}", truncate(&body, 512));
        if is_transient_status(status) {
            Err(ConnectorError::Transient(message))
        } else {
            Err(ConnectorError::Permanent(message))
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsflow_types::connector::OperationType;
    use serde_json::{json, Map};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use uuid::Uuid;

    /// Serve a single canned HTTP response, returning the base URL and the
    /// raw request text once it has been read.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let mut request = Vec::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{addr}"), handle)
    }

    fn schema() -> OperationSchema {
        OperationSchema {
            name: "createRefund".to_string(),
            description: String::new(),
            operation_type: OperationType::Write,
            requires_approval: None,
            parameters: Default::default(),
        }
    }

    fn request(thread: Option<&str>) -> ConnectorRequest {
        let mut parameters = Map::new();
        parameters.insert("amount".to_string(), json!(120));
        ConnectorRequest {
            organization_id: "org-1".to_string(),
            execution_id: Uuid::nil(),
            thread_id: thread.map(str::to_string),
            operation: "createRefund".to_string(),
            parameters,
        }
    }

    fn connector(base_url: &str) -> HttpConnector {
        HttpConnector::new("shop", base_url, vec![schema()], Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_success_posts_parameters_with_headers() {
        let (url, server) = serve_once("200 OK", r#"{"refundId":"r-9"}"#).await;
        let conn = connector(&url).with_token(SecretString::from("tok-1".to_string()));

        let response = conn.invoke(&request(Some("th-1"))).await.unwrap();
        assert!(response.success);
        assert_eq!(response.data["refundId"], "r-9");

        let raw = server.await.unwrap().to_lowercase();
        assert!(raw.starts_with("post /createrefund"));
        assert!(raw.contains("x-opsflow-organization: org-1"));
        assert!(raw.contains("x-opsflow-thread: th-1"));
        assert!(raw.contains("authorization: bearer tok-1"));
        assert!(raw.contains(r#"{"amount":120}"#));
    }

    #[tokio::test]
    async fn test_envelope_response_is_passed_through() {
        let (url, _server) =
            serve_once("200 OK", r#"{"success":false,"error":"card declined"}"#).await;
        let response = connector(&url).invoke(&request(None)).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("card declined"));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let (url, _server) = serve_once("503 Service Unavailable", r#"{"error":"busy"}"#).await;
        let err = connector(&url).invoke(&request(None)).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_client_error_is_permanent() {
        let (url, _server) = serve_once("422 Unprocessable Entity", r#"{"error":"bad"}"#).await;
        let err = connector(&url).invoke(&request(None)).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("422"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = connector(&format!("http://{addr}")).invoke(&request(None)).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_parse_body_variants() {
        assert_eq!(parse_body("").data, Value::Null);
        assert_eq!(parse_body("plain text").data, json!("plain text"));
        assert_eq!(parse_body(r#"{"success":"yes"}"#).data, json!({ "success": "yes" }));
        let envelope = parse_body(r#"{"success":true,"data":{"id":1},"variables":{"x":2}}"#);
        assert_eq!(envelope.data, json!({ "id": 1 }));
        assert_eq!(envelope.variables.unwrap()["x"], 2);
    }

    #[test]
    fn test_from_config_requires_token_env() {
        let config = HttpConnectorConfig {
            name: "shop".to_string(),
            base_url: "http://localhost:9/".to_string(),
            token_env: Some("OPSFLOW_TEST_TOKEN_THAT_IS_NOT_SET".to_string()),
            timeout_secs: 5,
            operations: vec![schema()],
        };
        assert!(matches!(
            HttpConnector::from_config(&config),
            Err(HttpConnectorError::MissingToken(_))
        ));

        let config = HttpConnectorConfig { token_env: None, ..config };
        let conn = HttpConnector::from_config(&config).unwrap();
        assert_eq!(conn.url("createRefund"), "http://localhost:9/createRefund");
        assert_eq!(Connector::name(&conn), "shop");
    }
}
