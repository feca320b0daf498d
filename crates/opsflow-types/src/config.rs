//! Engine configuration.
//!
//! `EngineConfig` represents `opsflow.toml`. All fields have sensible
//! defaults; the CLI can override the common ones through `OPSFLOW_*`
//! environment variables.

use serde::{Deserialize, Serialize};

use crate::connector::OperationSchema;

/// Top-level configuration for the engine and its HTTP ingress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// SQLite URL, e.g. `sqlite:///var/lib/opsflow/opsflow.db`.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Number of dispatcher worker tasks.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Lifetime of an execution lease before another worker may take over.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,

    /// Accepted triggers per organization per minute.
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,

    /// Step timeout when neither the step nor the workflow sets one.
    #[serde(default = "default_step_timeout_secs")]
    pub default_step_timeout_secs: u64,

    /// Upper bound on a single retry backoff delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default)]
    pub server: ServerConfig,

    /// Path to a file holding the secret-cipher passphrase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_file: Option<String>,

    /// HTTP-backed connectors registered at startup.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connectors: Vec<HttpConnectorConfig>,

    /// Chat-completions endpoint used by `llm` steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,
}

/// A connector reached over HTTP: `POST {base_url}/{operation}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConnectorConfig {
    /// Integration name referenced by action steps.
    pub name: String,
    pub base_url: String,
    /// Environment variable holding the bearer token, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
    #[serde(default = "default_connector_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub operations: Vec<OperationSchema>,
}

/// OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_database_url() -> String {
    "sqlite://opsflow.db".to_string()
}

fn default_worker_count() -> usize {
    4
}

fn default_lease_ttl_secs() -> u64 {
    300
}

fn default_rate_limit_per_minute() -> u32 {
    60
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_connector_timeout_secs() -> u64 {
    30
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            worker_count: default_worker_count(),
            lease_ttl_secs: default_lease_ttl_secs(),
            rate_limit_per_minute: default_rate_limit_per_minute(),
            default_step_timeout_secs: default_step_timeout_secs(),
            max_backoff_ms: default_max_backoff_ms(),
            server: ServerConfig::default(),
            secret_key_file: None,
            connectors: Vec::new(),
            llm: None,
        }
    }
}
