//! Engine configuration loader.
//!
//! Reads `opsflow.toml` into [`EngineConfig`]. A missing file yields the
//! defaults with the database in the platform data directory; a file that
//! exists but does not parse is an error.

use std::path::{Path, PathBuf};

use opsflow_types::config::EngineConfig;
use thiserror::Error;

use crate::crypto::{JweSecretCipher, KeyError};
use crate::sqlite::default_database_url;

/// Default configuration file name.
pub const CONFIG_FILE: &str = "opsflow.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("secret key: {0}")]
    SecretKey(#[from] KeyError),
}

/// Load configuration from `path`, or defaults when the file is absent.
pub async fn load_engine_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file found, using defaults");
            return Ok(EngineConfig {
                database_url: default_database_url(),
                ..EngineConfig::default()
            });
        }
        Err(err) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                message: err.to_string(),
            });
        }
    };

    let config = toml::from_str::<EngineConfig>(&content).map_err(|err| ConfigError::Parse {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;

    // A lease shorter than one step lets a second worker take over mid-step.
    if config.lease_ttl_secs <= config.default_step_timeout_secs {
        tracing::warn!(
            lease_ttl_secs = config.lease_ttl_secs,
            default_step_timeout_secs = config.default_step_timeout_secs,
            "lease TTL does not exceed the default step timeout"
        );
    }
    Ok(config)
}

/// Config file location: `$OPSFLOW_CONFIG`, else `./opsflow.toml`.
pub fn default_config_path() -> PathBuf {
    std::env::var_os("OPSFLOW_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
}

/// Build the secret cipher when a key file is configured.
pub fn load_secret_cipher(config: &EngineConfig) -> Result<Option<JweSecretCipher>, ConfigError> {
    match config.secret_key_file.as_deref() {
        Some(path) => Ok(Some(JweSecretCipher::from_key_file(Path::new(path))?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(&tmp.path().join(CONFIG_FILE)).await.unwrap();
        assert_eq!(config.worker_count, 4);
        assert!(config.connectors.is_empty());
        assert!(config.database_url.ends_with("opsflow.db"));
    }

    #[tokio::test]
    async fn test_valid_file_is_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        tokio::fs::write(
            &path,
            r#"
worker_count = 2
lease_ttl_secs = 900

[server]
port = 8181
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(&path).await.unwrap();
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.lease_ttl_secs, 900);
        assert_eq!(config.server.port, 8181);
    }

    #[tokio::test]
    async fn test_invalid_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        tokio::fs::write(&path, "worker_count = \"many\"").await.unwrap();
        let err = load_engine_config(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_secret_cipher_optional() {
        assert!(load_secret_cipher(&EngineConfig::default()).unwrap().is_none());

        let tmp = TempDir::new().unwrap();
        let key = tmp.path().join("key");
        std::fs::write(&key, "passphrase").unwrap();
        let config = EngineConfig {
            secret_key_file: Some(key.display().to_string()),
            ..EngineConfig::default()
        };
        assert!(load_secret_cipher(&config).unwrap().is_some());
    }
}
