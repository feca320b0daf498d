use thiserror::Error;

/// Errors from repository operations (used by trait definitions in opsflow-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    /// A unique constraint rejected the write (idempotency key, approval pair).
    #[error("duplicate: {0}")]
    Duplicate(String),
}

/// Errors from the secret cipher.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("no secret cipher configured")]
    NotConfigured,

    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    #[error("encryption error")]
    Encryption,

    #[error("decryption error")]
    Decryption,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }

    #[test]
    fn test_cipher_error_hides_detail() {
        assert_eq!(CipherError::Decryption.to_string(), "decryption error");
    }
}
