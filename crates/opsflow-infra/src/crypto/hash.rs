//! SHA-256 digests for webhook tokens and API keys.
//!
//! Implements the `TokenHasher` trait from `opsflow-core` using the `sha2`
//! crate (RustCrypto ecosystem).

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::OsRng;
use sha2::{Digest, Sha256};

use opsflow_core::service::hash::TokenHasher;

/// SHA-256 implementation of `TokenHasher`.
///
/// Computes lowercase hex-encoded digests. Inbound credentials are hashed
/// with this and looked up by digest; the plaintext is never stored.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256TokenHasher;

impl Sha256TokenHasher {
    pub fn new() -> Self {
        Self
    }
}

impl TokenHasher for Sha256TokenHasher {
    fn hash_token(&self, token: &str) -> String {
        let digest = Sha256::digest(token.as_bytes());
        format!("{:x}", digest)
    }
}

/// Generate a fresh credential: `prefix` followed by 32 random bytes in hex.
///
/// Webhook tokens use `whk_`, API keys `ofk_`. The caller shows the
/// plaintext once and stores only its hash.
pub fn generate_credential(prefix: &str) -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    format!(
        "{prefix}{}",
        bytes.iter().map(|b| format!("{b:02x}")).collect::<String>()
    )
}
