//! Cryptographic adapters for the engine's service ports.
//!
//! - `hash`: SHA-256 digests of webhook tokens and API keys
//! - `jwe`: compact JWE (AES-256-GCM) cipher for secure values
//! - `signature`: HMAC-SHA256 webhook signature verification

pub mod hash;
pub mod jwe;
pub mod signature;

pub use hash::{generate_credential, Sha256TokenHasher};
pub use jwe::{JweSecretCipher, KeyError};
pub use signature::HmacSignatureVerifier;
