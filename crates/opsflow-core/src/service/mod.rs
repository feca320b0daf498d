//! Crypto-adjacent ports the engine depends on.
//!
//! Defined here so the engine never couples to a specific algorithm. The
//! SHA-256 hasher, the HMAC verifier, and the JWE cipher adapters live in
//! opsflow-infra.

pub mod cipher;
pub mod hash;
pub mod signature;

pub use cipher::SecretCipher;
pub use hash::TokenHasher;
pub use signature::SignatureVerifier;
