//! TokenHasher trait for storing inbound credentials as digests.

/// Abstraction over credential hashing.
///
/// Webhook tokens and API keys are stored only as digests; the trigger
/// pipeline hashes the presented credential and looks the digest up.
pub trait TokenHasher: Send + Sync {
    /// Compute a hex-encoded digest of the given token.
    fn hash_token(&self, token: &str) -> String;
}
