//! SignatureVerifier trait for signed webhook payloads.

/// Checks a webhook body against the signature the caller presented.
///
/// Only consulted for webhook triggers that carry a signing secret.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, secret: &str, body: &[u8], signature: &str) -> bool;
}
