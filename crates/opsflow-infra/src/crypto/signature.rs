//! HMAC-SHA256 verification of signed webhook bodies.
//!
//! Accepts plain hex signatures and the GitHub-style `sha256=<hex>` form.
//! Comparison is constant time via the `hmac` crate's `verify_slice`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use opsflow_core::service::signature::SignatureVerifier;

type HmacSha256 = Hmac<Sha256>;

/// `SignatureVerifier` backed by HMAC-SHA256.
#[derive(Debug, Default, Clone, Copy)]
pub struct HmacSignatureVerifier;

impl HmacSignatureVerifier {
    pub fn new() -> Self {
        Self
    }
}

impl SignatureVerifier for HmacSignatureVerifier {
    fn verify(&self, secret: &str, body: &[u8], signature: &str) -> bool {
        let hex_sig = signature.trim();
        let hex_sig = hex_sig.strip_prefix("sha256=").unwrap_or(hex_sig);
        let Ok(expected) = hex_decode(hex_sig) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(body);
        mac.verify_slice(&expected).is_ok()
    }
}

/// Compute the hex signature a sender would attach to `body`.
pub fn sign_hex(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(hex_encode(&mac.finalize().into_bytes()))
}

fn hex_decode(hex: &str) -> Result<Vec<u8>, ()> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return Err(());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"orderId":"o-1","amount":120}"#;

    #[test]
    fn test_valid_signature_plain_and_prefixed() {
        let verifier = HmacSignatureVerifier::new();
        let sig = sign_hex("whsec", BODY).unwrap();
        assert!(verifier.verify("whsec", BODY, &sig));
        assert!(verifier.verify("whsec", BODY, &format!("sha256={sig}")));
    }

    #[test]
    fn test_rfc4231_vector() {
        // RFC 4231 test case 2.
        let sig = sign_hex("Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_rejects_tampering_and_garbage() {
        let verifier = HmacSignatureVerifier::new();
        let sig = sign_hex("whsec", BODY).unwrap();
        assert!(!verifier.verify("other", BODY, &sig));
        assert!(!verifier.verify("whsec", b"{}", &sig));
        assert!(!verifier.verify("whsec", BODY, "zz"));
        assert!(!verifier.verify("whsec", BODY, "abc"));
        assert!(!verifier.verify("whsec", BODY, ""));
    }
}
