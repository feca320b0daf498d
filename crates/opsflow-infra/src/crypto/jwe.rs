//! Compact JWE (`alg: dir`, `enc: A256GCM`) cipher for secure values.
//!
//! A secure value's payload is the JSON plaintext encrypted under a shared
//! 256-bit key, serialized as
//! `BASE64URL(header) . "" . BASE64URL(iv) . BASE64URL(ciphertext) . BASE64URL(tag)`.
//! The encoded header is the AEAD associated data, so a tampered header
//! fails authentication.
//!
//! The key comes from raw bytes or from a passphrase (Argon2id). Error
//! types never contain plaintext, key material, or ciphertext.

use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use opsflow_core::service::cipher::SecretCipher;
use opsflow_types::error::CipherError;
use opsflow_types::secure::Ciphertext;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Nonce size for AES-256-GCM (96 bits / 12 bytes).
const NONCE_SIZE: usize = 12;
/// Authentication tag size (128 bits).
const TAG_SIZE: usize = 16;
const ALG: &str = "dir";
const ENC: &str = "A256GCM";
/// Fixed KDF salt; the passphrase carries the entropy.
const KDF_SALT: &[u8] = b"opsflow-jwe-v1";

/// Errors while building a cipher. Never includes key material.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key derivation failed")]
    KeyDerivationFailed,

    #[error("secret key file is empty")]
    EmptyPassphrase,

    #[error("cannot read secret key file: {0}")]
    Io(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct JweHeader {
    alg: String,
    enc: String,
}

/// AES-256-GCM compact-JWE implementation of `SecretCipher`.
///
/// Each encryption draws a fresh random IV, so encrypting the same value
/// twice produces different ciphertexts.
pub struct JweSecretCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for JweSecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JweSecretCipher([REDACTED])")
    }
}

impl JweSecretCipher {
    /// Create a cipher from a raw 32-byte key.
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.into()),
        }
    }

    /// Derive the key from a passphrase with Argon2id (19 MiB, 2 passes).
    pub fn from_passphrase(passphrase: &SecretString) -> Result<Self, KeyError> {
        use argon2::{Algorithm, Argon2, Params, Version};

        if passphrase.expose_secret().is_empty() {
            return Err(KeyError::EmptyPassphrase);
        }
        let params =
            Params::new(19456, 2, 1, Some(32)).map_err(|_| KeyError::KeyDerivationFailed)?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = [0u8; 32];
        argon2
            .hash_password_into(passphrase.expose_secret().as_bytes(), KDF_SALT, &mut key)
            .map_err(|_| KeyError::KeyDerivationFailed)?;
        Ok(Self::new(&key))
    }

    /// Read a passphrase file (surrounding whitespace ignored) and derive the key.
    pub fn from_key_file(path: &Path) -> Result<Self, KeyError> {
        let raw = std::fs::read_to_string(path).map_err(|e| KeyError::Io(e.kind().to_string()))?;
        let passphrase = SecretString::from(raw.trim().to_string());
        Self::from_passphrase(&passphrase)
    }

    fn encoded_header() -> Result<String, CipherError> {
        let header = serde_json::to_vec(&JweHeader {
            alg: ALG.to_string(),
            enc: ENC.to_string(),
        })
        .map_err(|_| CipherError::Encryption)?;
        Ok(URL_SAFE_NO_PAD.encode(header))
    }
}

fn decode_part(part: &str, name: &str) -> Result<Vec<u8>, CipherError> {
    URL_SAFE_NO_PAD
        .decode(part)
        .map_err(|_| CipherError::Malformed(format!("invalid base64url in {name}")))
}

impl SecretCipher for JweSecretCipher {
    fn encrypt(&self, plaintext: &Value) -> Result<Ciphertext, CipherError> {
        let header = Self::encoded_header()?;
        let msg = serde_json::to_vec(plaintext).map_err(|_| CipherError::Encryption)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let sealed = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: &msg,
                    aad: header.as_bytes(),
                },
            )
            .map_err(|_| CipherError::Encryption)?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_SIZE);

        Ok(Ciphertext::new(format!(
            "{header}..{}.{}.{}",
            URL_SAFE_NO_PAD.encode(nonce),
            URL_SAFE_NO_PAD.encode(ciphertext),
            URL_SAFE_NO_PAD.encode(tag),
        )))
    }

    fn decrypt(&self, ciphertext: &Ciphertext) -> Result<Value, CipherError> {
        let parts: Vec<&str> = ciphertext.expose().split('.').collect();
        let [header, encrypted_key, iv, body, tag] = parts.as_slice() else {
            return Err(CipherError::Malformed(format!(
                "expected 5 segments, found {}",
                parts.len()
            )));
        };
        if !encrypted_key.is_empty() {
            return Err(CipherError::Malformed(
                "direct encryption carries no encrypted key".to_string(),
            ));
        }

        let parsed: JweHeader = serde_json::from_slice(&decode_part(header, "header")?)
            .map_err(|_| CipherError::Malformed("invalid header".to_string()))?;
        if parsed.alg != ALG || parsed.enc != ENC {
            return Err(CipherError::Malformed(format!(
                "unsupported algorithm {}/{}",
                parsed.alg, parsed.enc
            )));
        }

        let iv = decode_part(iv, "iv")?;
        if iv.len() != NONCE_SIZE {
            return Err(CipherError::Malformed("invalid iv length".to_string()));
        }
        let mut sealed = decode_part(body, "ciphertext")?;
        let tag = decode_part(tag, "tag")?;
        if tag.len() != TAG_SIZE {
            return Err(CipherError::Malformed("invalid tag length".to_string()));
        }
        sealed.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &sealed,
                    aad: header.as_bytes(),
                },
            )
            .map_err(|_| CipherError::Decryption)?;
        serde_json::from_slice(&plaintext).map_err(|_| CipherError::Decryption)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
        key
    }

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = JweSecretCipher::new(&test_key());
        let secret = json!({ "apiKey": "sk-live-123", "scopes": ["refunds"] });
        let compact = cipher.encrypt(&secret).unwrap();

        assert_eq!(compact.expose().split('.').count(), 5);
        assert!(!compact.expose().contains("sk-live-123"));
        assert_eq!(cipher.decrypt(&compact).unwrap(), secret);
    }

    #[test]
    fn test_header_is_dir_a256gcm() {
        let cipher = JweSecretCipher::new(&test_key());
        let compact = cipher.encrypt(&json!("x")).unwrap();
        let header = compact.expose().split('.').next().unwrap();
        let header: Value = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header).unwrap()).unwrap();
        assert_eq!(header, json!({ "alg": "dir", "enc": "A256GCM" }));
    }

    #[test]
    fn test_random_iv_produces_different_ciphertexts() {
        let cipher = JweSecretCipher::new(&test_key());
        let a = cipher.encrypt(&json!("same")).unwrap();
        let b = cipher.encrypt(&json!("same")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails_decryption() {
        let compact = JweSecretCipher::new(&test_key()).encrypt(&json!("secret")).unwrap();
        let mut wrong = test_key();
        wrong[0] = 0xFF;
        let err = JweSecretCipher::new(&wrong).decrypt(&compact).unwrap_err();
        assert!(matches!(err, CipherError::Decryption));
    }

    #[test]
    fn test_tampered_header_fails_authentication() {
        let cipher = JweSecretCipher::new(&test_key());
        let compact = cipher.encrypt(&json!("secret")).unwrap();
        let rest = compact.expose().split_once('.').unwrap().1;
        let forged_header = URL_SAFE_NO_PAD.encode(br#"{"enc":"A256GCM","alg":"dir"}"#);
        let forged = Ciphertext::new(format!("{forged_header}.{rest}"));
        assert!(matches!(cipher.decrypt(&forged), Err(CipherError::Decryption)));
    }

    #[test]
    fn test_malformed_inputs() {
        let cipher = JweSecretCipher::new(&test_key());
        for bad in ["", "a.b.c", "a.b.c.d.e", "!!..!!.!!.!!"] {
            let err = cipher.decrypt(&Ciphertext::new(bad)).unwrap_err();
            assert!(matches!(err, CipherError::Malformed(_)), "{bad}: {err:?}");
        }
    }

    #[test]
    fn test_passphrase_is_deterministic() {
        let pass = SecretString::from("correct horse battery staple".to_string());
        let a = JweSecretCipher::from_passphrase(&pass).unwrap();
        let b = JweSecretCipher::from_passphrase(&pass).unwrap();
        let compact = a.encrypt(&json!(42)).unwrap();
        assert_eq!(b.decrypt(&compact).unwrap(), json!(42));
    }

    #[test]
    fn test_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");
        std::fs::write(&path, "  file-passphrase\n").unwrap();
        let from_file = JweSecretCipher::from_key_file(&path).unwrap();
        let direct =
            JweSecretCipher::from_passphrase(&SecretString::from("file-passphrase".to_string()))
                .unwrap();
        let compact = from_file.encrypt(&json!({ "k": 1 })).unwrap();
        assert_eq!(direct.decrypt(&compact).unwrap(), json!({ "k": 1 }));

        std::fs::write(&path, "\n").unwrap();
        assert!(matches!(
            JweSecretCipher::from_key_file(&path),
            Err(KeyError::EmptyPassphrase)
        ));
        assert!(matches!(
            JweSecretCipher::from_key_file(&dir.path().join("missing")),
            Err(KeyError::Io(_))
        ));
    }

    #[test]
    fn test_debug_and_errors_never_leak() {
        let cipher = JweSecretCipher::new(&test_key());
        assert_eq!(format!("{cipher:?}"), "JweSecretCipher([REDACTED])");
        let compact = cipher.encrypt(&json!("sk-super-secret")).unwrap();
        let err = JweSecretCipher::new(&[7u8; 32]).decrypt(&compact).unwrap_err();
        assert!(!err.to_string().contains("sk-super-secret"));
    }
}
