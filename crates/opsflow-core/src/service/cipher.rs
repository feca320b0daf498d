//! SecretCipher trait for the secure value wrapper.

use opsflow_types::error::CipherError;
use opsflow_types::secure::Ciphertext;
use serde_json::Value;

/// Encrypts and decrypts the payload of secure values.
///
/// Decryption is only ever performed on the connector call path.
pub trait SecretCipher: Send + Sync {
    fn encrypt(&self, plaintext: &Value) -> Result<Ciphertext, CipherError>;

    fn decrypt(&self, ciphertext: &Ciphertext) -> Result<Value, CipherError>;
}
