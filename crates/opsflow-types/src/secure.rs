//! Secure value wrapper for secrets carried inside workflow variables.
//!
//! On the wire a secret is the object `{"__secure": true, "jwe": "<compact JWE>"}`.
//! Inside the engine it is parsed into [`SecureValue::Encrypted`] so the type
//! system keeps ciphertext apart from plain data. Only the connector call path
//! decrypts; everything else redacts.

use std::fmt;

use serde_json::{Map, Value};

/// Marker key on the wire wrapper.
pub const SECURE_MARKER: &str = "__secure";
/// Key holding the compact JWE string.
pub const SECURE_PAYLOAD: &str = "jwe";
/// Replacement text for redacted secrets.
pub const REDACTED: &str = "[secure]";

/// Compact JWE ciphertext. `Debug` never prints the payload.
#[derive(Clone, PartialEq, Eq)]
pub struct Ciphertext(String);

impl Ciphertext {
    pub fn new(compact: impl Into<String>) -> Self {
        Self(compact.into())
    }

    /// The compact serialization, for handing to a cipher.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Ciphertext([REDACTED])")
    }
}

/// A value that is either plain data or an encrypted secret.
#[derive(Debug, Clone, PartialEq)]
pub enum SecureValue<T = Value> {
    Plain(T),
    Encrypted(Ciphertext),
}

impl<T> SecureValue<T> {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, SecureValue::Encrypted(_))
    }
}

impl SecureValue<Value> {
    /// Parse a JSON value, recognizing the secure wrapper.
    pub fn parse(value: Value) -> Self {
        match secure_payload(&value) {
            Some(jwe) => SecureValue::Encrypted(Ciphertext::new(jwe)),
            None => SecureValue::Plain(value),
        }
    }

    /// Render back to the wire representation.
    pub fn into_wire(self) -> Value {
        match self {
            SecureValue::Plain(v) => v,
            SecureValue::Encrypted(c) => wrap_secure(c.expose()),
        }
    }

    /// Render for logs and persisted outputs.
    pub fn redacted(&self) -> Value {
        match self {
            SecureValue::Plain(v) => redact_secure(v),
            SecureValue::Encrypted(_) => Value::String(REDACTED.to_string()),
        }
    }
}

/// Build the wire wrapper for a compact JWE.
pub fn wrap_secure(compact: &str) -> Value {
    let mut obj = Map::new();
    obj.insert(SECURE_MARKER.to_string(), Value::Bool(true));
    obj.insert(SECURE_PAYLOAD.to_string(), Value::String(compact.to_string()));
    Value::Object(obj)
}

/// The JWE payload if `value` is a secure wrapper.
pub fn secure_payload(value: &Value) -> Option<&str> {
    let obj = value.as_object()?;
    if obj.get(SECURE_MARKER).and_then(Value::as_bool) != Some(true) {
        return None;
    }
    obj.get(SECURE_PAYLOAD).and_then(Value::as_str)
}

pub fn is_secure_wrapper(value: &Value) -> bool {
    secure_payload(value).is_some()
}

/// Deep copy of `value` with every secure wrapper replaced by [`REDACTED`].
pub fn redact_secure(value: &Value) -> Value {
    if is_secure_wrapper(value) {
        return Value::String(REDACTED.to_string());
    }
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact_secure(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_secure).collect()),
        other => other.clone(),
    }
}

/// Whether any secure wrapper appears anywhere in `value`.
pub fn contains_secure(value: &Value) -> bool {
    if is_secure_wrapper(value) {
        return true;
    }
    match value {
        Value::Object(map) => map.values().any(contains_secure),
        Value::Array(items) => items.iter().any(contains_secure),
        _ => false,
    }
}
