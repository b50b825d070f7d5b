//! RFC 8785 JSON Canonicalization Scheme (JCS) for Rust, plus the SHA-256
//! hashing helpers that ride directly on top of it.
//!
//! Canonicalization rules:
//! - object keys sorted by UTF-16 code-unit order
//! - compact separators, no whitespace
//! - strings use the minimal JSON escape set
//! - arrays preserve insertion order
//! - NaN / ±Infinity are rejected
//! - numbers are serialized in their shortest unambiguous form

use core::fmt;

use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

/// Canonicalization error.
#[derive(Debug)]
pub enum CanonicalizeError {
    /// Input JSON could not be parsed.
    InvalidJson(serde_json::Error),
    /// Non-finite number encountered.
    NonFiniteNumber,
}

impl fmt::Display for CanonicalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalizeError::InvalidJson(e) => write!(f, "invalid json: {e}"),
            CanonicalizeError::NonFiniteNumber => write!(f, "non-finite number"),
        }
    }
}

impl std::error::Error for CanonicalizeError {}

impl From<serde_json::Error> for CanonicalizeError {
    fn from(value: serde_json::Error) -> Self {
        CanonicalizeError::InvalidJson(value)
    }
}

/// Serialize a JSON value to RFC 8785 canonical form.
pub fn canonicalize(value: &Value) -> Result<Vec<u8>, CanonicalizeError> {
    Ok(canonical_to_string(value)?.into_bytes())
}

/// Serialize a JSON string to RFC 8785 canonical form.
pub fn canonicalize_str(json: &str) -> Result<Vec<u8>, CanonicalizeError> {
    let value: Value = serde_json::from_str(json)?;
    canonicalize(&value)
}

/// Verify that a JSON byte string is already in canonical form.
pub fn is_canonical(bytes: &[u8]) -> bool {
    let s = match core::str::from_utf8(bytes) {
        Ok(v) => v,
        Err(_) => return false,
    };
    let canonical = match canonicalize_str(s) {
        Ok(v) => v,
        Err(_) => return false,
    };
    canonical == bytes
}

/// Canonicalize to a UTF-8 string.
pub fn canonical_to_string(value: &Value) -> Result<String, CanonicalizeError> {
    serialize_value(value)
}

/// SHA-256 of arbitrary bytes.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// SHA-256 of arbitrary bytes, as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// SHA-256 over the canonical bytes of a JSON value.
pub fn canonical_hash(value: &Value) -> Result<[u8; 32], CanonicalizeError> {
    Ok(sha256(&canonicalize(value)?))
}

/// SHA-256 (hex) over the canonical bytes of a JSON value.
pub fn canonical_hash_hex(value: &Value) -> Result<String, CanonicalizeError> {
    Ok(hex::encode(canonical_hash(value)?))
}

fn serialize_value(value: &Value) -> Result<String, CanonicalizeError> {
    match value {
        Value::Null => Ok("null".to_string()),
        Value::Bool(b) => Ok(if *b { "true" } else { "false" }.to_string()),
        Value::Number(n) => serialize_number(n),
        Value::String(s) => serde_json::to_string(s).map_err(CanonicalizeError::InvalidJson),
        Value::Array(arr) => {
            let mut out = String::from("[");
            for (idx, item) in arr.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&serialize_value(item)?);
            }
            out.push(']');
            Ok(out)
        }
        Value::Object(map) => serialize_object(map),
    }
}

fn utf16_cmp(a: &str, b: &str) -> core::cmp::Ordering {
    let mut ia = a.encode_utf16();
    let mut ib = b.encode_utf16();

    loop {
        match (ia.next(), ib.next()) {
            (Some(ua), Some(ub)) => {
                let ord = ua.cmp(&ub);
                if ord != core::cmp::Ordering::Equal {
                    return ord;
                }
            }
            (None, Some(_)) => return core::cmp::Ordering::Less,
            (Some(_), None) => return core::cmp::Ordering::Greater,
            (None, None) => return core::cmp::Ordering::Equal,
        }
    }
}

fn serialize_object(map: &Map<String, Value>) -> Result<String, CanonicalizeError> {
    let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
    keys.sort_by(|a, b| utf16_cmp(a, b));

    let mut out = String::from("{");
    for (idx, key) in keys.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        out.push_str(&serde_json::to_string(key).map_err(CanonicalizeError::InvalidJson)?);
        out.push(':');
        out.push_str(&serialize_value(&map[*key])?);
    }
    out.push('}');
    Ok(out)
}

fn serialize_number(n: &Number) -> Result<String, CanonicalizeError> {
    if let Some(f) = n.as_f64() {
        if !f.is_finite() {
            return Err(CanonicalizeError::NonFiniteNumber);
        }
    }

    // serde_json uses ryu for float rendering; normalize to RFC-style exponents.
    let mut s = n.to_string();
    if s.contains('E') {
        s = s.replace('E', "e");
    }
    if s.contains("e+") {
        s = s.replace("e+", "e");
    }
    Ok(s)
}
