//! Canonical JSON normalization and SHA-256 digest computation.
//!
//! Every content-addressable identifier in the controller (diff hashes,
//! context signatures, event hashes, tool-request signatures) goes through
//! this module so that digests are stable regardless of struct field order.

use crate::domain::error::{ControllerError, Result};
use sha2::{Digest, Sha256};

fn sort_keys(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.to_string(), sort_keys(v));
                }
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(arr) => serde_json::Value::Array(arr.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

fn reject_non_finite(value: &serde_json::Value) -> Result<()> {
    match value {
        serde_json::Value::Object(map) => {
            for v in map.values() {
                reject_non_finite(v)?;
            }
            Ok(())
        }
        serde_json::Value::Array(arr) => {
            for v in arr {
                reject_non_finite(v)?;
            }
            Ok(())
        }
        serde_json::Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    return Err(ControllerError::Input(
                        "NaN/Infinity not permitted in canonical JSON".to_string(),
                    ));
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Sort object keys and serialize compactly; used wherever digest stability
/// must not depend on insertion order.
pub fn canonical_json(value: &serde_json::Value) -> Result<String> {
    reject_non_finite(value)?;
    let sorted = sort_keys(value);
    Ok(serde_json::to_string(&sorted)?)
}

/// SHA-256 hex digest of a value's canonical JSON form.
pub fn digest_json(value: &serde_json::Value) -> Result<String> {
    let canonical = canonical_json(value)?;
    Ok(digest_bytes(canonical.as_bytes()))
}

/// SHA-256 hex digest of arbitrary bytes (used for diff text, tool signatures).
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 hex digest of `tool || sortedJSON(args)`, independent of key order.
pub fn tool_request_signature(tool: &str, args: &serde_json::Value) -> Result<String> {
    let canonical_args = canonical_json(args)?;
    let mut hasher = Sha256::new();
    hasher.update(tool.as_bytes());
    hasher.update(canonical_args.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}
