//! Configuration digests
//!
//! Values are serialized to compact JSON with object keys sorted at every
//! level, so two processes holding the same definition always agree on the
//! digest.

use crate::error::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256, Sha512};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HashType {
    #[default]
    Sha256,
    Sha512,
}

/// Digest of the canonical JSON form of `obj`
pub fn calc_hash<T: Serialize + ?Sized>(hash_type: HashType, obj: &T) -> Result<Vec<u8>> {
    let canonical = canonicalize(serde_json::to_value(obj)?);
    let bytes = serde_json::to_vec(&canonical)?;

    let digest = match hash_type {
        HashType::Sha256 => Sha256::digest(&bytes).to_vec(),
        HashType::Sha512 => Sha512::digest(&bytes).to_vec(),
    };
    Ok(digest)
}

/// Lowercase hex, the transport form of every digest
pub fn to_hex(digest: &[u8]) -> String {
    hex::encode(digest)
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let sorted: Map<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
