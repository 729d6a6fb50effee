// Copyright 2025 The Brainy Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Canonical serialization and content hashing.
//!
//! Every persisted object is a JSON document. Two logically equal objects must
//! hash identically, so hashing always goes through [`canonical_json_bytes`],
//! which emits compact JSON with object keys sorted recursively. The digest is
//! SHA-256 over those bytes; the resulting [`Hash`] doubles as the storage
//! key.

use serde::Serialize;
use serde_json::Value;
use sha2::Digest as _;
use sha2::Sha256;

use crate::object_id::Hash;

/// SHA-256 over raw bytes.
pub fn hash_bytes(bytes: &[u8]) -> Hash {
    let digest: [u8; 32] = Sha256::digest(bytes).into();
    Hash::new(digest)
}

/// Serializes `value` to its canonical byte form: compact JSON with object
/// keys sorted at every level.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    let canonical = canonicalize(value);
    serde_json::to_vec(&canonical)
}

/// Content hash of `value`'s canonical byte form.
pub fn hash_canonical<T: Serialize>(value: &T) -> Result<Hash, serde_json::Error> {
    Ok(hash_bytes(&canonical_json_bytes(value)?))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            // serde_json object iteration is insertion-ordered; rebuilding
            // through a BTreeMap sorts the keys.
            let sorted: std::collections::BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(values) => Value::Array(values.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
