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

//! Content-addressed object identifiers.

use std::fmt;
use std::fmt::Debug;

use crate::hex_util;

/// Number of bytes in a [`Hash`] (SHA-256 digest width).
pub const HASH_LEN: usize = 32;

/// Identifier for a blob, tree, or commit, computed as the SHA-256 digest of
/// the object's canonical byte form. The all-zero value is the [`NULL_HASH`]
/// sentinel meaning "no parent" / "empty tree" and never addresses stored
/// content.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Hash)]
pub struct Hash([u8; HASH_LEN]);

/// Sentinel hash (64 zeros in hex form). Must never be read from the blob
/// store.
pub const NULL_HASH: Hash = Hash([0; HASH_LEN]);

impl Hash {
    pub fn new(value: [u8; HASH_LEN]) -> Self {
        Self(value)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(Self(bytes.try_into().ok()?))
    }

    /// Parses the given hex string into a `Hash`.
    ///
    /// The given string must be valid. A static str is required to prevent
    /// API misuse.
    pub fn from_hex(hex: &'static str) -> Self {
        Self::try_from_hex(hex).unwrap()
    }

    /// Parses the given hex string into a `Hash`.
    pub fn try_from_hex(hex: impl AsRef<[u8]>) -> Option<Self> {
        hex_util::decode_hex(hex).and_then(|bytes| Self::from_bytes(&bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn hex(&self) -> String {
        hex_util::encode_hex(&self.0)
    }

    /// True if this is the [`NULL_HASH`] sentinel.
    pub fn is_null(&self) -> bool {
        *self == NULL_HASH
    }

    /// The two-hex-character shard bucket for sharded on-disk layouts.
    pub fn shard(&self) -> String {
        hex_util::encode_hex(&self.0[..1])
    }
}

impl Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_tuple("Hash").field(&self.hex()).finish()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.pad(&self.hex())
    }
}

impl serde::Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.hex().serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex = String::deserialize(deserializer)?;
        Self::try_from_hex(&hex)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid hash: {hex}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_hash() {
        assert!(NULL_HASH.is_null());
        assert_eq!(NULL_HASH.hex(), "0".repeat(64));
        let nonzero = Hash::from_hex(
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
        );
        assert!(!nonzero.is_null());
    }

    #[test]
    fn test_hex_roundtrip() {
        let hash = Hash::from_hex(
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
        );
        assert_eq!(Hash::try_from_hex(hash.hex()), Some(hash.clone()));
        assert_eq!(format!("{hash:.8}"), "2cf24dba");
        assert_eq!(hash.shard(), "2c");
    }

    #[test]
    fn test_bad_hex() {
        assert_eq!(Hash::try_from_hex("abcd"), None); // too short
        assert_eq!(Hash::try_from_hex("zz".repeat(32)), None);
    }

    #[test]
    fn test_serde_as_hex() {
        let hash = Hash::from_hex(
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
        );
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(
            json,
            "\"2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824\""
        );
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
