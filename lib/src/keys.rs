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

//! Adapter key layout.
//!
//! Entity keys are type-first and UUID-sharded: the two leading hex characters
//! of the uuid spread writes across 256 buckets and bound directory size.
//! Metadata and vector documents live in separate subtrees so vectors can be
//! fetched in bulk without paying metadata I/O.
//!
//! Ref documents and content-addressed blobs are global (shared by every
//! branch); everything else is scoped to a branch overlay. Branch `main` owns
//! the root keyspace, forked branches write under `_branches/<name>/`.

use uuid::Uuid;

use crate::entity::NounType;
use crate::entity::VerbType;
use crate::entity::uuid_shard;
use crate::object_id::Hash;

pub const MAIN_BRANCH: &str = "main";

/// Global key of a ref document (gzipped JSON).
pub fn ref_key(full_name: &str) -> String {
    format!("_cow/ref:{full_name}.gz")
}

/// Prefix under which every branch-head ref document lives.
pub const REF_HEADS_PREFIX: &str = "_cow/ref:refs/heads/";

/// Global key of a content-addressed blob, sharded by the first two hex
/// characters of the hash.
pub fn blob_key(hash: &Hash) -> String {
    format!("_cow/blobs/{}/{}", hash.shard(), hash.hex())
}

/// A branch overlay's view of the non-global keyspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    prefix: String,
}

impl Keyspace {
    pub fn for_branch(branch: &str) -> Self {
        let prefix = if branch == MAIN_BRANCH {
            String::new()
        } else {
            format!("_branches/{branch}/")
        };
        Self { prefix }
    }

    /// The overlay prefix; empty for `main`. Doubles as the scope key for
    /// the write-through cache.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn noun_metadata(&self, noun_type: NounType, id: &Uuid) -> String {
        format!(
            "{}entities/nouns/{}/metadata/{}/{}.json",
            self.prefix,
            noun_type.as_str(),
            uuid_shard(id),
            id
        )
    }

    pub fn noun_vector(&self, noun_type: NounType, id: &Uuid) -> String {
        format!(
            "{}entities/nouns/{}/vectors/{}/{}.json",
            self.prefix,
            noun_type.as_str(),
            uuid_shard(id),
            id
        )
    }

    pub fn noun_hnsw(&self, noun_type: NounType, id: &Uuid) -> String {
        format!(
            "{}entities/nouns/{}/hnsw/{}/{}.json",
            self.prefix,
            noun_type.as_str(),
            uuid_shard(id),
            id
        )
    }

    pub fn noun_metadata_prefix(&self, noun_type: NounType) -> String {
        format!("{}entities/nouns/{}/metadata/", self.prefix, noun_type.as_str())
    }

    pub fn noun_vector_prefix(&self, noun_type: NounType) -> String {
        format!("{}entities/nouns/{}/vectors/", self.prefix, noun_type.as_str())
    }

    pub fn noun_hnsw_prefix(&self, noun_type: NounType) -> String {
        format!("{}entities/nouns/{}/hnsw/", self.prefix, noun_type.as_str())
    }

    pub fn verb_metadata(&self, verb_type: VerbType, id: &Uuid) -> String {
        format!(
            "{}entities/verbs/{}/metadata/{}/{}.json",
            self.prefix,
            verb_type.as_str(),
            uuid_shard(id),
            id
        )
    }

    pub fn relation(&self, id: &Uuid) -> String {
        format!("{}relations/{}/{}.json", self.prefix, uuid_shard(id), id)
    }

    pub fn relations_prefix(&self) -> String {
        format!("{}relations/", self.prefix)
    }

    pub fn versions(&self, id: &Uuid) -> String {
        format!("{}_versions/{}/{}.json", self.prefix, uuid_shard(id), id)
    }

    pub fn hnsw_system(&self) -> String {
        format!("{}system/hnsw-system.json", self.prefix)
    }

    pub fn counts(&self) -> String {
        format!("{}system/counts.json", self.prefix)
    }

    pub fn statistics(&self) -> String {
        format!("{}system/statistics.json", self.prefix)
    }

    pub fn deleted(&self) -> String {
        format!("{}system/deleted.json", self.prefix)
    }

    pub fn migrations(&self) -> String {
        format!("{}system/migrations.json", self.prefix)
    }
}

/// Extracts the uuid from an entity key of the form `…/<shard>/<uuid>.json`.
pub fn uuid_from_key(key: &str) -> Option<Uuid> {
    let file = key.rsplit('/').next()?;
    let stem = file.strip_suffix(".json")?;
    Uuid::parse_str(stem).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_id() -> Uuid {
        Uuid::parse_str("abcdef00-0000-4000-8000-000000000000").unwrap()
    }

    #[test]
    fn test_main_branch_owns_root_keyspace() {
        let keys = Keyspace::for_branch(MAIN_BRANCH);
        assert_eq!(
            keys.noun_metadata(NounType::Person, &test_id()),
            "entities/nouns/person/metadata/ab/abcdef00-0000-4000-8000-000000000000.json"
        );
        assert_eq!(keys.counts(), "system/counts.json");
    }

    #[test]
    fn test_fork_overlay_prefix() {
        let keys = Keyspace::for_branch("experiment");
        assert_eq!(
            keys.relation(&test_id()),
            "_branches/experiment/relations/ab/abcdef00-0000-4000-8000-000000000000.json"
        );
    }

    #[test]
    fn test_ref_and_blob_keys_are_global() {
        assert_eq!(ref_key("refs/heads/main"), "_cow/ref:refs/heads/main.gz");
        let hash = Hash::from_hex(
            "abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789",
        );
        assert_eq!(
            blob_key(&hash),
            format!("_cow/blobs/ab/{}", hash.hex())
        );
    }

    #[test]
    fn test_uuid_from_key() {
        let keys = Keyspace::for_branch(MAIN_BRANCH);
        let key = keys.noun_metadata(NounType::Thing, &test_id());
        assert_eq!(uuid_from_key(&key), Some(test_id()));
        assert_eq!(uuid_from_key("system/counts.json"), None);
    }
}
