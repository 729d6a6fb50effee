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

//! Batched reads: fan ids out to one bulk metadata fetch per type and fan
//! the documents back in, COW-aware.

use std::collections::HashMap;

use pollster::FutureExt as _;
use uuid::Uuid;

use crate::backend::Deadline;
use crate::entity::FORMAT_VERSION;
use crate::entity::Noun;
use crate::entity::NounMetadataDoc;
use crate::entity::NounType;
use crate::entity::VectorDoc;
use crate::repo::Repo;
use crate::store::StoreResult;
use crate::store::ensure_version;

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchGetOptions {
    /// Also fetch embedding documents. Off by default: most batch readers
    /// only need metadata, and vectors double the I/O.
    pub include_vectors: bool,
}

impl Repo {
    /// Resolves many ids in `O(ceil(N / batch_size))` round trips per type
    /// rather than `O(N)`.
    ///
    /// Missing ids are silently dropped, duplicates collapse to one entry,
    /// and empty input returns an empty map. Dirty entities come from the
    /// write-through cache; ids absent from the current overlay inherit from
    /// the branch's frozen base state.
    pub fn batch_get(
        &self,
        ids: &[Uuid],
        options: BatchGetOptions,
    ) -> StoreResult<HashMap<Uuid, Noun>> {
        self.store().stats().record_operation("batch_get");
        let mut result: HashMap<Uuid, Noun> = HashMap::new();
        if ids.is_empty() {
            return Ok(result);
        }

        // Dedup, drop tombstones, and serve cache hits first.
        let mut by_type: HashMap<NounType, Vec<Uuid>> = HashMap::new();
        let mut untyped: Vec<Uuid> = vec![];
        for id in ids {
            if result.contains_key(id)
                || by_type.values().any(|pending| pending.contains(id))
                || untyped.contains(id)
            {
                continue;
            }
            if self.indexes().is_noun_deleted(id) {
                continue;
            }
            if let Some(noun) = self.store().cache().noun(self.keyspace().prefix(), id) {
                self.store().stats().record_cache_hit();
                result.insert(*id, noun.as_ref().clone());
                continue;
            }
            match self.indexes().noun_type_of(id) {
                Some(noun_type) => by_type.entry(noun_type).or_default().push(*id),
                None => untyped.push(*id),
            }
        }

        let batch_size = self.config().batch_size.max(1);
        for (noun_type, pending) in by_type {
            for chunk in pending.chunks(batch_size) {
                let metadata_keys: Vec<String> = chunk
                    .iter()
                    .map(|id| self.keyspace().noun_metadata(noun_type, id))
                    .collect();
                let metadata_docs = self
                    .store()
                    .backend()
                    .bulk_get(&metadata_keys, Deadline::NONE)
                    .block_on()?;
                let vector_docs = if options.include_vectors {
                    let vector_keys: Vec<String> = chunk
                        .iter()
                        .map(|id| self.keyspace().noun_vector(noun_type, id))
                        .collect();
                    self.store()
                        .backend()
                        .bulk_get(&vector_keys, Deadline::NONE)
                        .block_on()?
                } else {
                    vec![None; chunk.len()]
                };
                for ((id, metadata_bytes), vector_bytes) in
                    chunk.iter().zip(metadata_docs).zip(vector_docs)
                {
                    let Some(metadata_bytes) = metadata_bytes else {
                        // Not on this overlay; inherit from the base below.
                        untyped.push(*id);
                        continue;
                    };
                    let metadata: NounMetadataDoc = serde_json::from_slice(&metadata_bytes)
                        .map_err(|err| crate::backend::BackendError::Read {
                            key: self.keyspace().noun_metadata(noun_type, id),
                            source: err.into(),
                        })?;
                    ensure_version(metadata.version)?;
                    let vector = match vector_bytes {
                        Some(bytes) => serde_json::from_slice(&bytes).map_err(|err| {
                            crate::backend::BackendError::Read {
                                key: self.keyspace().noun_vector(noun_type, id),
                                source: err.into(),
                            }
                        })?,
                        None => VectorDoc {
                            version: FORMAT_VERSION,
                            id: *id,
                            vector: vec![],
                        },
                    };
                    result.insert(*id, Noun::from_docs(metadata, vector));
                }
            }
        }

        // Unknown types and overlay misses resolve one by one through the
        // full read path (type probing plus base inheritance).
        for id in untyped {
            if let Some(noun) = self.get(&id)? {
                result.insert(id, noun);
            }
        }
        Ok(result)
    }
}
