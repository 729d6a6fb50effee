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

//! The four-index coordinator.
//!
//! One instance holds the live in-memory indexes for one branch view: the
//! per-type HNSW subindexes, the metadata field index, the graph adjacency
//! index, and the deleted-items set, plus the id → type cache that routes
//! per-type operations. Every mutation goes through this coordinator so the
//! indexes can never drift from each other within a process.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use rayon::prelude::*;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::backend::Backend;
use crate::backend::BackendError;
use crate::backend::BackendResult;
use crate::backend::Deadline;
use crate::backend::list_all;
use crate::config::StoreConfig;
use crate::counts::CountsDoc;
use crate::deleted_index::DeletedDoc;
use crate::deleted_index::DeletedIndex;
use crate::entity::FORMAT_VERSION;
use crate::entity::MillisSinceEpoch;
use crate::entity::Noun;
use crate::entity::NounMetadataDoc;
use crate::entity::NounType;
use crate::entity::RelationDoc;
use crate::entity::Verb;
use crate::field_index::FieldIndex;
use crate::graph_index::Direction;
use crate::graph_index::GraphIndex;
use crate::graph_index::RelationsQuery;
use crate::hnsw::HnswIndexStats;
use crate::hnsw::NodeCache;
use crate::hnsw::TypedHnsw;
use crate::hnsw::load_system;
use crate::hnsw::restore_type;
use crate::keys::Keyspace;
use crate::keys::uuid_from_key;

/// Counts disagree with content, or an index is missing nodes that metadata
/// references. Triggers a rebuild, not a crash.
#[derive(Debug, Error)]
#[error("Integrity error: {0}")]
pub struct IntegrityError(pub String);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    pub nouns_restored: usize,
    pub verbs_restored: usize,
    pub types_rebuilt: usize,
    pub counts: CountsDoc,
}

#[derive(Debug)]
pub struct IndexSet {
    hnsw: TypedHnsw,
    fields: RwLock<FieldIndex>,
    graph: RwLock<GraphIndex>,
    deleted: RwLock<DeletedIndex>,
    type_cache: RwLock<HashMap<Uuid, NounType>>,
}

impl IndexSet {
    pub fn new(config: &StoreConfig, cache: Arc<NodeCache>) -> Self {
        Self {
            hnsw: TypedHnsw::new(config.hnsw, config.distance, cache),
            fields: RwLock::new(FieldIndex::default()),
            graph: RwLock::new(GraphIndex::default()),
            deleted: RwLock::new(DeletedIndex::default()),
            type_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn hnsw(&self) -> &TypedHnsw {
        &self.hnsw
    }

    /// Indexes a noun everywhere: HNSW, fields, type cache. An existing
    /// tombstone for the id is cleared (the add rewrites the entity).
    pub fn index_noun(&self, noun: &Noun) -> bool {
        let resurrected = self.deleted.write().unwrap().resurrect_noun(&noun.id);
        self.hnsw.insert(noun.noun_type, noun.id, noun.vector.clone());
        self.fields.write().unwrap().insert(noun);
        self.type_cache
            .write()
            .unwrap()
            .insert(noun.id, noun.noun_type);
        resurrected
    }

    /// Tombstones a noun and drops it from the live indexes.
    pub fn tombstone_noun(&self, noun_type: NounType, id: Uuid) {
        self.deleted.write().unwrap().tombstone_noun(id);
        self.hnsw.remove(noun_type, &id);
        self.fields.write().unwrap().remove(&id);
        self.type_cache.write().unwrap().remove(&id);
    }

    pub fn index_verb(&self, verb: &Verb) -> bool {
        let resurrected = self.deleted.write().unwrap().resurrect_verb(&verb.id);
        self.graph.write().unwrap().insert(verb);
        resurrected
    }

    pub fn tombstone_verb(&self, id: Uuid) {
        self.deleted.write().unwrap().tombstone_verb(id);
        self.graph.write().unwrap().remove(&id);
    }

    /// Drops a verb from the adjacency index without tombstoning, e.g. when
    /// its endpoint noun is deleted.
    pub fn unlink_verb(&self, id: &Uuid) {
        self.graph.write().unwrap().remove(id);
    }

    pub fn noun_type_of(&self, id: &Uuid) -> Option<NounType> {
        self.type_cache.read().unwrap().get(id).copied()
    }

    /// Remembers a noun's type observed on a read path.
    pub fn cache_noun_type(&self, id: Uuid, noun_type: NounType) {
        self.type_cache.write().unwrap().insert(id, noun_type);
    }

    pub fn is_noun_deleted(&self, id: &Uuid) -> bool {
        self.deleted.read().unwrap().is_noun_deleted(id)
    }

    pub fn is_verb_deleted(&self, id: &Uuid) -> bool {
        self.deleted.read().unwrap().is_verb_deleted(id)
    }

    pub fn deleted_doc(&self) -> DeletedDoc {
        self.deleted.read().unwrap().doc()
    }

    pub fn install_deleted(&self, doc: DeletedDoc) {
        *self.deleted.write().unwrap() = DeletedIndex::from_doc(doc);
    }

    pub fn eval_where(&self, clause: &Value) -> BackendResult<Vec<Uuid>> {
        let matched = self.fields.read().unwrap().eval(clause)?;
        Ok(matched
            .into_iter()
            .filter(|id| !self.is_noun_deleted(id))
            .collect())
    }

    pub fn relations(&self, query: RelationsQuery) -> Vec<Uuid> {
        // Lock order: deleted before graph, matching the mutation paths.
        let deleted = self.deleted.read().unwrap();
        let graph = self.graph.read().unwrap();
        graph
            .relations(query)
            .into_iter()
            .filter(|id| !deleted.is_verb_deleted(id))
            .collect()
    }

    pub fn bfs(
        &self,
        start: Uuid,
        max_depth: usize,
        direction: Direction,
        verb_type: Option<crate::entity::VerbType>,
    ) -> Vec<(Uuid, usize)> {
        let result = self
            .graph
            .read()
            .unwrap()
            .bfs(start, max_depth, direction, verb_type);
        let deleted = self.deleted.read().unwrap();
        result
            .into_iter()
            .filter(|(id, _)| !deleted.is_noun_deleted(id))
            .collect()
    }

    pub fn verb_endpoints(&self, verb_id: &Uuid) -> Option<(Uuid, Uuid)> {
        self.graph.read().unwrap().endpoints(verb_id)
    }

    /// All live noun ids, in type-cache iteration order made deterministic by
    /// sorting.
    pub fn all_noun_ids(&self) -> Vec<Uuid> {
        let deleted = self.deleted.read().unwrap();
        let type_cache = self.type_cache.read().unwrap();
        let mut ids: Vec<Uuid> = type_cache
            .keys()
            .filter(|id| !deleted.is_noun_deleted(id))
            .copied()
            .collect();
        ids.sort();
        ids
    }

    pub fn noun_count(&self) -> usize {
        self.fields.read().unwrap().len()
    }

    pub fn verb_count(&self) -> usize {
        self.graph.read().unwrap().len()
    }

    pub fn hnsw_stats(&self) -> HnswIndexStats {
        self.hnsw.stats()
    }

    pub fn clear(&self) {
        self.hnsw.clear();
        self.fields.write().unwrap().clear();
        self.graph.write().unwrap().clear();
        self.deleted.write().unwrap().clear();
        self.type_cache.write().unwrap().clear();
    }

    /// Counts recomputed from the live indexes, for comparison against the
    /// persisted counts document.
    pub fn computed_counts(&self) -> CountsDoc {
        let deleted = self.deleted.read().unwrap();
        let type_cache = self.type_cache.read().unwrap();
        let mut entity_counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut total_nouns = 0u64;
        for (id, noun_type) in type_cache.iter() {
            if deleted.is_noun_deleted(id) {
                continue;
            }
            total_nouns += 1;
            *entity_counts
                .entry(noun_type.as_str().to_string())
                .or_default() += 1;
        }
        let graph = self.graph.read().unwrap();
        let mut verb_counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut total_verbs = 0u64;
        for (verb_id, verb_type) in graph.verb_entries() {
            if deleted.is_verb_deleted(&verb_id) {
                continue;
            }
            total_verbs += 1;
            *verb_counts
                .entry(verb_type.as_str().to_string())
                .or_default() += 1;
        }
        drop(graph);
        CountsDoc {
            version: FORMAT_VERSION,
            total_noun_count: total_nouns,
            total_verb_count: total_verbs,
            entity_counts,
            verb_counts,
            last_updated: MillisSinceEpoch::now(),
        }
    }

    /// The rebuild-on-open protocol.
    ///
    /// For each type whose subindex is empty while its metadata shard is
    /// non-empty, nodes are restored in parallel across types from per-node
    /// documents (O(N) reload). The field index, adjacency index, type cache,
    /// and tombstone set are rebuilt alongside.
    pub fn rebuild(
        &self,
        backend: &dyn Backend,
        keyspace: &Keyspace,
        config: &StoreConfig,
        deadline: Deadline,
    ) -> BackendResult<RebuildReport> {
        use pollster::FutureExt as _;

        let mut report = RebuildReport::default();

        // Restore per-type subindexes in parallel, then install serially.
        let restored: Vec<(NounType, crate::hnsw::HnswGraph)> = NounType::ALL
            .par_iter()
            .map(|noun_type| {
                let needs_rebuild = self.hnsw.len_for_type(*noun_type) == 0;
                if !needs_rebuild {
                    return Ok(None);
                }
                let graph = restore_type(
                    backend,
                    keyspace,
                    *noun_type,
                    config.hnsw,
                    config.distance,
                    &|id| self.is_noun_deleted(id),
                    deadline,
                )
                .block_on()?;
                Ok((!graph.is_empty()).then_some((*noun_type, graph)))
            })
            .collect::<BackendResult<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();
        for (noun_type, graph) in restored {
            report.types_rebuilt += 1;
            self.hnsw.install(noun_type, graph);
        }

        // Metadata documents rebuild the field index and type cache, and
        // recompute per-type counts.
        let mut entity_counts: BTreeMap<String, u64> = BTreeMap::new();
        for noun_type in NounType::ALL {
            let keys =
                list_all(backend, &keyspace.noun_metadata_prefix(noun_type), deadline).block_on()?;
            if keys.is_empty() {
                continue;
            }
            let docs = backend.bulk_get(&keys, deadline).block_on()?;
            let mut fields = self.fields.write().unwrap();
            let mut type_cache = self.type_cache.write().unwrap();
            for (key, bytes) in keys.iter().zip(docs) {
                let Some(bytes) = bytes else { continue };
                let doc: NounMetadataDoc =
                    serde_json::from_slice(&bytes).map_err(|err| BackendError::Read {
                        key: key.clone(),
                        source: err.into(),
                    })?;
                if doc.version > FORMAT_VERSION {
                    return Err(BackendError::IncompatibleFormat {
                        found: doc.version,
                        supported: FORMAT_VERSION,
                    });
                }
                if self.is_noun_deleted(&doc.id) {
                    continue;
                }
                let vector = self
                    .hnsw
                    .vector(noun_type, &doc.id)
                    .map(|vector| vector.as_ref().clone())
                    .unwrap_or_default();
                let noun = Noun::from_docs(doc, crate::entity::VectorDoc {
                    version: FORMAT_VERSION,
                    id: uuid_from_key(key).unwrap_or_default(),
                    vector,
                });
                *entity_counts
                    .entry(noun.noun_type.as_str().to_string())
                    .or_default() += 1;
                type_cache.insert(noun.id, noun.noun_type);
                fields.insert(&noun);
                report.nouns_restored += 1;
            }
        }

        // Relation documents rebuild the adjacency index in both directions.
        let mut verb_counts: BTreeMap<String, u64> = BTreeMap::new();
        let relation_keys = list_all(backend, &keyspace.relations_prefix(), deadline).block_on()?;
        if !relation_keys.is_empty() {
            let docs = backend.bulk_get(&relation_keys, deadline).block_on()?;
            let mut graph = self.graph.write().unwrap();
            for (key, bytes) in relation_keys.iter().zip(docs) {
                let Some(bytes) = bytes else { continue };
                let doc: RelationDoc =
                    serde_json::from_slice(&bytes).map_err(|err| BackendError::Read {
                        key: key.clone(),
                        source: err.into(),
                    })?;
                if self.is_verb_deleted(&doc.id) {
                    continue;
                }
                *verb_counts
                    .entry(doc.verb.as_str().to_string())
                    .or_default() += 1;
                graph.insert(&Verb::from_relation_doc(doc));
                report.verbs_restored += 1;
            }
        }

        // Entry points from the persisted system document win over the
        // restore's own guess.
        let system = load_system(backend, keyspace, deadline).block_on()?;
        self.hnsw.apply_system_doc(&system);

        report.counts = CountsDoc {
            version: FORMAT_VERSION,
            total_noun_count: report.nouns_restored as u64,
            total_verb_count: report.verbs_restored as u64,
            entity_counts,
            verb_counts,
            last_updated: MillisSinceEpoch::now(),
        };
        tracing::info!(
            nouns = report.nouns_restored,
            verbs = report.verbs_restored,
            types = report.types_rebuilt,
            "index rebuild complete"
        );
        Ok(report)
    }

    /// Every noun blob must be represented in exactly one per-type subindex
    /// and in the metadata index.
    pub fn check_integrity(&self) -> Result<(), IntegrityError> {
        let deleted = self.deleted.read().unwrap();
        let fields = self.fields.read().unwrap();
        let type_cache = self.type_cache.read().unwrap();
        for (id, noun_type) in type_cache.iter() {
            if deleted.is_noun_deleted(id) {
                continue;
            }
            if !fields.contains(id) {
                return Err(IntegrityError(format!(
                    "noun {id} missing from the metadata index"
                )));
            }
            if self.hnsw.node_snapshot(*noun_type, id).is_none() {
                return Err(IntegrityError(format!(
                    "noun {id} missing from the {noun_type} vector subindex"
                )));
            }
        }
        Ok(())
    }
}
