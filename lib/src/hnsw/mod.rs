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

//! Type-aware HNSW: one subindex per noun type behind a shared node cache.
//!
//! An HNSW node belongs to exactly one per-type subindex. Single-type queries
//! go straight to that subindex; multi-type and untyped queries fan out
//! across subindexes in parallel and merge by distance.

mod graph;
mod store;

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use clru::CLruCache;
use clru::CLruCacheConfig;
use clru::WeightScale;
use rayon::prelude::*;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

pub use self::graph::HnswGraph;
pub use self::graph::HnswNode;
pub use self::graph::distance;
pub use self::store::HnswNodeDoc;
pub use self::store::HnswSystemDoc;
pub use self::store::HnswTypeEntry;
pub use self::store::delete_node;
pub use self::store::load_system;
pub use self::store::restore_type;
pub use self::store::save_node;
pub use self::store::save_system;
use crate::config::DistanceMetric;
use crate::config::HnswParams;
use crate::entity::NounType;

const MIB: usize = 1024 * 1024;

#[derive(Debug, Default)]
struct VectorScale;

impl WeightScale<Uuid, Arc<Vec<f32>>> for VectorScale {
    fn weight(&self, _key: &Uuid, value: &Arc<Vec<f32>>) -> usize {
        value.len() * size_of::<f32>()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity_mb: usize,
}

/// Vector payload cache shared by every subindex, bounded by a memory target
/// in bytes rather than an entry count.
#[derive(Debug)]
pub struct NodeCache {
    inner: Mutex<CLruCache<Uuid, Arc<Vec<f32>>, std::hash::RandomState, VectorScale>>,
    capacity_mb: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl NodeCache {
    pub fn new(capacity_mb: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity_mb.max(1) * MIB).unwrap();
        Self {
            inner: Mutex::new(CLruCache::with_config(
                CLruCacheConfig::new(capacity).with_scale(VectorScale),
            )),
            capacity_mb: capacity_mb.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Vec<f32>>> {
        let found = self.inner.lock().unwrap().get(id).cloned();
        match &found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn put(&self, id: Uuid, vector: Arc<Vec<f32>>) {
        // A vector heavier than the whole cache is simply not cached.
        let _ = self.inner.lock().unwrap().put_with_weight(id, vector);
    }

    pub fn forget(&self, id: &Uuid) {
        self.inner.lock().unwrap().pop(id);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.inner.lock().unwrap().len(),
            capacity_mb: self.capacity_mb,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubindexStats {
    pub node_count: usize,
    pub memory_mb: u64,
    pub max_level: usize,
    pub cache: CacheStats,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HnswIndexStats {
    pub total_nodes: usize,
    pub type_count: usize,
    pub estimated_monolithic_memory_mb: u64,
    pub total_memory_mb: u64,
    pub memory_reduction_percent: f64,
    pub per_type: BTreeMap<String, SubindexStats>,
}

/// The `type → subindex` coordinator.
#[derive(Debug)]
pub struct TypedHnsw {
    params: HnswParams,
    metric: DistanceMetric,
    indexes: RwLock<HashMap<NounType, HnswGraph>>,
    cache: Arc<NodeCache>,
}

impl TypedHnsw {
    pub fn new(params: HnswParams, metric: DistanceMetric, cache: Arc<NodeCache>) -> Self {
        Self {
            params,
            metric,
            indexes: RwLock::new(HashMap::new()),
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<NodeCache> {
        &self.cache
    }

    pub fn insert(&self, noun_type: NounType, id: Uuid, vector: Vec<f32>) {
        self.cache.put(id, Arc::new(vector.clone()));
        let mut indexes = self.indexes.write().unwrap();
        indexes
            .entry(noun_type)
            .or_insert_with(|| HnswGraph::new(self.params, self.metric))
            .insert(id, vector);
    }

    pub fn remove(&self, noun_type: NounType, id: &Uuid) -> bool {
        self.cache.forget(id);
        let mut indexes = self.indexes.write().unwrap();
        indexes
            .get_mut(&noun_type)
            .is_some_and(|graph| graph.remove(id))
    }

    /// The stored vector for `id`, via the shared cache.
    pub fn vector(&self, noun_type: NounType, id: &Uuid) -> Option<Arc<Vec<f32>>> {
        if let Some(vector) = self.cache.get(id) {
            return Some(vector);
        }
        let indexes = self.indexes.read().unwrap();
        let vector = Arc::new(indexes.get(&noun_type)?.vector(id)?.to_vec());
        self.cache.put(*id, vector.clone());
        Some(vector)
    }

    /// A clone of the node's current state, for persistence.
    pub fn node_snapshot(&self, noun_type: NounType, id: &Uuid) -> Option<HnswNode> {
        let indexes = self.indexes.read().unwrap();
        indexes.get(&noun_type)?.node(id).cloned()
    }

    /// Every node of one type whose adjacency should be persisted. Inserting
    /// one node rewires its neighbors, so neighbors are persisted with it.
    pub fn affected_nodes(&self, noun_type: NounType, id: &Uuid) -> Vec<(Uuid, HnswNode)> {
        let indexes = self.indexes.read().unwrap();
        let Some(graph) = indexes.get(&noun_type) else {
            return vec![];
        };
        let Some(node) = graph.node(id) else {
            return vec![];
        };
        let mut out = vec![(*id, node.clone())];
        for neighbor in node.links.iter().flatten() {
            if let Some(neighbor_node) = graph.node(neighbor) {
                out.push((*neighbor, neighbor_node.clone()));
            }
        }
        out
    }

    pub fn search_single(
        &self,
        noun_type: NounType,
        query: &[f32],
        k: usize,
        ef: Option<usize>,
    ) -> Vec<(Uuid, f32)> {
        let indexes = self.indexes.read().unwrap();
        indexes
            .get(&noun_type)
            .map(|graph| graph.search(query, k, ef))
            .unwrap_or_default()
    }

    /// Searches the given subindexes (or every active one) in parallel and
    /// merges by distance, ties by id.
    pub fn search(
        &self,
        types: Option<&[NounType]>,
        query: &[f32],
        k: usize,
        ef: Option<usize>,
    ) -> Vec<(Uuid, f32)> {
        if let Some([single]) = types {
            return self.search_single(*single, query, k, ef);
        }
        let indexes = self.indexes.read().unwrap();
        let targets: Vec<&HnswGraph> = match types {
            Some(types) => types.iter().filter_map(|t| indexes.get(t)).collect(),
            None => indexes.values().collect(),
        };
        let mut merged: Vec<(Uuid, f32)> = targets
            .par_iter()
            .flat_map_iter(|graph| graph.search(query, k, ef))
            .collect();
        merged.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        merged.truncate(k);
        merged
    }

    pub fn active_types(&self) -> Vec<NounType> {
        let indexes = self.indexes.read().unwrap();
        let mut types: Vec<NounType> = indexes
            .iter()
            .filter(|(_, graph)| !graph.is_empty())
            .map(|(t, _)| *t)
            .collect();
        types.sort();
        types
    }

    pub fn len_for_type(&self, noun_type: NounType) -> usize {
        let indexes = self.indexes.read().unwrap();
        indexes.get(&noun_type).map_or(0, HnswGraph::len)
    }

    pub fn total_nodes(&self) -> usize {
        let indexes = self.indexes.read().unwrap();
        indexes.values().map(HnswGraph::len).sum()
    }

    pub fn clear_type(&self, noun_type: NounType) {
        self.indexes.write().unwrap().remove(&noun_type);
    }

    pub fn clear(&self) {
        self.indexes.write().unwrap().clear();
    }

    /// Replaces one type's subindex wholesale, e.g. after a restore.
    pub fn install(&self, noun_type: NounType, graph: HnswGraph) {
        self.indexes.write().unwrap().insert(noun_type, graph);
    }

    /// Ids present in one subindex. For integrity checks.
    pub fn ids_for_type(&self, noun_type: NounType) -> Vec<Uuid> {
        let indexes = self.indexes.read().unwrap();
        indexes
            .get(&noun_type)
            .map(|graph| graph.ids().copied().collect())
            .unwrap_or_default()
    }

    /// The persisted system document: global entry point (the deepest
    /// subindex's) and the per-type breakdown.
    pub fn system_doc(&self) -> HnswSystemDoc {
        let indexes = self.indexes.read().unwrap();
        let mut doc = HnswSystemDoc::default();
        for (noun_type, graph) in indexes.iter() {
            if graph.is_empty() {
                continue;
            }
            doc.types.insert(
                noun_type.as_str().to_string(),
                HnswTypeEntry {
                    entry_point_id: graph.entry_point(),
                    max_level: graph.max_level(),
                },
            );
            if graph.max_level() >= doc.max_level {
                doc.max_level = graph.max_level();
                doc.entry_point_id = graph.entry_point();
            }
        }
        doc
    }

    pub fn apply_system_doc(&self, doc: &HnswSystemDoc) {
        let mut indexes = self.indexes.write().unwrap();
        for (type_tag, entry) in &doc.types {
            let Some(noun_type) = NounType::parse(type_tag) else {
                continue;
            };
            if let Some(graph) = indexes.get_mut(&noun_type) {
                graph.set_entry(entry.entry_point_id, entry.max_level);
            }
        }
    }

    pub fn stats(&self) -> HnswIndexStats {
        let indexes = self.indexes.read().unwrap();
        let cache_stats = self.cache.stats();
        let mut per_type = BTreeMap::new();
        let mut total_nodes = 0usize;
        let mut total_bytes = 0usize;
        let mut total_vector_bytes = 0usize;
        for (noun_type, graph) in indexes.iter() {
            if graph.is_empty() {
                continue;
            }
            let bytes = graph.memory_bytes();
            total_nodes += graph.len();
            total_bytes += bytes;
            total_vector_bytes += graph
                .ids()
                .filter_map(|id| graph.vector(id))
                .map(|vector| vector.len() * size_of::<f32>())
                .sum::<usize>();
            per_type.insert(
                noun_type.as_str().to_string(),
                SubindexStats {
                    node_count: graph.len(),
                    memory_mb: bytes.div_ceil(MIB) as u64,
                    max_level: graph.max_level(),
                    cache: cache_stats.clone(),
                },
            );
        }
        // A monolithic index would carry the same vectors but a full link
        // budget per node across one deep hierarchy.
        let link_budget = (self.params.m_max0 + 2 * self.params.m) * size_of::<Uuid>();
        let monolithic_bytes = total_vector_bytes + total_nodes * (link_budget + 64);
        let reduction = if monolithic_bytes > 0 {
            (1.0 - total_bytes as f64 / monolithic_bytes as f64) * 100.0
        } else {
            0.0
        };
        HnswIndexStats {
            total_nodes,
            type_count: per_type.len(),
            estimated_monolithic_memory_mb: monolithic_bytes.div_ceil(MIB) as u64,
            total_memory_mb: total_bytes.div_ceil(MIB) as u64,
            memory_reduction_percent: reduction.max(0.0),
            per_type,
        }
    }
}
