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

//! Store-level configuration chosen at creation time.

use crate::blob_store::Compression;

/// Distance function used by every HNSW subindex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    Cosine,
    InnerProduct,
}

/// HNSW construction and search parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HnswParams {
    /// Neighbors kept per node per layer.
    pub m: usize,
    /// Neighbor budget at layer 0.
    pub m_max0: usize,
    /// Candidate-list width during insertion.
    pub ef_construction: usize,
    /// Default candidate-list width during search; tunable per query.
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            m_max0: 32,
            ef_construction: 100,
            ef_search: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Embedding dimension, fixed at store creation.
    pub dimensions: usize,
    pub distance: DistanceMetric,
    pub hnsw: HnswParams,
    /// Reciprocal Rank Fusion constant.
    pub rrf_k: f64,
    pub compression: Compression,
    /// Bounded flush queue; enqueue blocks when full.
    pub flush_queue_capacity: usize,
    /// Chunk size for batched metadata/vector fetches.
    pub batch_size: usize,
    /// Memory target for the shared HNSW node cache, in MiB. `None` auto-sizes
    /// from the detected container memory.
    pub node_cache_mb: Option<usize>,
    /// Overrides detected container memory when deriving query limits.
    pub memory_override_bytes: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dimensions: 384,
            distance: DistanceMetric::default(),
            hnsw: HnswParams::default(),
            rrf_k: 60.0,
            compression: Compression::None,
            flush_queue_capacity: 1024,
            batch_size: 64,
            node_cache_mb: None,
            memory_override_bytes: None,
        }
    }
}
