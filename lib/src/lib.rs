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

//! Embeddable knowledge-graph and vector store.
//!
//! Typed nouns (vertices carrying a dense embedding and arbitrary metadata)
//! and verbs (typed edges) persist through a content-addressed copy-on-write
//! object layer shaped like Git: blobs, trees, commits, and named refs.
//! Four in-memory indexes — per-type HNSW, metadata fields, graph adjacency,
//! and tombstones — serve a unified query surface that fuses vector
//! similarity, graph traversal, and field predicates with Reciprocal Rank
//! Fusion.
//!
//! The entry point is [`repo::Repo`]:
//!
//! ```no_run
//! use brainy_lib::config::StoreConfig;
//! use brainy_lib::entity::NounType;
//! use brainy_lib::repo::AddInput;
//! use brainy_lib::repo::Repo;
//!
//! # fn main() -> Result<(), brainy_lib::store::StoreError> {
//! let repo = Repo::in_memory(StoreConfig::default())?;
//! let id = repo.add(AddInput {
//!     noun_type: Some(NounType::Document),
//!     text: Some("quarterly report".to_string()),
//!     ..Default::default()
//! })?;
//! assert!(repo.get(&id)?.is_some());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod batch;
pub mod blob_store;
pub mod commit;
pub mod config;
pub mod content_hash;
pub mod counts;
pub mod deleted_index;
pub mod embed;
pub mod entity;
pub mod field_index;
pub mod file_util;
pub mod fs_backend;
pub mod graph_index;
pub mod hex_util;
pub mod hnsw;
pub mod index;
pub mod keys;
pub mod mem_backend;
pub mod memory;
pub mod migrate;
pub mod object_id;
pub mod query;
pub mod refs;
pub mod repo;
pub mod stats;
pub mod store;
pub mod throttle;
pub mod tree;
pub mod versioning;
pub mod write_cache;
