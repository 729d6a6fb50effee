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

//! HNSW persistence: one document per node plus a single system document.
//!
//! Persisting adjacency per node is what makes reopen O(N): nodes are
//! restored verbatim from their documents instead of being reinserted
//! through full construction.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::backend::Backend;
use crate::backend::BackendError;
use crate::backend::BackendResult;
use crate::backend::Deadline;
use crate::backend::list_all;
use crate::config::DistanceMetric;
use crate::config::HnswParams;
use crate::entity::FORMAT_VERSION;
use crate::entity::NounType;
use crate::entity::VectorDoc;
use crate::hnsw::graph::HnswGraph;
use crate::hnsw::graph::HnswNode;
use crate::keys::Keyspace;
use crate::keys::uuid_from_key;

/// Per-node adjacency document: `{level, connections: {layer: [neighborId…]}}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HnswNodeDoc {
    pub version: u32,
    pub id: Uuid,
    pub level: usize,
    pub connections: BTreeMap<String, Vec<Uuid>>,
}

impl HnswNodeDoc {
    pub fn from_node(id: Uuid, node: &HnswNode) -> Self {
        Self {
            version: FORMAT_VERSION,
            id,
            level: node.level,
            connections: node
                .links
                .iter()
                .enumerate()
                .map(|(layer, links)| (layer.to_string(), links.clone()))
                .collect(),
        }
    }

    /// Per-layer links, densely indexed `0..=level`.
    pub fn to_links(&self) -> Vec<Vec<Uuid>> {
        (0..=self.level)
            .map(|layer| {
                self.connections
                    .get(&layer.to_string())
                    .cloned()
                    .unwrap_or_default()
            })
            .collect()
    }
}

/// Per-type entry point recorded in the system document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HnswTypeEntry {
    pub entry_point_id: Option<Uuid>,
    pub max_level: usize,
}

/// `system/hnsw-system.json`: the global entry point and max level, plus the
/// per-type breakdown.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HnswSystemDoc {
    pub version: u32,
    pub entry_point_id: Option<Uuid>,
    pub max_level: usize,
    #[serde(default)]
    pub types: BTreeMap<String, HnswTypeEntry>,
}

impl Default for HnswSystemDoc {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            entry_point_id: None,
            max_level: 0,
            types: BTreeMap::new(),
        }
    }
}

fn parse_doc<T: serde::de::DeserializeOwned>(key: &str, bytes: &[u8]) -> BackendResult<T> {
    serde_json::from_slice(bytes).map_err(|err| BackendError::Read {
        key: key.to_string(),
        source: err.into(),
    })
}

pub async fn save_node(
    backend: &dyn Backend,
    keyspace: &Keyspace,
    noun_type: NounType,
    id: Uuid,
    node: &HnswNode,
    deadline: Deadline,
) -> BackendResult<()> {
    let doc = HnswNodeDoc::from_node(id, node);
    let bytes = serde_json::to_vec(&doc).map_err(|err| BackendError::Other(err.into()))?;
    backend
        .put(&keyspace.noun_hnsw(noun_type, &id), &bytes, deadline)
        .await
}

pub async fn delete_node(
    backend: &dyn Backend,
    keyspace: &Keyspace,
    noun_type: NounType,
    id: &Uuid,
    deadline: Deadline,
) -> BackendResult<()> {
    backend
        .delete(&keyspace.noun_hnsw(noun_type, id), deadline)
        .await
}

pub async fn load_system(
    backend: &dyn Backend,
    keyspace: &Keyspace,
    deadline: Deadline,
) -> BackendResult<HnswSystemDoc> {
    let key = keyspace.hnsw_system();
    let Some(bytes) = backend.get(&key, deadline).await? else {
        return Ok(HnswSystemDoc::default());
    };
    let doc: HnswSystemDoc = parse_doc(&key, &bytes)?;
    if doc.version > FORMAT_VERSION {
        return Err(BackendError::IncompatibleFormat {
            found: doc.version,
            supported: FORMAT_VERSION,
        });
    }
    Ok(doc)
}

pub async fn save_system(
    backend: &dyn Backend,
    keyspace: &Keyspace,
    doc: &HnswSystemDoc,
    deadline: Deadline,
) -> BackendResult<()> {
    let bytes = serde_json::to_vec(doc).map_err(|err| BackendError::Other(err.into()))?;
    backend.put(&keyspace.hnsw_system(), &bytes, deadline).await
}

/// Restores one type's subindex from its per-node documents.
///
/// Vectors come from the `vectors/` subtree, adjacency from `hnsw/`. Nodes
/// with a persisted adjacency document are restored verbatim (O(1) each);
/// nodes missing one fall back to regular insertion. Tombstoned ids are
/// skipped via `is_deleted`.
pub async fn restore_type(
    backend: &dyn Backend,
    keyspace: &Keyspace,
    noun_type: NounType,
    params: HnswParams,
    metric: DistanceMetric,
    is_deleted: &(dyn Fn(&Uuid) -> bool + Sync),
    deadline: Deadline,
) -> BackendResult<HnswGraph> {
    let mut graph = HnswGraph::new(params, metric);

    let vector_keys = list_all(backend, &keyspace.noun_vector_prefix(noun_type), deadline).await?;
    if vector_keys.is_empty() {
        return Ok(graph);
    }
    let mut node_docs: BTreeMap<Uuid, HnswNodeDoc> = BTreeMap::new();
    let hnsw_keys = list_all(backend, &keyspace.noun_hnsw_prefix(noun_type), deadline).await?;
    for (key, bytes) in hnsw_keys
        .iter()
        .zip(backend.bulk_get(&hnsw_keys, deadline).await?)
    {
        let Some(bytes) = bytes else { continue };
        let doc: HnswNodeDoc = parse_doc(key, &bytes)?;
        node_docs.insert(doc.id, doc);
    }

    let mut relinked = 0usize;
    let mut reinserted = 0usize;
    for (key, bytes) in vector_keys
        .iter()
        .zip(backend.bulk_get(&vector_keys, deadline).await?)
    {
        let Some(bytes) = bytes else { continue };
        let Some(id) = uuid_from_key(key) else { continue };
        if is_deleted(&id) {
            continue;
        }
        let doc: VectorDoc = parse_doc(key, &bytes)?;
        match node_docs.remove(&id) {
            Some(node_doc) => {
                graph.restore_node(id, doc.vector, node_doc.to_links());
                relinked += 1;
            }
            None => {
                graph.insert(id, doc.vector);
                reinserted += 1;
            }
        }
    }
    tracing::debug!(
        noun_type = noun_type.as_str(),
        relinked,
        reinserted,
        "restored hnsw subindex"
    );
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_doc_roundtrip() {
        let node = HnswNode {
            vector: vec![1.0, 2.0],
            level: 2,
            links: vec![vec![Uuid::new_v4()], vec![], vec![Uuid::new_v4(), Uuid::new_v4()]],
        };
        let id = Uuid::new_v4();
        let doc = HnswNodeDoc::from_node(id, &node);
        assert_eq!(doc.level, 2);
        assert_eq!(doc.to_links(), node.links);
    }

    #[test]
    fn test_node_doc_sparse_layers() {
        let doc = HnswNodeDoc {
            version: FORMAT_VERSION,
            id: Uuid::new_v4(),
            level: 2,
            connections: BTreeMap::from([("0".to_string(), vec![Uuid::new_v4()])]),
        };
        let links = doc.to_links();
        assert_eq!(links.len(), 3);
        assert_eq!(links[0].len(), 1);
        assert!(links[1].is_empty());
    }

    #[test]
    fn test_system_doc_default() {
        let doc = HnswSystemDoc::default();
        assert_eq!(doc.entry_point_id, None);
        assert_eq!(doc.max_level, 0);
    }
}
