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

//! The unified query engine.
//!
//! A find dispatches each provided dimension — vector similarity, graph
//! traversal, field predicates — to its index, normalizes each ranked list
//! with reciprocal-rank scores, and fuses by summing per-list scores.
//! Identical inputs produce identical output ordering, scores included.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::backend::BackendError;
use crate::backend::BackendResult;
use crate::config::StoreConfig;
use crate::embed::Embedder;
use crate::entity::NounType;
use crate::entity::VerbType;
use crate::graph_index::Direction;
use crate::index::IndexSet;

/// Graph dimension of a find: BFS from `from` up to `max_depth` hops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectedQuery {
    pub from: Uuid,
    pub max_depth: usize,
    pub direction: Direction,
    pub verb_type: Option<VerbType>,
}

impl ConnectedQuery {
    pub fn from(from: Uuid) -> Self {
        Self {
            from,
            max_depth: 1,
            direction: Direction::Both,
            verb_type: None,
        }
    }
}

/// Restricts which dimensions are dispatched. The default fuses everything
/// the query provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    #[default]
    Combined,
    VectorOnly,
    GraphOnly,
    FieldOnly,
}

#[derive(Debug, Clone, Default)]
pub struct FindQuery {
    /// Text to embed for the vector dimension.
    pub query: Option<String>,
    /// Explicit query vector; takes precedence over `query` text.
    pub vector: Option<Vec<f32>>,
    pub connected: Option<ConnectedQuery>,
    pub where_clause: Option<Value>,
    /// Restrict to these noun types. `None` searches every active subindex.
    pub types: Option<Vec<NounType>>,
    /// Defaults to 10 when zero; always clamped to the store's
    /// `max_query_limit`.
    pub limit: usize,
    pub ef_search: Option<usize>,
    pub search_mode: SearchMode,
    /// When true, entities marked as virtual-file-system internals
    /// (`metadata.vfs == true`) are masked from results.
    pub exclude_vfs: bool,
}

pub const DEFAULT_FIND_LIMIT: usize = 10;

/// Which dimensions contributed a candidate.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchDimension {
    Vector,
    Graph,
    Field,
}

/// A fused candidate, before entity hydration.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedMatch {
    pub id: Uuid,
    pub score: f64,
    pub search_types: Vec<SearchDimension>,
}

fn rrf_scores(ids: &[Uuid], rrf_k: f64) -> impl Iterator<Item = (Uuid, f64)> + '_ {
    ids.iter()
        .enumerate()
        .map(move |(rank, id)| (*id, 1.0 / (rrf_k + (rank + 1) as f64)))
}

/// Evaluates a find against the live indexes and fuses the per-dimension
/// lists with Reciprocal Rank Fusion.
pub fn evaluate(
    indexes: &IndexSet,
    config: &StoreConfig,
    embedder: &dyn Embedder,
    max_query_limit: usize,
    find: &FindQuery,
) -> BackendResult<Vec<RankedMatch>> {
    let limit = match find.limit {
        0 => DEFAULT_FIND_LIMIT,
        limit => limit,
    }
    .min(max_query_limit);

    let mode = find.search_mode;
    let want = |dimension: SearchDimension| match (mode, dimension) {
        (SearchMode::Combined, _) => true,
        (SearchMode::VectorOnly, SearchDimension::Vector) => true,
        (SearchMode::GraphOnly, SearchDimension::Graph) => true,
        (SearchMode::FieldOnly, SearchDimension::Field) => true,
        _ => false,
    };

    // Vector dimension.
    let mut vector_list: Option<Vec<Uuid>> = None;
    if want(SearchDimension::Vector) {
        let query_vector = match (&find.vector, &find.query) {
            (Some(vector), _) => {
                if vector.len() != config.dimensions {
                    return Err(BackendError::InvalidArgument(format!(
                        "query vector has {} dimensions, the store holds {}",
                        vector.len(),
                        config.dimensions
                    )));
                }
                Some(vector.clone())
            }
            (None, Some(text)) => Some(embedder.embed(text)),
            (None, None) => None,
        };
        if let Some(query_vector) = query_vector {
            let hits = indexes.hnsw().search(
                find.types.as_deref(),
                &query_vector,
                limit,
                find.ef_search,
            );
            vector_list = Some(hits.into_iter().map(|(id, _)| id).collect());
        }
    }

    // Graph dimension: ranked by BFS depth, then insertion order.
    let mut graph_list: Option<Vec<Uuid>> = None;
    if want(SearchDimension::Graph)
        && let Some(connected) = &find.connected
    {
        let visited = indexes.bfs(
            connected.from,
            connected.max_depth.max(1),
            connected.direction,
            connected.verb_type,
        );
        graph_list = Some(visited.into_iter().map(|(id, _)| id).collect());
    }

    // Field dimension: deterministic ascending-id order.
    let mut field_list: Option<Vec<Uuid>> = None;
    if want(SearchDimension::Field)
        && let Some(clause) = &find.where_clause
    {
        field_list = Some(indexes.eval_where(clause)?);
    }

    let dimensions: Vec<(SearchDimension, &Vec<Uuid>)> = [
        (SearchDimension::Vector, vector_list.as_ref()),
        (SearchDimension::Graph, graph_list.as_ref()),
        (SearchDimension::Field, field_list.as_ref()),
    ]
    .into_iter()
    .filter_map(|(dimension, list)| list.map(|list| (dimension, list)))
    .collect();

    if dimensions.is_empty() {
        // No signal at all: arbitrary-but-deterministic entities up to limit.
        return Ok(browse(indexes, find, limit));
    }
    // A single empty signal means an empty result, not a full browse.
    let mut fused: indexmap::IndexMap<Uuid, RankedMatch> = indexmap::IndexMap::new();
    for (dimension, list) in &dimensions {
        for (id, score) in rrf_scores(list, config.rrf_k) {
            let entry = fused.entry(id).or_insert_with(|| RankedMatch {
                id,
                score: 0.0,
                search_types: vec![],
            });
            entry.score += score;
            if !entry.search_types.contains(dimension) {
                entry.search_types.push(*dimension);
            }
        }
    }

    let mut results: Vec<RankedMatch> = fused.into_values().collect();
    if let Some(types) = &find.types {
        results.retain(|matched| {
            indexes
                .noun_type_of(&matched.id)
                .is_none_or(|noun_type| types.contains(&noun_type))
        });
    }
    if find.exclude_vfs {
        mask_vfs(indexes, &mut results)?;
    }
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(limit);
    Ok(results)
}

fn browse(indexes: &IndexSet, find: &FindQuery, limit: usize) -> Vec<RankedMatch> {
    let mut ids = indexes.all_noun_ids();
    if let Some(types) = &find.types {
        ids.retain(|id| {
            indexes
                .noun_type_of(id)
                .is_some_and(|noun_type| types.contains(&noun_type))
        });
    }
    ids.truncate(limit);
    ids.into_iter()
        .map(|id| RankedMatch {
            id,
            score: 0.0,
            search_types: vec![],
        })
        .collect()
}

fn mask_vfs(indexes: &IndexSet, results: &mut Vec<RankedMatch>) -> BackendResult<()> {
    let vfs: std::collections::HashSet<Uuid> = indexes
        .eval_where(&serde_json::json!({"vfs": true}))?
        .into_iter()
        .collect();
    results.retain(|matched| !vfs.contains(&matched.id));
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::entity::Metadata;
    use crate::entity::MillisSinceEpoch;
    use crate::entity::Noun;
    use crate::entity::Verb;
    use crate::hnsw::NodeCache;

    fn setup() -> (IndexSet, StoreConfig, crate::embed::HashingEmbedder) {
        let mut config = StoreConfig::default();
        config.dimensions = 8;
        let indexes = IndexSet::new(&config, Arc::new(NodeCache::new(16)));
        let embedder = crate::embed::HashingEmbedder::new(8);
        (indexes, config, embedder)
    }

    fn noun_with(
        indexes: &IndexSet,
        embedder: &dyn Embedder,
        noun_type: NounType,
        text: &str,
        metadata: Value,
    ) -> Uuid {
        let Value::Object(metadata) = metadata else { panic!() };
        let noun = Noun {
            id: Uuid::new_v4(),
            noun_type,
            vector: embedder.embed(text),
            metadata,
            data: None,
            confidence: None,
            weight: None,
            created_at: MillisSinceEpoch(0),
            updated_at: MillisSinceEpoch(0),
            created_by: None,
        };
        indexes.index_noun(&noun);
        noun.id
    }

    fn relate(indexes: &IndexSet, from: Uuid, to: Uuid) -> Uuid {
        let verb = Verb {
            id: Uuid::new_v4(),
            verb_type: VerbType::Contains,
            from,
            to,
            metadata: Metadata::new(),
            weight: None,
            created_at: MillisSinceEpoch(0),
            created_by: None,
        };
        indexes.index_verb(&verb);
        verb.id
    }

    #[test]
    fn test_vector_only_query() {
        let (indexes, config, embedder) = setup();
        let a = noun_with(&indexes, &embedder, NounType::Document, "alpha report", json!({}));
        let _b = noun_with(&indexes, &embedder, NounType::Document, "unrelated text", json!({}));

        let find = FindQuery {
            query: Some("alpha report".to_string()),
            limit: 1,
            ..Default::default()
        };
        let results = evaluate(&indexes, &config, &embedder, 1000, &find).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, a);
        assert_eq!(results[0].search_types, [SearchDimension::Vector]);
    }

    #[test]
    fn test_fusion_prefers_multi_dimension_hits() {
        let (indexes, config, embedder) = setup();
        let hub = noun_with(&indexes, &embedder, NounType::Document, "hub", json!({}));
        let both = noun_with(
            &indexes,
            &embedder,
            NounType::Document,
            "target topic",
            json!({"category": "x"}),
        );
        let field_only = noun_with(
            &indexes,
            &embedder,
            NounType::Document,
            "something else entirely",
            json!({"category": "x"}),
        );
        relate(&indexes, hub, both);

        let find = FindQuery {
            query: Some("target topic".to_string()),
            connected: Some(ConnectedQuery::from(hub)),
            where_clause: Some(json!({"category": "x"})),
            limit: 10,
            ..Default::default()
        };
        let results = evaluate(&indexes, &config, &embedder, 1000, &find).unwrap();
        assert_eq!(results[0].id, both);
        assert!(results[0].search_types.len() >= 2);
        assert!(results.iter().any(|matched| matched.id == field_only));
    }

    #[test]
    fn test_determinism() {
        let (indexes, config, embedder) = setup();
        for i in 0..30 {
            noun_with(
                &indexes,
                &embedder,
                NounType::Thing,
                &format!("item number {i}"),
                json!({"bucket": i % 3}),
            );
        }
        let find = FindQuery {
            query: Some("item number 7".to_string()),
            where_clause: Some(json!({"bucket": 1})),
            limit: 10,
            ..Default::default()
        };
        let first = evaluate(&indexes, &config, &embedder, 1000, &find).unwrap();
        let second = evaluate(&indexes, &config, &embedder, 1000, &find).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_single_empty_signal_is_empty_result() {
        let (indexes, config, embedder) = setup();
        noun_with(&indexes, &embedder, NounType::Thing, "present", json!({}));
        let find = FindQuery {
            where_clause: Some(json!({"category": "missing"})),
            limit: 10,
            ..Default::default()
        };
        let results = evaluate(&indexes, &config, &embedder, 1000, &find).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_no_signal_browses_up_to_limit() {
        let (indexes, config, embedder) = setup();
        for i in 0..5 {
            noun_with(&indexes, &embedder, NounType::Thing, &format!("n{i}"), json!({}));
        }
        let find = FindQuery {
            limit: 3,
            ..Default::default()
        };
        let results = evaluate(&indexes, &config, &embedder, 1000, &find).unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_limit_clamped_to_max_query_limit() {
        let (indexes, config, embedder) = setup();
        for i in 0..10 {
            noun_with(&indexes, &embedder, NounType::Thing, &format!("n{i}"), json!({}));
        }
        let find = FindQuery {
            limit: 1_000_000,
            ..Default::default()
        };
        let results = evaluate(&indexes, &config, &embedder, 4, &find).unwrap();
        assert_eq!(results.len(), 4);
    }

    #[test]
    fn test_wrong_vector_dimension_is_invalid() {
        let (indexes, config, embedder) = setup();
        let find = FindQuery {
            vector: Some(vec![1.0, 2.0]),
            ..Default::default()
        };
        assert!(matches!(
            evaluate(&indexes, &config, &embedder, 1000, &find),
            Err(BackendError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_graph_ranked_by_depth() {
        let (indexes, config, embedder) = setup();
        let a = noun_with(&indexes, &embedder, NounType::Thing, "a", json!({}));
        let b = noun_with(&indexes, &embedder, NounType::Thing, "b", json!({}));
        let c = noun_with(&indexes, &embedder, NounType::Thing, "c", json!({}));
        relate(&indexes, a, b);
        relate(&indexes, b, c);

        let find = FindQuery {
            connected: Some(ConnectedQuery {
                from: a,
                max_depth: 2,
                direction: Direction::Out,
                verb_type: None,
            }),
            limit: 10,
            ..Default::default()
        };
        let results = evaluate(&indexes, &config, &embedder, 1000, &find).unwrap();
        assert_eq!(
            results.iter().map(|matched| matched.id).collect::<Vec<_>>(),
            [b, c]
        );
        assert!(results[0].score > results[1].score);
    }
}
