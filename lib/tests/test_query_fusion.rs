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

use brainy_lib::entity::NounType;
use brainy_lib::entity::VerbType;
use brainy_lib::query::ConnectedQuery;
use brainy_lib::query::FindQuery;
use brainy_lib::query::SearchDimension;
use brainy_lib::repo::AddInput;
use brainy_lib::repo::UpdateInput;
use serde_json::json;
use testutils::add_noun_with_metadata;
use testutils::add_text_noun;
use testutils::metadata;
use testutils::new_repo;
use testutils::random_vector;
use testutils::relate;

#[test]
fn test_self_retrieval_after_add_many() {
    let repo = new_repo();
    let items: Vec<AddInput> = (0..50)
        .map(|_| AddInput {
            noun_type: Some(NounType::Thing),
            vector: Some(random_vector()),
            ..Default::default()
        })
        .collect();
    let vectors: Vec<Vec<f32>> = items.iter().map(|item| item.vector.clone().unwrap()).collect();
    let report = repo.add_many(items, true);
    assert!(report.failed.is_empty());

    for (id, vector) in report.successful.iter().zip(vectors) {
        let results = repo
            .find(&FindQuery {
                vector: Some(vector),
                limit: 1,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results[0].id, *id);
        // Distance zero means a maximal reciprocal-rank score.
        assert!(results[0].score > 0.0);
    }
}

#[test]
fn test_text_query_retrieves_same_text() {
    let repo = new_repo();
    let target = add_text_noun(&repo, NounType::Document, "the release checklist for march");
    for i in 0..20 {
        add_text_noun(&repo, NounType::Document, &format!("unrelated filler number {i}"));
    }
    let results = repo
        .find(&FindQuery {
            query: Some("the release checklist for march".to_string()),
            limit: 1,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(results[0].id, target);
}

#[test]
fn test_fusion_determinism() {
    let repo = new_repo();
    for i in 0..30 {
        add_noun_with_metadata(
            &repo,
            NounType::Thing,
            &format!("entity number {i}"),
            json!({"bucket": i % 3}),
        );
    }
    let find = FindQuery {
        query: Some("entity number 11".to_string()),
        where_clause: Some(json!({"bucket": 2})),
        limit: 10,
        ..Default::default()
    };
    let first: Vec<(uuid::Uuid, String)> = repo
        .find(&find)
        .unwrap()
        .into_iter()
        .map(|result| (result.id, format!("{:.12}", result.score)))
        .collect();
    let second: Vec<(uuid::Uuid, String)> = repo
        .find(&find)
        .unwrap()
        .into_iter()
        .map(|result| (result.id, format!("{:.12}", result.score)))
        .collect();
    assert_eq!(first, second);
}

#[test]
fn test_where_and_vector_fuse_to_union() {
    let repo = new_repo();
    let in_both = add_noun_with_metadata(
        &repo,
        NounType::Document,
        "quarterly budget numbers",
        json!({"team": "finance"}),
    );
    let field_only = add_noun_with_metadata(
        &repo,
        NounType::Document,
        "completely different content",
        json!({"team": "finance"}),
    );
    add_noun_with_metadata(
        &repo,
        NounType::Document,
        "quarterly budget assumptions",
        json!({"team": "design"}),
    );

    let results = repo
        .find(&FindQuery {
            query: Some("quarterly budget numbers".to_string()),
            where_clause: Some(json!({"team": "finance"})),
            limit: 10,
            ..Default::default()
        })
        .unwrap();
    // Both-signal hit ranks first; single-signal members remain in the union.
    assert_eq!(results[0].id, in_both);
    assert!(results[0].search_types.contains(&SearchDimension::Vector));
    assert!(results[0].search_types.contains(&SearchDimension::Field));
    assert!(results.iter().any(|result| result.id == field_only));
}

#[test]
fn test_graph_dimension_with_flattened_results() {
    let repo = new_repo();
    let folder = add_noun_with_metadata(
        &repo,
        NounType::Collection,
        "folder",
        json!({"name": "folder"}),
    );
    let child = add_noun_with_metadata(
        &repo,
        NounType::File,
        "child file",
        json!({"name": "child.txt"}),
    );
    relate(&repo, folder, child, VerbType::Contains);

    let results = repo
        .find(&FindQuery {
            connected: Some(ConnectedQuery::from(folder)),
            limit: 10,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(results.len(), 1);
    let hit = &results[0];
    assert_eq!(hit.id, child);
    assert_eq!(hit.search_types, [SearchDimension::Graph]);
    // Flattened top-level fields mirror the entity.
    assert_eq!(hit.noun_type, Some(NounType::File));
    assert_eq!(hit.metadata["name"], json!("child.txt"));
    assert!(hit.entity.is_some());
}

#[test]
fn test_update_asymmetry_regression() {
    let repo = new_repo();
    let id = add_noun_with_metadata(
        &repo,
        NounType::Document,
        "steady document",
        json!({"category": "important", "status": "active"}),
    );
    for i in 0..20 {
        repo.update(UpdateInput {
            id,
            metadata: Some(metadata(
                json!({"category": "important", "status": "active", "rev": i}),
            )),
            ..Default::default()
        })
        .unwrap();
    }
    repo.flush().unwrap();

    let results = repo
        .find(&FindQuery {
            where_clause: Some(json!({"category": "important"})),
            limit: 100,
            ..Default::default()
        })
        .unwrap();
    // Exactly one hit, no duplicate ids.
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, id);
}

#[test]
fn test_similar_excludes_seed() {
    let repo = new_repo();
    let seed = add_text_noun(&repo, NounType::Concept, "graph databases with vectors");
    let near = add_text_noun(&repo, NounType::Concept, "graph databases with vectors too");
    add_text_noun(&repo, NounType::Concept, "cooking recipes");

    let results = repo.similar(&seed, 2).unwrap();
    assert!(results.iter().all(|result| result.id != seed));
    assert_eq!(results[0].id, near);
}

#[test]
fn test_type_filter_restricts_results() {
    let repo = new_repo();
    add_text_noun(&repo, NounType::Person, "ada lovelace");
    let doc = add_text_noun(&repo, NounType::Document, "ada lovelace biography");

    let results = repo
        .find(&FindQuery {
            query: Some("ada lovelace".to_string()),
            types: Some(vec![NounType::Document]),
            limit: 10,
            ..Default::default()
        })
        .unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|result| result.id == doc));
}

#[test]
fn test_deleted_entities_masked_from_queries() {
    let repo = new_repo();
    let id = add_noun_with_metadata(&repo, NounType::Thing, "goner", json!({"tag": "x"}));
    repo.delete(&id).unwrap();

    let by_field = repo
        .find(&FindQuery {
            where_clause: Some(json!({"tag": "x"})),
            limit: 10,
            ..Default::default()
        })
        .unwrap();
    assert!(by_field.is_empty());
    let by_vector = repo
        .find(&FindQuery {
            query: Some("goner".to_string()),
            limit: 10,
            ..Default::default()
        })
        .unwrap();
    assert!(by_vector.iter().all(|result| result.id != id));
}

#[test]
fn test_empty_query_browses() {
    let repo = new_repo();
    for i in 0..7 {
        add_text_noun(&repo, NounType::Thing, &format!("n{i}"));
    }
    let results = repo
        .find(&FindQuery {
            limit: 5,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(results.len(), 5);
}
