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

//! Close/reopen cycles: the rebuild-on-open protocol must leave every index
//! functionally indistinguishable from before.

use brainy_lib::entity::NounType;
use brainy_lib::entity::VerbType;
use brainy_lib::query::FindQuery;
use serde_json::json;
use testutils::add_noun_with_metadata;
use testutils::add_text_noun;
use testutils::new_fs_repo;
use testutils::relate;
use testutils::reopen_repo;

#[test]
fn test_hnsw_rebuild_preserves_retrieval() {
    let (dir, repo) = new_fs_repo();
    let texts: Vec<String> = (0..100).map(|i| format!("stored item number {i}")).collect();
    let mut ids = vec![];
    for text in &texts {
        ids.push(add_text_noun(&repo, NounType::Thing, text));
    }
    repo.close().unwrap();

    let reopened = reopen_repo(&dir);
    // Item 5 retrieves itself at rank 1 after the O(N) restore.
    let results = reopened
        .find(&FindQuery {
            query: Some(texts[5].clone()),
            limit: 1,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(results[0].id, ids[5]);
    assert_eq!(reopened.get_hnsw_stats().total_nodes, 100);
    reopened.close().unwrap();
}

#[test]
fn test_reopen_preserves_metadata_and_graph_indexes() {
    let (dir, repo) = new_fs_repo();
    let a = add_noun_with_metadata(&repo, NounType::Person, "ada", json!({"role": "engineer"}));
    let b = add_noun_with_metadata(&repo, NounType::Person, "grace", json!({"role": "admiral"}));
    relate(&repo, a, b, VerbType::WorksWith);
    repo.close().unwrap();

    let reopened = reopen_repo(&dir);
    let engineers = reopened
        .find(&FindQuery {
            where_clause: Some(json!({"role": "engineer"})),
            limit: 10,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(engineers.len(), 1);
    assert_eq!(engineers[0].id, a);

    let relations = reopened.relations_of(&a).unwrap();
    assert_eq!(relations.len(), 1);
    assert_eq!(relations[0].to, b);
    reopened.close().unwrap();
}

#[test]
fn test_reopen_preserves_tombstones() {
    let (dir, repo) = new_fs_repo();
    let keep = add_text_noun(&repo, NounType::Thing, "keeper");
    let gone = add_text_noun(&repo, NounType::Thing, "gone");
    repo.delete(&gone).unwrap();
    repo.close().unwrap();

    let reopened = reopen_repo(&dir);
    assert!(reopened.get(&keep).unwrap().is_some());
    assert!(reopened.get(&gone).unwrap().is_none());
    assert_eq!(reopened.total_nouns(), 1);
    reopened.close().unwrap();
}

#[test]
fn test_reopen_restores_counts() {
    let (dir, repo) = new_fs_repo();
    for i in 0..4 {
        add_text_noun(&repo, NounType::Document, &format!("d{i}"));
    }
    add_text_noun(&repo, NounType::Person, "p");
    repo.close().unwrap();

    let reopened = reopen_repo(&dir);
    assert_eq!(reopened.total_nouns(), 5);
    assert_eq!(reopened.counts().nouns_of_type(NounType::Document), 4);
    reopened.close().unwrap();
}

#[test]
fn test_double_reopen_is_idempotent() {
    let (dir, repo) = new_fs_repo();
    let id = add_noun_with_metadata(&repo, NounType::Concept, "idea", json!({"field": "v"}));
    repo.close().unwrap();

    let once = reopen_repo(&dir);
    once.close().unwrap();
    let twice = reopen_repo(&dir);
    let noun = twice.get(&id).unwrap().unwrap();
    assert_eq!(noun.metadata["field"], json!("v"));
    let hits = twice
        .find(&FindQuery {
            where_clause: Some(json!({"field": "v"})),
            limit: 10,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(hits.len(), 1);
    twice.close().unwrap();
}
