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

use assert_matches::assert_matches;
use brainy_lib::entity::EntityData;
use brainy_lib::entity::NounType;
use brainy_lib::entity::VerbType;
use brainy_lib::graph_index::RelationsQuery;
use brainy_lib::repo::AddInput;
use brainy_lib::repo::RelateInput;
use brainy_lib::repo::UpdateInput;
use brainy_lib::store::StoreError;
use serde_json::json;
use testutils::add_noun_with_metadata;
use testutils::add_text_noun;
use testutils::metadata;
use testutils::new_repo;
use testutils::relate;
use uuid::Uuid;

#[test]
fn test_read_after_write() {
    let repo = new_repo();
    let id = add_text_noun(&repo, NounType::Document, "immediately visible");
    // No flush has happened; the entity is still served from the
    // write-through cache.
    let noun = repo.get(&id).unwrap().unwrap();
    assert_eq!(noun.noun_type, NounType::Document);
    assert_eq!(noun.id, id);
}

#[test]
fn test_add_delete_get_is_none() {
    let repo = new_repo();
    let id = add_text_noun(&repo, NounType::Thing, "short-lived");
    repo.delete(&id).unwrap();
    assert_eq!(repo.get(&id).unwrap(), None);
}

#[test]
fn test_tombstone_cleared_by_readd() {
    let repo = new_repo();
    let id = add_text_noun(&repo, NounType::Thing, "first life");
    repo.delete(&id).unwrap();
    assert_eq!(repo.get(&id).unwrap(), None);

    repo.add(AddInput {
        id: Some(id),
        noun_type: Some(NounType::Thing),
        text: Some("second life".to_string()),
        data: Some(EntityData::Text("second life".to_string())),
        ..Default::default()
    })
    .unwrap();
    let noun = repo.get(&id).unwrap().unwrap();
    assert_eq!(noun.data, Some(EntityData::Text("second life".to_string())));
}

#[test]
fn test_relate_requires_visible_endpoints() {
    let repo = new_repo();
    let a = add_text_noun(&repo, NounType::Person, "someone");
    let missing = Uuid::new_v4();
    let err = repo
        .relate(RelateInput {
            from: a,
            to: missing,
            verb_type: Some(VerbType::FriendOf),
            ..Default::default()
        })
        .unwrap_err();
    assert_matches!(err, StoreError::NotFound(id) if id == missing);

    let b = add_text_noun(&repo, NounType::Person, "someone else");
    let verb_id = relate(&repo, a, b, VerbType::FriendOf);
    let relations = repo.relations_of(&a).unwrap();
    assert_eq!(relations.len(), 1);
    assert_eq!(relations[0].id, verb_id);
    assert_eq!(relations[0].to, b);
}

#[test]
fn test_batch_add_then_immediate_relate() {
    let repo = new_repo();
    let doc = repo
        .add(AddInput {
            noun_type: Some(NounType::Document),
            text: Some("doc.pdf".to_string()),
            metadata: metadata(json!({"filename": "doc.pdf"})),
            ..Default::default()
        })
        .unwrap();

    let items: Vec<AddInput> = (0..372)
        .map(|i| AddInput {
            noun_type: Some(NounType::Thing),
            text: Some(format!("chunk {i}")),
            ..Default::default()
        })
        .collect();
    let report = repo.add_many(items, true);
    assert_eq!(report.successful.len(), 372);
    assert!(report.failed.is_empty());

    // Every id from the batch is immediately relatable.
    for id in &report.successful {
        relate(&repo, doc, *id, VerbType::Contains);
    }
    let relations = repo
        .get_relations(RelationsQuery {
            from: Some(doc),
            limit: Some(500),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(relations.len(), 372);
}

#[test]
fn test_unrelate_removes_both_directions() {
    let repo = new_repo();
    let a = add_text_noun(&repo, NounType::Person, "a");
    let b = add_text_noun(&repo, NounType::Person, "b");
    let verb_id = relate(&repo, a, b, VerbType::WorksWith);

    repo.unrelate(&verb_id).unwrap();
    assert!(repo.relations_of(&a).unwrap().is_empty());
    assert!(
        repo.get_relations(RelationsQuery {
            to: Some(b),
            ..Default::default()
        })
        .unwrap()
        .is_empty()
    );
    assert_eq!(repo.verb(&verb_id).unwrap(), None);
}

#[test]
fn test_delete_cascades_relations() {
    let repo = new_repo();
    let a = add_text_noun(&repo, NounType::Person, "a");
    let b = add_text_noun(&repo, NounType::Person, "b");
    relate(&repo, a, b, VerbType::FriendOf);
    relate(&repo, b, a, VerbType::FriendOf);

    repo.delete(&b).unwrap();
    assert!(repo.relations_of(&a).unwrap().is_empty());
    assert_eq!(repo.total_verbs(), 0);
}

#[test]
fn test_update_merges_fields() {
    let repo = new_repo();
    let id = add_noun_with_metadata(
        &repo,
        NounType::Task,
        "the task",
        json!({"status": "open"}),
    );
    repo.update(UpdateInput {
        id,
        metadata: Some(metadata(json!({"status": "done"}))),
        confidence: Some(0.7),
        ..Default::default()
    })
    .unwrap();

    let noun = repo.get(&id).unwrap().unwrap();
    assert_eq!(noun.metadata["status"], json!("done"));
    assert_eq!(noun.confidence, Some(0.7));
    assert!(noun.updated_at >= noun.created_at);
}

#[test]
fn test_update_missing_is_not_found() {
    let repo = new_repo();
    let err = repo
        .update(UpdateInput {
            id: Uuid::new_v4(),
            confidence: Some(1.0),
            ..Default::default()
        })
        .unwrap_err();
    assert_matches!(err, StoreError::NotFound(_));
}

#[test]
fn test_counts_agree_with_content() {
    let repo = new_repo();
    let a = add_text_noun(&repo, NounType::Person, "a");
    let _b = add_text_noun(&repo, NounType::Person, "b");
    let c = add_text_noun(&repo, NounType::Document, "c");
    relate(&repo, a, c, VerbType::CreatedBy);

    assert_eq!(repo.total_nouns(), 3);
    assert_eq!(repo.total_verbs(), 1);
    repo.delete(&a).unwrap();
    assert_eq!(repo.total_nouns(), 2);
    // The relation touching the deleted noun went with it.
    assert_eq!(repo.total_verbs(), 0);
}

#[test]
fn test_add_many_stops_without_continue_on_error() {
    let repo = new_repo();
    let items = vec![
        AddInput {
            text: Some("fine".to_string()),
            ..Default::default()
        },
        AddInput {
            vector: Some(vec![0.0; 3]), // wrong dimension
            ..Default::default()
        },
        AddInput {
            text: Some("never reached".to_string()),
            ..Default::default()
        },
    ];
    let report = repo.add_many(items, false);
    assert_eq!(report.successful.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].index, 1);
}

#[test]
fn test_flush_then_reads_hit_durable_storage() {
    let repo = new_repo();
    let id = add_noun_with_metadata(
        &repo,
        NounType::Concept,
        "persistent",
        json!({"kind": "demo"}),
    );
    repo.flush().unwrap();
    let noun = repo.get(&id).unwrap().unwrap();
    assert_eq!(noun.metadata["kind"], json!("demo"));
}
