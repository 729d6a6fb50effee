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

use std::thread::sleep;
use std::time::Duration;

use assert_matches::assert_matches;
use brainy_lib::entity::MillisSinceEpoch;
use brainy_lib::entity::NounType;
use brainy_lib::repo::AddInput;
use brainy_lib::repo::CommitOptions;
use brainy_lib::repo::ForkOptions;
use brainy_lib::repo::UpdateInput;
use brainy_lib::store::StoreError;
use serde_json::json;
use testutils::add_noun_with_metadata;
use testutils::add_text_noun;
use testutils::metadata;
use testutils::new_repo;

#[test]
fn test_fork_sees_base_state_plus_local_writes() {
    let main = new_repo();
    let inherited = add_text_noun(&main, NounType::Document, "shared knowledge");

    let fork = main.fork("experiment", ForkOptions::default()).unwrap();
    assert_eq!(fork.current_branch(), "experiment");
    // Inherited from the fork point.
    assert!(fork.get(&inherited).unwrap().is_some());

    let local = add_text_noun(&fork, NounType::Document, "fork only");
    assert!(fork.get(&local).unwrap().is_some());
    // Fork-local writes are invisible on main.
    assert!(main.get(&local).unwrap().is_none());
}

#[test]
fn test_source_branch_writes_after_fork_are_invisible() {
    let main = new_repo();
    add_text_noun(&main, NounType::Thing, "before fork");
    let fork = main.fork("frozen", ForkOptions::default()).unwrap();

    let later = add_text_noun(&main, NounType::Thing, "after fork");
    assert!(main.get(&later).unwrap().is_some());
    // The fork's base is the state frozen at fork time.
    assert!(fork.get(&later).unwrap().is_none());
}

#[test]
fn test_fork_listable_and_checkoutable() {
    let main = new_repo();
    add_text_noun(&main, NounType::Thing, "x");
    let _fork = main.fork("feature", ForkOptions::default()).unwrap();

    let branches = main.list_branches().unwrap();
    assert!(branches.contains(&"feature".to_string()));
    assert!(branches.contains(&"main".to_string()));

    let again = main.checkout("feature").unwrap();
    assert_eq!(again.current_branch(), "feature");
}

#[test]
fn test_checkout_roundtrip_leaves_main_unchanged() {
    let main = new_repo();
    let id = add_noun_with_metadata(&main, NounType::Task, "task", json!({"state": "open"}));
    let fork = main.fork("b", ForkOptions::default()).unwrap();
    fork.update(UpdateInput {
        id,
        metadata: Some(metadata(json!({"state": "closed"}))),
        ..Default::default()
    })
    .unwrap();

    let main_again = fork.checkout("main").unwrap();
    let noun = main_again.get(&id).unwrap().unwrap();
    assert_eq!(noun.metadata["state"], json!("open"));
}

#[test]
fn test_fork_delete_masks_inherited_entity() {
    let main = new_repo();
    let id = add_text_noun(&main, NounType::Thing, "deletable");
    let fork = main.fork("minus-one", ForkOptions::default()).unwrap();

    fork.delete(&id).unwrap();
    assert!(fork.get(&id).unwrap().is_none());
    // Main keeps it.
    assert!(main.get(&id).unwrap().is_some());
}

#[test]
fn test_duplicate_fork_name_rejected() {
    let main = new_repo();
    main.fork("dup", ForkOptions::default()).unwrap();
    let err = main.fork("dup", ForkOptions::default()).unwrap_err();
    assert_matches!(err, StoreError::InvalidArgument(_));
}

#[test]
fn test_as_of_time_travel() {
    let repo = new_repo();
    let id = add_noun_with_metadata(
        &repo,
        NounType::Document,
        "versioned doc",
        json!({"version": 1}),
    );
    repo.commit(CommitOptions {
        message: "v1".to_string(),
        capture_state: true,
        ..Default::default()
    })
    .unwrap();
    let t1 = MillisSinceEpoch::now();
    sleep(Duration::from_millis(20));

    repo.update(UpdateInput {
        id,
        metadata: Some(metadata(json!({"version": 2}))),
        ..Default::default()
    })
    .unwrap();
    repo.commit(CommitOptions {
        message: "v2".to_string(),
        capture_state: true,
        ..Default::default()
    })
    .unwrap();

    // The view at t1 sees version 1 while the live branch sees version 2.
    let view = repo.as_of(t1).unwrap();
    let old = view.get(&id).unwrap().unwrap();
    assert_eq!(old.metadata["version"], json!(1));
    let current = repo.get(&id).unwrap().unwrap();
    assert_eq!(current.metadata["version"], json!(2));
}

#[test]
fn test_as_of_view_is_read_only() {
    let repo = new_repo();
    add_text_noun(&repo, NounType::Thing, "x");
    repo.commit(CommitOptions {
        message: "snap".to_string(),
        capture_state: true,
        ..Default::default()
    })
    .unwrap();

    let view = repo.as_of(MillisSinceEpoch::now()).unwrap();
    let err = view
        .add(AddInput {
            text: Some("nope".to_string()),
            ..Default::default()
        })
        .unwrap_err();
    assert_matches!(err, StoreError::ReadOnly);
}

#[test]
fn test_as_of_before_any_commit_fails() {
    let repo = new_repo();
    let err = repo.as_of(MillisSinceEpoch(0)).unwrap_err();
    assert_matches!(err, StoreError::InvalidArgument(_));
}

#[test]
fn test_as_of_queries_frozen_state() {
    let repo = new_repo();
    add_noun_with_metadata(&repo, NounType::Thing, "tagged", json!({"epoch": "old"}));
    repo.commit(CommitOptions {
        message: "snap".to_string(),
        capture_state: true,
        ..Default::default()
    })
    .unwrap();
    let t1 = MillisSinceEpoch::now();
    sleep(Duration::from_millis(20));
    add_noun_with_metadata(&repo, NounType::Thing, "tagged later", json!({"epoch": "new"}));

    let view = repo.as_of(t1).unwrap();
    let results = view
        .find(&brainy_lib::query::FindQuery {
            where_clause: Some(json!({"epoch": "new"})),
            limit: 10,
            ..Default::default()
        })
        .unwrap();
    assert!(results.is_empty());
    let results = view
        .find(&brainy_lib::query::FindQuery {
            where_clause: Some(json!({"epoch": "old"})),
            limit: 10,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(results.len(), 1);
}
