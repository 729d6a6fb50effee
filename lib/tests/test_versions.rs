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
use brainy_lib::repo::ForkOptions;
use pretty_assertions::assert_eq;
use brainy_lib::repo::UpdateInput;
use brainy_lib::versioning::PruneOptions;
use brainy_lib::versioning::VersionSelector;
use serde_json::json;
use testutils::add_noun_with_metadata;
use testutils::metadata;
use testutils::new_repo;

#[test]
fn test_save_and_dedup_identical_content() {
    let repo = new_repo();
    let id = add_noun_with_metadata(&repo, NounType::Document, "doc", json!({"rev": 1}));
    let v1 = repo.versions().save(&id, None, None).unwrap();
    assert_eq!(v1, 1);
    // Saving unchanged content returns the existing version number.
    let again = repo.versions().save(&id, None, None).unwrap();
    assert_eq!(again, 1);
    assert_eq!(repo.versions().count(&id).unwrap(), 1);

    repo.update(UpdateInput {
        id,
        metadata: Some(metadata(json!({"rev": 2}))),
        ..Default::default()
    })
    .unwrap();
    let v2 = repo.versions().save(&id, None, None).unwrap();
    assert_eq!(v2, 2);
}

#[test]
fn test_restore_is_idempotent() {
    let repo = new_repo();
    let id = add_noun_with_metadata(&repo, NounType::Document, "doc", json!({"state": "one"}));
    repo.versions().save(&id, None, None).unwrap();
    repo.update(UpdateInput {
        id,
        metadata: Some(metadata(json!({"state": "two"}))),
        ..Default::default()
    })
    .unwrap();

    repo.versions().restore(&id, &VersionSelector::Number(1)).unwrap();
    let first = repo.get(&id).unwrap().unwrap();
    assert_eq!(first.metadata["state"], json!("one"));

    // Restoring the same version again leaves the same state.
    repo.versions().restore(&id, &VersionSelector::Number(1)).unwrap();
    let second = repo.get(&id).unwrap().unwrap();
    assert_eq!(second, first);
}

#[test]
fn test_get_content_reads_snapshot_not_current() {
    let repo = new_repo();
    let id = add_noun_with_metadata(&repo, NounType::Document, "doc", json!({"n": 1}));
    repo.versions().save(&id, None, None).unwrap();
    repo.update(UpdateInput {
        id,
        metadata: Some(metadata(json!({"n": 2}))),
        ..Default::default()
    })
    .unwrap();

    let snapshot = repo
        .versions()
        .get_content(&id, &VersionSelector::Number(1))
        .unwrap();
    assert_eq!(snapshot.metadata["n"], json!(1));
    assert_eq!(repo.get(&id).unwrap().unwrap().metadata["n"], json!(2));
}

#[test]
fn test_compare_versions() {
    let repo = new_repo();
    let id = add_noun_with_metadata(
        &repo,
        NounType::Document,
        "doc",
        json!({"keep": true, "gone": 1, "changed": "a"}),
    );
    repo.versions().save(&id, None, None).unwrap();
    repo.update(UpdateInput {
        id,
        metadata: Some(metadata(json!({"keep": true, "changed": "b", "fresh": 2}))),
        ..Default::default()
    })
    .unwrap();
    repo.versions().save(&id, None, None).unwrap();

    let diff = repo
        .versions()
        .compare(&id, &VersionSelector::Number(1), &VersionSelector::Number(2))
        .unwrap();
    assert!(diff.added.contains(&"metadata.fresh".to_string()));
    assert!(diff.removed.contains(&"metadata.gone".to_string()));
    assert!(diff.modified.iter().any(|change| change.path == "metadata.changed"));
    assert!(diff.total_changes >= 3);
}

#[test]
fn test_tags_and_lookup() {
    let repo = new_repo();
    let id = add_noun_with_metadata(&repo, NounType::Document, "doc", json!({"n": 1}));
    repo.versions()
        .save(&id, Some("launch".to_string()), Some("prod launch".to_string()))
        .unwrap();

    let tagged = repo.versions().get_version_by_tag(&id, "launch").unwrap().unwrap();
    assert_eq!(tagged.version, 1);
    assert_eq!(tagged.description.as_deref(), Some("prod launch"));
    assert_eq!(tagged.by_branch, "main");
    assert!(repo.versions().has_versions(&id).unwrap());
    assert_eq!(repo.versions().get_latest(&id).unwrap().unwrap().version, 1);

    repo.update(UpdateInput {
        id,
        metadata: Some(metadata(json!({"n": 2}))),
        ..Default::default()
    })
    .unwrap();
    repo.versions().save(&id, None, None).unwrap();
    repo.versions().restore(&id, &VersionSelector::Tag("launch".to_string())).unwrap();
    assert_eq!(repo.get(&id).unwrap().unwrap().metadata["n"], json!(1));
}

#[test]
fn test_prune_keeps_recent_and_tagged() {
    let repo = new_repo();
    let id = add_noun_with_metadata(&repo, NounType::Document, "doc", json!({"n": 0}));
    for i in 0..6 {
        repo.update(UpdateInput {
            id,
            metadata: Some(metadata(json!({"n": i}))),
            ..Default::default()
        })
        .unwrap();
        let tag = (i == 1).then(|| "keeper".to_string());
        repo.versions().save(&id, tag, None).unwrap();
    }
    assert_eq!(repo.versions().count(&id).unwrap(), 6);

    let removed = repo
        .versions()
        .prune(&id, PruneOptions {
            keep_recent: Some(2),
            keep_tagged: true,
        })
        .unwrap();
    assert_eq!(removed, 3);
    let remaining = repo.versions().list(&id).unwrap();
    assert_eq!(remaining.len(), 3);
    assert!(remaining.iter().any(|entry| entry.tag.as_deref() == Some("keeper")));
}

#[test]
fn test_undo_and_revert() {
    let repo = new_repo();
    let id = add_noun_with_metadata(&repo, NounType::Document, "doc", json!({"step": 1}));
    repo.versions().save(&id, None, None).unwrap();
    repo.update(UpdateInput {
        id,
        metadata: Some(metadata(json!({"step": 2}))),
        ..Default::default()
    })
    .unwrap();
    repo.versions().save(&id, None, None).unwrap();

    repo.versions().undo(&id).unwrap();
    assert_eq!(repo.get(&id).unwrap().unwrap().metadata["step"], json!(1));

    // Revert records the pre-revert state before restoring.
    repo.update(UpdateInput {
        id,
        metadata: Some(metadata(json!({"step": 3}))),
        ..Default::default()
    })
    .unwrap();
    repo.versions().revert(&id, &VersionSelector::Number(2)).unwrap();
    assert_eq!(repo.get(&id).unwrap().unwrap().metadata["step"], json!(2));
    assert!(repo.versions().count(&id).unwrap() >= 3);
}

#[test]
fn test_versions_are_branch_scoped() {
    let main = new_repo();
    let id = add_noun_with_metadata(&main, NounType::Document, "doc", json!({"n": 1}));
    main.versions().save(&id, None, None).unwrap();

    let fork = main.fork("other", ForkOptions::default()).unwrap();
    // The fork's overlay has its own version log.
    assert!(!fork.versions().has_versions(&id).unwrap());
    fork.versions().save(&id, None, None).unwrap();
    assert_eq!(fork.versions().count(&id).unwrap(), 1);
    assert_eq!(main.versions().count(&id).unwrap(), 1);
}
