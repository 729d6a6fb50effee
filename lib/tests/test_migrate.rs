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

use std::sync::Arc;

use assert_matches::assert_matches;
use brainy_lib::backend::Deadline;
use brainy_lib::entity::NounType;
use brainy_lib::entity::VerbType;
use brainy_lib::migrate::MigrateOptions;
use brainy_lib::migrate::MigrateOutcome;
use brainy_lib::migrate::Migration;
use brainy_lib::migrate::MigrationApplies;
use brainy_lib::repo::CommitOptions;
use brainy_lib::store::StoreError;
use serde_json::json;
use testutils::add_noun_with_metadata;
use testutils::add_text_noun;
use testutils::new_repo;
use testutils::relate;

fn rename_category_migration(id: &str, version: &str) -> Arc<Migration> {
    Arc::new(Migration {
        id: id.to_string(),
        version: version.to_string(),
        description: "rename category to kind".to_string(),
        applies: MigrationApplies::Nouns,
        transform: Box::new(|metadata| {
            let Some(value) = metadata.get("category") else {
                return Ok(None);
            };
            let mut updated = metadata.clone();
            let value = value.clone();
            updated.remove("category");
            updated.insert("kind".to_string(), value);
            Ok(Some(updated))
        }),
    })
}

/// Stamps unstamped relations with a provenance marker.
fn stamp_verbs_migration(id: &str, version: &str, applies: MigrationApplies) -> Arc<Migration> {
    Arc::new(Migration {
        id: id.to_string(),
        version: version.to_string(),
        description: "stamp relation provenance".to_string(),
        applies,
        transform: Box::new(|metadata| {
            if metadata.contains_key("stamped") {
                return Ok(None);
            }
            let mut updated = metadata.clone();
            updated.insert("stamped".to_string(), json!(true));
            Ok(Some(updated))
        }),
    })
}

#[test]
fn test_migration_with_backup_ref() {
    let repo = new_repo();
    let a = add_noun_with_metadata(&repo, NounType::Thing, "a", json!({"category": "x"}));
    let b = add_noun_with_metadata(&repo, NounType::Thing, "b", json!({"other": 1}));

    let outcome = repo
        .migrate_with(
            vec![rename_category_migration("m-rename", "2.0.0")],
            MigrateOptions::default(),
        )
        .unwrap();
    let report = match outcome {
        MigrateOutcome::Applied(report) => report,
        MigrateOutcome::DryRun(_) => panic!("expected an applied run"),
    };
    assert_eq!(report.migrations_applied, ["m-rename"]);
    assert_eq!(report.entities_modified, 1);
    assert!(report.errors.is_empty());

    // The transform landed.
    let noun = repo.get(&a).unwrap().unwrap();
    assert_eq!(noun.metadata.get("category"), None);
    assert_eq!(noun.metadata["kind"], json!("x"));
    assert!(repo.get(&b).unwrap().unwrap().metadata.get("kind").is_none());

    // A backup ref tagged system:backup exists at the pre-migration head.
    let branches = repo.list_branches().unwrap();
    assert!(branches.contains(&"pre-migration-2.0.0".to_string()));
    let backup = repo
        .store()
        .refs()
        .read_required("pre-migration-2.0.0", Deadline::NONE)
        .unwrap();
    assert!(backup.is_system_backup());
    let metadata = backup.metadata.unwrap();
    assert_eq!(metadata["migrationVersion"], json!("2.0.0"));
    assert_eq!(metadata["author"], json!("brainy-migration"));
}

#[test]
fn test_rerun_is_noop() {
    let repo = new_repo();
    add_noun_with_metadata(&repo, NounType::Thing, "a", json!({"category": "x"}));
    let migration = rename_category_migration("m-once", "2.1.0");

    repo.migrate_with(vec![migration.clone()], MigrateOptions::default())
        .unwrap();
    let outcome = repo
        .migrate_with(vec![migration], MigrateOptions::default())
        .unwrap();
    assert_matches!(outcome, MigrateOutcome::Applied(report) => {
        assert!(report.migrations_applied.is_empty());
        assert_eq!(report.entities_modified, 0);
    });
}

#[test]
fn test_empty_migrations_is_noop() {
    let repo = new_repo();
    add_noun_with_metadata(&repo, NounType::Thing, "a", json!({"category": "x"}));
    repo.commit(CommitOptions {
        message: "before".to_string(),
        ..Default::default()
    })
    .unwrap();
    let history_before = repo
        .get_history(&brainy_lib::repo::HistoryOptions::default())
        .unwrap()
        .len();

    let outcome = repo.migrate_with(vec![], MigrateOptions::default()).unwrap();
    assert_matches!(outcome, MigrateOutcome::Applied(report) => {
        assert_eq!(report.entities_modified, 0);
        assert!(report.migrations_applied.is_empty());
    });
    // No new commits either.
    let history_after = repo
        .get_history(&brainy_lib::repo::HistoryOptions::default())
        .unwrap()
        .len();
    assert_eq!(history_before, history_after);
}

#[test]
fn test_verb_migration_applies() {
    let repo = new_repo();
    let a = add_text_noun(&repo, NounType::Person, "a");
    let b = add_text_noun(&repo, NounType::Person, "b");
    let verb_id = relate(&repo, a, b, VerbType::WorksWith);

    let outcome = repo
        .migrate_with(
            vec![stamp_verbs_migration(
                "m-stamp-both",
                "7.0.0",
                MigrationApplies::Both,
            )],
            MigrateOptions::default(),
        )
        .unwrap();
    assert_matches!(outcome, MigrateOutcome::Applied(report) => {
        // Both nouns and the verb were stamped.
        assert_eq!(report.entities_modified, 3);
        assert!(report.errors.is_empty());
    });
    let verb = repo.verb(&verb_id).unwrap().unwrap();
    assert_eq!(verb.metadata["stamped"], json!(true));
    assert_eq!(repo.get(&a).unwrap().unwrap().metadata["stamped"], json!(true));
}

#[test]
fn test_dry_run_previews_verb_migrations() {
    let repo = new_repo();
    let a = add_text_noun(&repo, NounType::Person, "a");
    let b = add_text_noun(&repo, NounType::Person, "b");
    let verb_id = relate(&repo, a, b, VerbType::ReportsTo);

    let outcome = repo
        .migrate_with(
            vec![stamp_verbs_migration(
                "m-stamp-verbs",
                "7.1.0",
                MigrationApplies::Verbs,
            )],
            MigrateOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_matches!(outcome, MigrateOutcome::DryRun(report) => {
        // The preview covers the verb half even though nouns are untouched.
        assert_eq!(report.affected_entities, 1);
        assert_eq!(report.sample_changes.len(), 1);
        assert_eq!(report.sample_changes[0].entity_id, verb_id);
        assert_eq!(report.sample_changes[0].after["stamped"], json!(true));
        assert_eq!(report.sample_changes[0].before.get("stamped"), None);
    });
    // Nothing mutated.
    let verb = repo.verb(&verb_id).unwrap().unwrap();
    assert_eq!(verb.metadata.get("stamped"), None);
}

#[test]
fn test_dry_run_mutates_nothing() {
    let repo = new_repo();
    let a = add_noun_with_metadata(&repo, NounType::Thing, "a", json!({"category": "x"}));

    let outcome = repo
        .migrate_with(
            vec![rename_category_migration("m-dry", "3.0.0")],
            MigrateOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_matches!(outcome, MigrateOutcome::DryRun(report) => {
        assert_eq!(report.pending_migrations, ["m-dry"]);
        assert_eq!(report.affected_entities, 1);
        assert_eq!(report.sample_changes.len(), 1);
        assert_eq!(report.sample_changes[0].after["kind"], json!("x"));
    });
    // Nothing changed, and no backup ref was created.
    let noun = repo.get(&a).unwrap().unwrap();
    assert_eq!(noun.metadata["category"], json!("x"));
    assert!(!repo.list_branches().unwrap().iter().any(|name| name.starts_with("pre-migration")));
}

#[test]
fn test_transform_errors_are_collected() {
    let repo = new_repo();
    add_noun_with_metadata(&repo, NounType::Thing, "a", json!({"category": "x"}));
    add_noun_with_metadata(&repo, NounType::Thing, "b", json!({"category": "y"}));

    let failing = Arc::new(Migration {
        id: "m-fails".to_string(),
        version: "4.0.0".to_string(),
        description: "always fails".to_string(),
        applies: MigrationApplies::Nouns,
        transform: Box::new(|_| Err("boom".to_string())),
    });
    let outcome = repo
        .migrate_with(vec![failing], MigrateOptions::default())
        .unwrap();
    assert_matches!(outcome, MigrateOutcome::Applied(report) => {
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.entities_modified, 0);
        assert!(report.errors.iter().all(|record| record.error == "boom"));
    });
}

#[test]
fn test_max_errors_stops_early() {
    let repo = new_repo();
    for i in 0..10 {
        add_noun_with_metadata(&repo, NounType::Thing, &format!("n{i}"), json!({"i": i}));
    }
    let failing = Arc::new(Migration {
        id: "m-budget".to_string(),
        version: "5.0.0".to_string(),
        description: "always fails".to_string(),
        applies: MigrationApplies::Nouns,
        transform: Box::new(|_| Err("nope".to_string())),
    });
    let outcome = repo
        .migrate_with(
            vec![failing],
            MigrateOptions {
                max_errors: 3,
                ..Default::default()
            },
        )
        .unwrap();
    assert_matches!(outcome, MigrateOutcome::Applied(report) => {
        assert_eq!(report.errors.len(), 3);
        // The run stopped before recording the migration as complete.
        assert!(report.migrations_applied.is_empty());
    });
}

#[test]
fn test_on_progress_callback_fires() {
    let repo = new_repo();
    add_noun_with_metadata(&repo, NounType::Thing, "a", json!({"category": "x"}));

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let outcome = repo
        .migrate_with(
            vec![rename_category_migration("m-progress", "6.0.0")],
            MigrateOptions {
                on_progress: Some(Arc::new(move |progress| {
                    sink.lock().unwrap().push(progress.clone());
                })),
                ..Default::default()
            },
        )
        .unwrap();
    assert_matches!(outcome, MigrateOutcome::Applied(_));
    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    assert_eq!(seen.last().unwrap().migration_id, "m-progress");
    assert_eq!(seen.last().unwrap().entities_modified, 1);
}

#[test]
fn test_duplicate_migration_ids_rejected() {
    let repo = new_repo();
    let err = repo
        .migrate_with(
            vec![
                rename_category_migration("dup", "1.0.0"),
                rename_category_migration("dup", "1.0.1"),
            ],
            MigrateOptions::default(),
        )
        .unwrap_err();
    assert_matches!(err, StoreError::InvalidArgument(_));
}
