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

//! Branch-aware, resumable metadata migrations.
//!
//! A migration run first writes a backup ref tagged `system:backup` at the
//! current head, then applies every pending transform to every visible
//! entity on every branch (backup branches excluded). Completed migration
//! ids are recorded in a ledger so re-runs are no-ops, which also makes an
//! interrupted run resumable.

use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::sync::Mutex;
use std::sync::Arc;

use pollster::FutureExt as _;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::backend::Deadline;
use crate::entity::FORMAT_VERSION;
use crate::entity::Metadata;
use crate::keys::Keyspace;
use crate::keys::MAIN_BRANCH;
use crate::refs::REF_TYPE_KEY;
use crate::refs::RefDoc;
use crate::refs::SYSTEM_BACKUP;
use crate::repo::Repo;
use crate::repo::UpdateInput;
use crate::store::StoreError;
use crate::store::StoreResult;
use crate::store::ensure_version;

/// Which entity kind a migration transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationApplies {
    Nouns,
    Verbs,
    Both,
}

/// Metadata transform. `Ok(None)` skips the entity; `Err` is collected as a
/// migration error without aborting the run.
pub type TransformFn =
    Box<dyn Fn(&Metadata) -> Result<Option<Metadata>, String> + Send + Sync>;

pub struct Migration {
    pub id: String,
    pub version: String,
    pub description: String,
    pub applies: MigrationApplies,
    pub transform: TransformFn,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("applies", &self.applies)
            .finish_non_exhaustive()
    }
}

/// The process-wide migrations array, injectable for tests.
static MIGRATIONS: LazyLock<Mutex<Vec<Arc<Migration>>>> =
    LazyLock::new(|| Mutex::new(Vec::new()));

pub fn set_migrations(migrations: Vec<Migration>) {
    *MIGRATIONS.lock().unwrap() = migrations.into_iter().map(Arc::new).collect();
}

pub fn registered_migrations() -> Vec<Arc<Migration>> {
    MIGRATIONS.lock().unwrap().clone()
}

/// Point-in-time progress handed to the `on_progress` callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationProgress {
    pub migration_id: String,
    pub branch: String,
    pub entities_processed: usize,
    pub entities_modified: usize,
}

#[derive(Clone)]
pub struct MigrateOptions {
    pub dry_run: bool,
    /// Stop the run once this many errors have been collected. Unbounded by
    /// default.
    pub max_errors: usize,
    pub on_progress: Option<Arc<dyn Fn(&MigrationProgress) + Send + Sync>>,
}

impl std::fmt::Debug for MigrateOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrateOptions")
            .field("dry_run", &self.dry_run)
            .field("max_errors", &self.max_errors)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_errors: usize::MAX,
            on_progress: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationErrorRecord {
    pub migration_id: String,
    pub entity_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub entities_processed: usize,
    pub entities_modified: usize,
    pub migrations_applied: Vec<String>,
    pub errors: Vec<MigrationErrorRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleChange {
    pub migration_id: String,
    pub entity_id: Uuid,
    pub before: Value,
    pub after: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DryRunReport {
    pub pending_migrations: Vec<String>,
    pub affected_entities: usize,
    pub sample_changes: Vec<SampleChange>,
    pub estimated_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MigrateOutcome {
    Applied(MigrationReport),
    DryRun(DryRunReport),
}

/// Ledger of completed migration ids, persisted globally at
/// `system/migrations.json` on `main`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct MigrationLedger {
    version: u32,
    completed: BTreeSet<String>,
}

impl Default for MigrationLedger {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            completed: BTreeSet::new(),
        }
    }
}

const SAMPLE_LIMIT: usize = 5;
const MIGRATION_AUTHOR: &str = "brainy-migration";

fn validate(migrations: &[Arc<Migration>]) -> StoreResult<()> {
    let mut seen = BTreeSet::new();
    for migration in migrations {
        if migration.id.is_empty() || migration.version.is_empty() {
            return Err(StoreError::InvalidArgument(
                "migrations require non-empty id and version".to_string(),
            ));
        }
        if !seen.insert(migration.id.as_str()) {
            return Err(StoreError::InvalidArgument(format!(
                "duplicate migration id {}",
                migration.id
            )));
        }
    }
    Ok(())
}

impl Repo {
    /// Runs the registered migrations; see [`Repo::migrate_with`].
    pub fn migrate(&self, options: MigrateOptions) -> StoreResult<MigrateOutcome> {
        self.migrate_with(registered_migrations(), options)
    }

    /// Runs the given migrations against every visible entity across every
    /// branch except those tagged `system:backup`.
    pub fn migrate_with(
        &self,
        migrations: Vec<Arc<Migration>>,
        options: MigrateOptions,
    ) -> StoreResult<MigrateOutcome> {
        validate(&migrations)?;
        let ledger_key = Keyspace::for_branch(MAIN_BRANCH).migrations();
        let mut ledger = self
            .store()
            .get_doc::<MigrationLedger>(&ledger_key, Deadline::NONE)
            .block_on()?
            .unwrap_or_default();
        ensure_version(ledger.version)?;

        let pending: Vec<Arc<Migration>> = migrations
            .into_iter()
            .filter(|migration| !ledger.completed.contains(&migration.id))
            .collect();
        if pending.is_empty() {
            return Ok(if options.dry_run {
                MigrateOutcome::DryRun(DryRunReport::default())
            } else {
                MigrateOutcome::Applied(MigrationReport::default())
            });
        }

        let branches: Vec<String> = self
            .store()
            .refs()
            .list_branches(Deadline::NONE)?
            .into_iter()
            .filter(|(_, doc)| !doc.is_system_backup())
            .map(|(name, _)| name)
            .collect();

        if options.dry_run {
            return Ok(MigrateOutcome::DryRun(self.dry_run(&pending, &branches)?));
        }

        // Backup ref first, at the current head, before anything mutates.
        let backup_version = &pending.last().unwrap().version;
        let backup_name = format!("pre-migration-{backup_version}");
        if self.store().refs().read(&backup_name, Deadline::NONE)?.is_none() {
            let head = self
                .store()
                .refs()
                .read_required(self.current_branch(), Deadline::NONE)?;
            let metadata: Metadata = [
                (REF_TYPE_KEY.to_string(), Value::String(SYSTEM_BACKUP.to_string())),
                (
                    "migrationVersion".to_string(),
                    Value::String(backup_version.clone()),
                ),
                (
                    "author".to_string(),
                    Value::String(MIGRATION_AUTHOR.to_string()),
                ),
            ]
            .into_iter()
            .collect();
            self.store().refs().create(
                &backup_name,
                &RefDoc::new(head.commit_hash, Some(metadata)),
                Deadline::NONE,
            )?;
            tracing::info!(backup = %backup_name, "created migration backup ref");
        }

        let mut report = MigrationReport::default();
        'migrations: for migration in &pending {
            for branch in &branches {
                let repo = if branch == self.current_branch() {
                    None
                } else {
                    Some(self.checkout(branch)?)
                };
                let repo = repo.as_ref().unwrap_or(self);
                if !self.apply_one(repo, branch, migration, &mut report, &options)? {
                    break 'migrations;
                }
            }
            ledger.completed.insert(migration.id.clone());
            report.migrations_applied.push(migration.id.clone());
            // Persist the ledger after each completed migration so an
            // interrupted run resumes where it stopped.
            self.store()
                .put_doc_now(&ledger_key, &ledger, Deadline::NONE)
                .block_on()?;
        }
        tracing::info!(
            applied = report.migrations_applied.len(),
            modified = report.entities_modified,
            errors = report.errors.len(),
            "migration run finished"
        );
        Ok(MigrateOutcome::Applied(report))
    }

    /// Applies one migration on one branch. Returns false when the error
    /// budget is exhausted.
    fn apply_one(
        &self,
        repo: &Self,
        branch: &str,
        migration: &Migration,
        report: &mut MigrationReport,
        options: &MigrateOptions,
    ) -> StoreResult<bool> {
        const PROGRESS_INTERVAL: usize = 100;
        let mut notify = |report: &MigrationReport| {
            if let Some(on_progress) = &options.on_progress {
                on_progress(&MigrationProgress {
                    migration_id: migration.id.clone(),
                    branch: branch.to_string(),
                    entities_processed: report.entities_processed,
                    entities_modified: report.entities_modified,
                });
            }
        };
        if matches!(migration.applies, MigrationApplies::Nouns | MigrationApplies::Both) {
            for id in repo.indexes().all_noun_ids() {
                let Some(noun) = repo.get(&id)? else { continue };
                report.entities_processed += 1;
                if report.entities_processed % PROGRESS_INTERVAL == 0 {
                    notify(report);
                }
                match (migration.transform)(&noun.metadata) {
                    Ok(Some(metadata)) => {
                        repo.update(UpdateInput {
                            id,
                            metadata: Some(metadata),
                            ..Default::default()
                        })?;
                        report.entities_modified += 1;
                    }
                    Ok(None) => {}
                    Err(error) => {
                        report.errors.push(MigrationErrorRecord {
                            migration_id: migration.id.clone(),
                            entity_id: id,
                            error,
                        });
                        if report.errors.len() >= options.max_errors {
                            return Ok(false);
                        }
                    }
                }
            }
        }
        if matches!(migration.applies, MigrationApplies::Verbs | MigrationApplies::Both) {
            for verb_id in repo.all_verb_ids() {
                let Some(mut verb) = repo.verb(&verb_id)? else { continue };
                report.entities_processed += 1;
                if report.entities_processed % PROGRESS_INTERVAL == 0 {
                    notify(report);
                }
                match (migration.transform)(&verb.metadata) {
                    Ok(Some(metadata)) => {
                        verb.metadata = metadata;
                        repo.write_full_verb(verb)?;
                        report.entities_modified += 1;
                    }
                    Ok(None) => {}
                    Err(error) => {
                        report.errors.push(MigrationErrorRecord {
                            migration_id: migration.id.clone(),
                            entity_id: verb_id,
                            error,
                        });
                        if report.errors.len() >= options.max_errors {
                            return Ok(false);
                        }
                    }
                }
            }
        }
        notify(report);
        Ok(true)
    }

    /// Evaluates transforms without mutating anything.
    fn dry_run(
        &self,
        pending: &[Arc<Migration>],
        branches: &[String],
    ) -> StoreResult<DryRunReport> {
        let mut report = DryRunReport {
            pending_migrations: pending
                .iter()
                .map(|migration| migration.id.clone())
                .collect(),
            ..Default::default()
        };
        for branch in branches {
            let repo = if branch == self.current_branch() {
                None
            } else {
                Some(self.checkout(branch)?)
            };
            let repo = repo.as_ref().unwrap_or(self);
            for migration in pending {
                let record =
                    |entity_id: Uuid, before: &Metadata, after: Metadata, report: &mut DryRunReport| {
                        report.affected_entities += 1;
                        if report.sample_changes.len() < SAMPLE_LIMIT {
                            report.sample_changes.push(SampleChange {
                                migration_id: migration.id.clone(),
                                entity_id,
                                before: Value::Object(before.clone()),
                                after: Value::Object(after),
                            });
                        }
                    };
                if matches!(
                    migration.applies,
                    MigrationApplies::Nouns | MigrationApplies::Both
                ) {
                    for id in repo.indexes().all_noun_ids() {
                        let Some(noun) = repo.get(&id)? else { continue };
                        if let Ok(Some(after)) = (migration.transform)(&noun.metadata) {
                            record(id, &noun.metadata, after, &mut report);
                        }
                    }
                }
                if matches!(
                    migration.applies,
                    MigrationApplies::Verbs | MigrationApplies::Both
                ) {
                    for verb_id in repo.all_verb_ids() {
                        let Some(verb) = repo.verb(&verb_id)? else { continue };
                        if let Ok(Some(after)) = (migration.transform)(&verb.metadata) {
                            record(verb_id, &verb.metadata, after, &mut report);
                        }
                    }
                }
            }
        }
        // A coarse planning figure: roughly one entity per millisecond.
        report.estimated_time_ms = report.affected_entities as u64;
        Ok(report)
    }
}
