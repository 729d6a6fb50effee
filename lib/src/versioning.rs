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

//! Per-entity version snapshots.
//!
//! Each save records an [`EntityVersion`] whose content hash points into the
//! blob store, so identical saves deduplicate to the existing version number.
//! Version logs are branch-scoped: they live in the branch overlay at
//! `_versions/<shard>/<uuid>.json`.

use pollster::FutureExt as _;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::backend::BackendError;
use crate::backend::Deadline;
use crate::content_hash::canonical_json_bytes;
use crate::entity::FORMAT_VERSION;
use crate::entity::MillisSinceEpoch;
use crate::entity::Noun;
use crate::object_id::Hash;
use crate::repo::Repo;
use crate::store::StoreError;
use crate::store::StoreResult;
use crate::store::ensure_version;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EntityVersion {
    pub entity_id: Uuid,
    pub version: u32,
    pub content_hash: Hash,
    pub saved_at: MillisSinceEpoch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub by_branch: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct VersionLog {
    version: u32,
    entries: Vec<EntityVersion>,
}

impl Default for VersionLog {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            entries: vec![],
        }
    }
}

/// Picks a version by number or by tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    Number(u32),
    Tag(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub path: String,
    pub old_value: Value,
    pub new_value: Value,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VersionDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<FieldChange>,
    pub total_changes: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PruneOptions {
    /// Keep the N most recent versions.
    pub keep_recent: Option<usize>,
    /// Keep every tagged version regardless of age.
    pub keep_tagged: bool,
}

/// Version operations scoped to one repo handle (and therefore one branch).
pub struct Versions<'a> {
    repo: &'a Repo,
}

impl Repo {
    pub fn versions(&self) -> Versions<'_> {
        Versions { repo: self }
    }
}

impl Versions<'_> {
    fn log(&self, id: &Uuid) -> StoreResult<VersionLog> {
        let key = self.repo.keyspace().versions(id);
        let Some(log) = self
            .repo
            .store()
            .get_doc::<VersionLog>(&key, Deadline::NONE)
            .block_on()?
        else {
            return Ok(VersionLog::default());
        };
        ensure_version(log.version)?;
        Ok(log)
    }

    fn save_log(&self, id: &Uuid, log: &VersionLog) -> StoreResult<()> {
        let key = self.repo.keyspace().versions(id);
        self.repo
            .store()
            .put_doc_now(&key, log, Deadline::NONE)
            .block_on()
    }

    fn find<'log>(
        &self,
        log: &'log VersionLog,
        id: &Uuid,
        selector: &VersionSelector,
    ) -> StoreResult<&'log EntityVersion> {
        let found = match selector {
            VersionSelector::Number(version) => {
                log.entries.iter().find(|entry| entry.version == *version)
            }
            VersionSelector::Tag(tag) => log
                .entries
                .iter()
                .find(|entry| entry.tag.as_deref() == Some(tag.as_str())),
        };
        found.ok_or(StoreError::NotFound(*id))
    }

    /// Snapshots the entity's current state. An identical prior save (same
    /// content hash as the latest version) returns the existing version
    /// number instead of growing the log.
    pub fn save(
        &self,
        id: &Uuid,
        tag: Option<String>,
        description: Option<String>,
    ) -> StoreResult<u32> {
        let noun = self.repo.get(id)?.ok_or(StoreError::NotFound(*id))?;
        let bytes = canonical_json_bytes(&noun)
            .map_err(|err| StoreError::Backend(BackendError::Other(err.into())))?;
        let content_hash = self
            .repo
            .store()
            .blobs()
            .put(&bytes, Deadline::NONE)
            .block_on()?;
        let mut log = self.log(id)?;
        if let Some(latest) = log.entries.last()
            && latest.content_hash == content_hash
        {
            return Ok(latest.version);
        }
        let version = log.entries.last().map_or(1, |entry| entry.version + 1);
        log.entries.push(EntityVersion {
            entity_id: *id,
            version,
            content_hash,
            saved_at: MillisSinceEpoch::now(),
            tag,
            description,
            by_branch: self.repo.current_branch().to_string(),
        });
        self.save_log(id, &log)?;
        Ok(version)
    }

    pub fn list(&self, id: &Uuid) -> StoreResult<Vec<EntityVersion>> {
        Ok(self.log(id)?.entries)
    }

    pub fn has_versions(&self, id: &Uuid) -> StoreResult<bool> {
        Ok(!self.log(id)?.entries.is_empty())
    }

    pub fn count(&self, id: &Uuid) -> StoreResult<usize> {
        Ok(self.log(id)?.entries.len())
    }

    pub fn get_latest(&self, id: &Uuid) -> StoreResult<Option<EntityVersion>> {
        Ok(self.log(id)?.entries.last().cloned())
    }

    pub fn get_version_by_tag(&self, id: &Uuid, tag: &str) -> StoreResult<Option<EntityVersion>> {
        Ok(self
            .log(id)?
            .entries
            .into_iter()
            .find(|entry| entry.tag.as_deref() == Some(tag)))
    }

    /// The snapshotted entity, read fresh from the blob store.
    pub fn get_content(&self, id: &Uuid, selector: &VersionSelector) -> StoreResult<Noun> {
        let log = self.log(id)?;
        let entry = self.find(&log, id, selector)?;
        let bytes = self
            .repo
            .store()
            .blobs()
            .get(&entry.content_hash, Deadline::NONE)
            .block_on()?;
        serde_json::from_slice(&bytes).map_err(|err| {
            StoreError::Backend(BackendError::Read {
                key: entry.content_hash.hex(),
                source: err.into(),
            })
        })
    }

    /// Overwrites the current entity with the stored snapshot, verbatim.
    /// Restoring the same version twice is idempotent.
    pub fn restore(&self, id: &Uuid, selector: &VersionSelector) -> StoreResult<()> {
        let noun = self.get_content(id, selector)?;
        self.repo.write_full_noun(noun)
    }

    /// Restores the version before the latest.
    pub fn undo(&self, id: &Uuid) -> StoreResult<()> {
        let log = self.log(id)?;
        let Some(previous) = log.entries.iter().nth_back(1) else {
            return Err(StoreError::InvalidArgument(format!(
                "entity {id} has no earlier version to undo to"
            )));
        };
        let version = previous.version;
        self.restore(id, &VersionSelector::Number(version))
    }

    /// Saves the current state, then restores the selected version, so the
    /// pre-revert state remains reachable.
    pub fn revert(&self, id: &Uuid, selector: &VersionSelector) -> StoreResult<u32> {
        let saved = self.save(id, None, Some("pre-revert".to_string()))?;
        self.restore(id, selector)?;
        Ok(saved)
    }

    /// Drops old versions, keeping the N most recent and/or every tagged
    /// version. Returns how many were removed.
    pub fn prune(&self, id: &Uuid, options: PruneOptions) -> StoreResult<usize> {
        let mut log = self.log(id)?;
        let total = log.entries.len();
        let keep_recent = options.keep_recent.unwrap_or(total);
        let cutoff = total.saturating_sub(keep_recent);
        let entries = std::mem::take(&mut log.entries);
        log.entries = entries
            .into_iter()
            .enumerate()
            .filter(|(index, entry)| {
                *index >= cutoff || (options.keep_tagged && entry.tag.is_some())
            })
            .map(|(_, entry)| entry)
            .collect();
        let removed = total - log.entries.len();
        if removed > 0 {
            self.save_log(id, &log)?;
        }
        Ok(removed)
    }

    /// Structural diff between two versions: dot-joined paths that were
    /// added, removed, or modified.
    pub fn compare(
        &self,
        id: &Uuid,
        older: &VersionSelector,
        newer: &VersionSelector,
    ) -> StoreResult<VersionDiff> {
        let old_value = serde_json::to_value(self.get_content(id, older)?)
            .map_err(|err| StoreError::Backend(BackendError::Other(err.into())))?;
        let new_value = serde_json::to_value(self.get_content(id, newer)?)
            .map_err(|err| StoreError::Backend(BackendError::Other(err.into())))?;
        let mut diff = VersionDiff::default();
        diff_values("", &old_value, &new_value, &mut diff);
        diff.total_changes = diff.added.len() + diff.removed.len() + diff.modified.len();
        Ok(diff)
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn diff_values(path: &str, old_value: &Value, new_value: &Value, diff: &mut VersionDiff) {
    match (old_value, new_value) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, old_child) in old_map {
                match new_map.get(key) {
                    Some(new_child) => {
                        diff_values(&join_path(path, key), old_child, new_child, diff);
                    }
                    None => diff.removed.push(join_path(path, key)),
                }
            }
            for key in new_map.keys() {
                if !old_map.contains_key(key) {
                    diff.added.push(join_path(path, key));
                }
            }
        }
        (old_value, new_value) if old_value != new_value => {
            diff.modified.push(FieldChange {
                path: path.to_string(),
                old_value: old_value.clone(),
                new_value: new_value.clone(),
            });
        }
        _ => {}
    }
}
