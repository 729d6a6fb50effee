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

//! Named refs: branch heads stored as gzipped JSON documents in the global
//! `_cow/ref:` keyspace.

use std::io::Read as _;
use std::io::Write as _;
use std::sync::Arc;
use std::sync::Mutex;

use pollster::FutureExt as _;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::backend::Backend;
use crate::backend::BackendError;
use crate::backend::Deadline;
use crate::backend::list_all;
use crate::entity::FORMAT_VERSION;
use crate::entity::Metadata;
use crate::entity::MillisSinceEpoch;
use crate::keys::REF_HEADS_PREFIX;
use crate::keys::ref_key;
use crate::object_id::Hash;

/// Metadata key marking a ref as system-managed (e.g. migration backups).
pub const REF_TYPE_KEY: &str = "type";
pub const SYSTEM_BACKUP: &str = "system:backup";

/// Persisted ref document.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RefDoc {
    pub version: u32,
    pub commit_hash: Hash,
    pub updated_at: MillisSinceEpoch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl RefDoc {
    pub fn new(commit_hash: Hash, metadata: Option<Metadata>) -> Self {
        Self {
            version: FORMAT_VERSION,
            commit_hash,
            updated_at: MillisSinceEpoch::now(),
            metadata,
        }
    }

    /// True if this ref is tagged `system:backup` (never migrated, hidden
    /// from user-facing branch listings when asked).
    pub fn is_system_backup(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.get(REF_TYPE_KEY))
            .and_then(|value| value.as_str())
            .is_some_and(|value| value == SYSTEM_BACKUP)
    }
}

/// Normalizes a ref name to its full form. `main` and `heads/main` both
/// resolve to `refs/heads/main`; an already-full name passes through without
/// being double-normalized.
pub fn resolve_ref_name(name: &str) -> String {
    if let Some(rest) = name.strip_prefix("refs/") {
        format!("refs/{rest}")
    } else if let Some(rest) = name.strip_prefix("heads/") {
        format!("refs/heads/{rest}")
    } else {
        format!("refs/heads/{name}")
    }
}

/// Extracts the branch name from a full ref name, if it is a branch head.
pub fn branch_of_ref(full_name: &str) -> Option<&str> {
    full_name.strip_prefix("refs/heads/")
}

#[derive(Debug, Error)]
pub enum RefError {
    #[error("Ref {name} not found")]
    NotFound { name: String },
    #[error(
        "Conflicting commit on {name}: expected head {expected:.12}, found {actual:.12}"
    )]
    ConflictingCommit {
        name: String,
        expected: Hash,
        actual: Hash,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type RefResult<T> = Result<T, RefError>;

/// Reads and advances refs. Advancing uses compare-and-set under an
/// in-process lock: the observed parent must still equal the stored head.
/// Concurrent writers in other processes are out of scope for the embedded
/// adapters.
#[derive(Debug)]
pub struct RefStore {
    backend: Arc<dyn Backend>,
    cas_lock: Mutex<()>,
}

impl RefStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            cas_lock: Mutex::new(()),
        }
    }

    fn encode(doc: &RefDoc) -> RefResult<Vec<u8>> {
        let json = serde_json::to_vec(doc).map_err(|err| BackendError::Other(err.into()))?;
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder
            .write_all(&json)
            .and_then(|()| encoder.finish())
            .map_err(|err| RefError::Backend(BackendError::Other(err.into())))
    }

    fn decode(name: &str, bytes: &[u8]) -> RefResult<RefDoc> {
        let mut json = Vec::new();
        flate2::read::GzDecoder::new(bytes)
            .read_to_end(&mut json)
            .map_err(|err| BackendError::Read {
                key: ref_key(name),
                source: err.into(),
            })?;
        let doc: RefDoc = serde_json::from_slice(&json).map_err(|err| BackendError::Read {
            key: ref_key(name),
            source: err.into(),
        })?;
        if doc.version > FORMAT_VERSION {
            return Err(RefError::Backend(BackendError::IncompatibleFormat {
                found: doc.version,
                supported: FORMAT_VERSION,
            }));
        }
        Ok(doc)
    }

    /// Reads a ref by any accepted name form. Returns `None` if absent.
    pub fn read(&self, name: &str, deadline: Deadline) -> RefResult<Option<RefDoc>> {
        let full = resolve_ref_name(name);
        let bytes = self.backend.get(&ref_key(&full), deadline).block_on()?;
        bytes.map(|bytes| Self::decode(&full, &bytes)).transpose()
    }

    pub fn read_required(&self, name: &str, deadline: Deadline) -> RefResult<RefDoc> {
        self.read(name, deadline)?.ok_or_else(|| RefError::NotFound {
            name: resolve_ref_name(name),
        })
    }

    /// Writes a ref unconditionally. Used for store init and fork, where the
    /// ref must not already exist.
    pub fn create(&self, name: &str, doc: &RefDoc, deadline: Deadline) -> RefResult<()> {
        let _guard = self.cas_lock.lock().unwrap();
        let full = resolve_ref_name(name);
        let bytes = Self::encode(doc)?;
        self.backend.put(&ref_key(&full), &bytes, deadline).block_on()?;
        Ok(())
    }

    /// Advances a ref with compare-and-set: fails with `ConflictingCommit`
    /// unless the stored head still equals `expected`.
    pub fn compare_and_set(
        &self,
        name: &str,
        expected: &Hash,
        doc: &RefDoc,
        deadline: Deadline,
    ) -> RefResult<()> {
        let _guard = self.cas_lock.lock().unwrap();
        let full = resolve_ref_name(name);
        let key = ref_key(&full);
        let current = self
            .backend
            .get(&key, deadline)
            .block_on()?
            .map(|bytes| Self::decode(&full, &bytes))
            .transpose()?
            .ok_or_else(|| RefError::NotFound { name: full.clone() })?;
        if current.commit_hash != *expected {
            return Err(RefError::ConflictingCommit {
                name: full,
                expected: expected.clone(),
                actual: current.commit_hash,
            });
        }
        let bytes = Self::encode(doc)?;
        self.backend.put(&key, &bytes, deadline).block_on()?;
        Ok(())
    }

    /// Lists every branch head, with its ref document.
    pub fn list_branches(&self, deadline: Deadline) -> RefResult<Vec<(String, RefDoc)>> {
        let keys = list_all(self.backend.as_ref(), REF_HEADS_PREFIX, deadline).block_on()?;
        let mut branches = vec![];
        for key in keys {
            let Some(branch) = key
                .strip_prefix("_cow/ref:refs/heads/")
                .and_then(|rest| rest.strip_suffix(".gz"))
            else {
                continue;
            };
            let doc = self.read_required(branch, deadline)?;
            branches.push((branch.to_string(), doc));
        }
        Ok(branches)
    }
}
