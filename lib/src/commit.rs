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

//! Commit objects: parent-linked snapshots forming the store's history.

use std::fmt::Debug;
use std::fmt::Formatter;
use std::sync::Arc;

use pollster::FutureExt as _;
use serde::Deserialize;
use serde::Serialize;

use crate::backend::BackendError;
use crate::backend::BackendResult;
use crate::backend::Deadline;
use crate::blob_store::BlobStore;
use crate::content_hash::canonical_json_bytes;
use crate::content_hash::hash_bytes;
use crate::entity::FORMAT_VERSION;
use crate::entity::Metadata;
use crate::entity::MillisSinceEpoch;
use crate::object_id::Hash;

/// Serialized commit form. `parent` is `NULL_HASH` for the initial commit
/// only; `tree` is `NULL_HASH` unless the commit captured entity state.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CommitData {
    pub version: u32,
    pub tree: Hash,
    pub parent: Hash,
    pub author: String,
    pub message: String,
    pub timestamp: MillisSinceEpoch,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A commit together with its content hash.
#[derive(Clone, PartialEq, Eq)]
pub struct Commit {
    id: Hash,
    data: Arc<CommitData>,
}

impl Debug for Commit {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        f.debug_struct("Commit").field("id", &self.id).finish()
    }
}

impl Commit {
    pub fn new(id: Hash, data: Arc<CommitData>) -> Self {
        Self { id, data }
    }

    pub fn id(&self) -> &Hash {
        &self.id
    }

    pub fn data(&self) -> &CommitData {
        &self.data
    }

    pub fn tree(&self) -> &Hash {
        &self.data.tree
    }

    pub fn parent(&self) -> &Hash {
        &self.data.parent
    }

    pub fn author(&self) -> &str {
        &self.data.author
    }

    pub fn message(&self) -> &str {
        &self.data.message
    }

    pub fn timestamp(&self) -> MillisSinceEpoch {
        self.data.timestamp
    }

    pub fn metadata(&self) -> &Metadata {
        &self.data.metadata
    }

    /// True for the initial commit, whose parent is the `NULL_HASH` sentinel.
    pub fn is_initial(&self) -> bool {
        self.data.parent.is_null()
    }

    /// Writes the commit blob and returns the commit with its content hash.
    pub async fn write(
        blobs: &BlobStore,
        data: CommitData,
        deadline: Deadline,
    ) -> BackendResult<Self> {
        let bytes =
            canonical_json_bytes(&data).map_err(|err| BackendError::Other(err.into()))?;
        let id = hash_bytes(&bytes);
        blobs.put(&bytes, deadline).await?;
        Ok(Self::new(id, Arc::new(data)))
    }

    pub async fn read(blobs: &BlobStore, id: &Hash, deadline: Deadline) -> BackendResult<Self> {
        let bytes = blobs.get(id, deadline).await?;
        let data: CommitData =
            serde_json::from_slice(&bytes).map_err(|err| BackendError::Read {
                key: id.hex(),
                source: err.into(),
            })?;
        if data.version > FORMAT_VERSION {
            return Err(BackendError::IncompatibleFormat {
                found: data.version,
                supported: FORMAT_VERSION,
            });
        }
        Ok(Self::new(id.clone(), Arc::new(data)))
    }
}

/// Walks history from `head` by following parent pointers, yielding one commit
/// at a time with constant heap. Terminates cleanly at the initial commit; the
/// `NULL_HASH` parent is never fetched.
pub fn walk_history<'a>(blobs: &'a BlobStore, head: &Hash, deadline: Deadline) -> HistoryWalk<'a> {
    HistoryWalk {
        blobs,
        deadline,
        next: (!head.is_null()).then(|| head.clone()),
    }
}

pub struct HistoryWalk<'a> {
    blobs: &'a BlobStore,
    deadline: Deadline,
    next: Option<Hash>,
}

impl Iterator for HistoryWalk<'_> {
    type Item = BackendResult<Commit>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next.take()?;
        match Commit::read(self.blobs, &id, self.deadline).block_on() {
            Ok(commit) => {
                self.next = (!commit.parent().is_null()).then(|| commit.parent().clone());
                Some(Ok(commit))
            }
            Err(err) => Some(Err(err)),
        }
    }
}
