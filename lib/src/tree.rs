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

//! Git-shaped tree objects: ordered lists of named entries pointing to blobs
//! or subtrees.

use pollster::FutureExt as _;
use serde::Deserialize;
use serde::Serialize;

use crate::backend::BackendError;
use crate::backend::BackendResult;
use crate::backend::Deadline;
use crate::blob_store::BlobStore;
use crate::content_hash::canonical_json_bytes;
use crate::entity::FORMAT_VERSION;
use crate::object_id::Hash;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TreeEntryKind {
    Blob,
    Tree,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct TreeEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TreeEntryKind,
    pub hash: Hash,
}

/// An ordered list of `{name, type, hash}` entries. Entries are kept sorted by
/// name so equal logical trees always serialize, and therefore hash,
/// identically.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Tree {
    version: u32,
    entries: Vec<TreeEntry>,
}

impl Default for Tree {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            entries: vec![],
        }
    }
}

impl Tree {
    pub fn from_sorted_entries(entries: Vec<TreeEntry>) -> Self {
        debug_assert!(entries.is_sorted_by(|a, b| a.name < b.name));
        Self {
            version: FORMAT_VERSION,
            entries,
        }
    }

    pub fn from_entries(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Self::from_sorted_entries(entries)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = &TreeEntry> {
        self.entries.iter()
    }

    pub fn entry(&self, name: &str) -> Option<&TreeEntry> {
        let index = self
            .entries
            .binary_search_by(|entry| entry.name.as_str().cmp(name))
            .ok()?;
        Some(&self.entries[index])
    }

    /// Canonical byte form: compact JSON, entries pre-sorted by name.
    pub fn to_bytes(&self) -> BackendResult<Vec<u8>> {
        canonical_json_bytes(self).map_err(|err| BackendError::Other(err.into()))
    }

    /// Writes the tree blob and returns its content hash.
    pub async fn write(&self, blobs: &BlobStore, deadline: Deadline) -> BackendResult<Hash> {
        blobs.put(&self.to_bytes()?, deadline).await
    }

    /// Reads the tree addressed by `hash`. The `NULL_HASH` sentinel denotes
    /// the empty tree and is never fetched.
    pub async fn read(blobs: &BlobStore, hash: &Hash, deadline: Deadline) -> BackendResult<Self> {
        if hash.is_null() {
            return Ok(Self::default());
        }
        let bytes = blobs.get(hash, deadline).await?;
        let tree: Self =
            serde_json::from_slice(&bytes).map_err(|err| BackendError::Read {
                key: hash.hex(),
                source: err.into(),
            })?;
        if tree.version > FORMAT_VERSION {
            return Err(BackendError::IncompatibleFormat {
                found: tree.version,
                supported: FORMAT_VERSION,
            });
        }
        Ok(tree)
    }
}

/// An entry yielded by [`walk`], with its `/`-joined path from the root.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct WalkedEntry {
    pub path: String,
    pub kind: TreeEntryKind,
    pub hash: Hash,
}

/// Walks the tree rooted at `root` depth-first, yielding every entry lazily.
/// Subtrees are fetched on demand; a `NULL_HASH` root yields nothing, and the
/// sentinel is guarded at every descent.
pub fn walk<'a>(blobs: &'a BlobStore, root: &Hash, deadline: Deadline) -> TreeWalk<'a> {
    TreeWalk {
        blobs,
        deadline,
        stack: vec![],
        pending_root: (!root.is_null()).then(|| root.clone()),
    }
}

pub struct TreeWalk<'a> {
    blobs: &'a BlobStore,
    deadline: Deadline,
    stack: Vec<(String, std::vec::IntoIter<TreeEntry>)>,
    pending_root: Option<Hash>,
}

impl TreeWalk<'_> {
    fn push_tree(&mut self, prefix: String, hash: &Hash) -> BackendResult<()> {
        let tree = Tree::read(self.blobs, hash, self.deadline).block_on()?;
        self.stack.push((prefix, tree.entries.into_iter()));
        Ok(())
    }
}

impl Iterator for TreeWalk<'_> {
    type Item = BackendResult<WalkedEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(root) = self.pending_root.take()
            && let Err(err) = self.push_tree(String::new(), &root)
        {
            return Some(Err(err));
        }
        loop {
            let (prefix, entries) = self.stack.last_mut()?;
            let Some(entry) = entries.next() else {
                self.stack.pop();
                continue;
            };
            let path = if prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{prefix}/{}", entry.name)
            };
            match entry.kind {
                TreeEntryKind::Blob => {
                    return Some(Ok(WalkedEntry {
                        path,
                        kind: TreeEntryKind::Blob,
                        hash: entry.hash,
                    }));
                }
                TreeEntryKind::Tree => {
                    if entry.hash.is_null() {
                        continue;
                    }
                    let result = WalkedEntry {
                        path: path.clone(),
                        kind: TreeEntryKind::Tree,
                        hash: entry.hash.clone(),
                    };
                    if let Err(err) = self.push_tree(path, &entry.hash) {
                        return Some(Err(err));
                    }
                    return Some(Ok(result));
                }
            }
        }
    }
}
