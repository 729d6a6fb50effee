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

//! Tombstone set masking deleted entities.
//!
//! Deleting leaves blobs in committed trees; this set keeps such entities out
//! of every read and query path until an `add` with the same id rewrites
//! them. The set persists in the branch overlay (`system/deleted.json`) so a
//! delete of an inherited entity survives reopen.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::entity::FORMAT_VERSION;

/// Persisted tombstone document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeletedDoc {
    pub version: u32,
    pub nouns: BTreeSet<Uuid>,
    pub verbs: BTreeSet<Uuid>,
}

impl Default for DeletedDoc {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            nouns: BTreeSet::new(),
            verbs: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct DeletedIndex {
    nouns: BTreeSet<Uuid>,
    verbs: BTreeSet<Uuid>,
}

impl DeletedIndex {
    pub fn from_doc(doc: DeletedDoc) -> Self {
        Self {
            nouns: doc.nouns,
            verbs: doc.verbs,
        }
    }

    pub fn doc(&self) -> DeletedDoc {
        DeletedDoc {
            version: FORMAT_VERSION,
            nouns: self.nouns.clone(),
            verbs: self.verbs.clone(),
        }
    }

    pub fn tombstone_noun(&mut self, id: Uuid) {
        self.nouns.insert(id);
    }

    pub fn tombstone_verb(&mut self, id: Uuid) {
        self.verbs.insert(id);
    }

    /// A later add with the same id rewrites the entity; the tombstone is
    /// cleared.
    pub fn resurrect_noun(&mut self, id: &Uuid) -> bool {
        self.nouns.remove(id)
    }

    pub fn resurrect_verb(&mut self, id: &Uuid) -> bool {
        self.verbs.remove(id)
    }

    pub fn is_noun_deleted(&self, id: &Uuid) -> bool {
        self.nouns.contains(id)
    }

    pub fn is_verb_deleted(&self, id: &Uuid) -> bool {
        self.verbs.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.nouns.is_empty() && self.verbs.is_empty()
    }

    pub fn clear(&mut self) {
        self.nouns.clear();
        self.verbs.clear();
    }
}
