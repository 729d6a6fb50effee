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

//! Per-type noun/verb counters, persisted as `system/counts.json` after every
//! flush.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;

use crate::entity::FORMAT_VERSION;
use crate::entity::MillisSinceEpoch;
use crate::entity::NounType;
use crate::entity::VerbType;

/// Persisted counts document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CountsDoc {
    pub version: u32,
    pub total_noun_count: u64,
    pub total_verb_count: u64,
    pub entity_counts: BTreeMap<String, u64>,
    pub verb_counts: BTreeMap<String, u64>,
    pub last_updated: MillisSinceEpoch,
}

impl Default for CountsDoc {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            total_noun_count: 0,
            total_verb_count: 0,
            entity_counts: BTreeMap::new(),
            verb_counts: BTreeMap::new(),
            last_updated: MillisSinceEpoch(0),
        }
    }
}

/// Live counters. Totals must agree with the set of visible, non-tombstoned
/// entities on the current branch; on detected mismatch the caller recomputes
/// by full scan.
#[derive(Debug, Default)]
pub struct Counts {
    inner: Mutex<CountsDoc>,
}

impl Counts {
    pub fn from_doc(doc: CountsDoc) -> Self {
        Self {
            inner: Mutex::new(doc),
        }
    }

    pub fn noun_added(&self, noun_type: NounType) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_noun_count += 1;
        *inner
            .entity_counts
            .entry(noun_type.as_str().to_string())
            .or_default() += 1;
    }

    pub fn noun_removed(&self, noun_type: NounType) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_noun_count = inner.total_noun_count.saturating_sub(1);
        let key = noun_type.as_str().to_string();
        if let Some(count) = inner.entity_counts.get_mut(&key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                inner.entity_counts.remove(&key);
            }
        }
    }

    pub fn verb_added(&self, verb_type: VerbType) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_verb_count += 1;
        *inner
            .verb_counts
            .entry(verb_type.as_str().to_string())
            .or_default() += 1;
    }

    pub fn verb_removed(&self, verb_type: VerbType) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_verb_count = inner.total_verb_count.saturating_sub(1);
        let key = verb_type.as_str().to_string();
        if let Some(count) = inner.verb_counts.get_mut(&key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                inner.verb_counts.remove(&key);
            }
        }
    }

    pub fn total_nouns(&self) -> u64 {
        self.inner.lock().unwrap().total_noun_count
    }

    pub fn total_verbs(&self) -> u64 {
        self.inner.lock().unwrap().total_verb_count
    }

    pub fn nouns_of_type(&self, noun_type: NounType) -> u64 {
        self.inner
            .lock()
            .unwrap()
            .entity_counts
            .get(noun_type.as_str())
            .copied()
            .unwrap_or(0)
    }

    /// Snapshot for persistence, stamped with the current time.
    pub fn doc(&self) -> CountsDoc {
        let mut doc = self.inner.lock().unwrap().clone();
        doc.last_updated = MillisSinceEpoch::now();
        doc
    }

    /// Replaces the counters wholesale, e.g. after a full-scan rebuild.
    pub fn replace(&self, doc: CountsDoc) {
        *self.inner.lock().unwrap() = doc;
    }

    /// True if the live counters match `expected` on every total and
    /// per-type entry.
    pub fn agrees_with(&self, expected: &CountsDoc) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.total_noun_count == expected.total_noun_count
            && inner.total_verb_count == expected.total_verb_count
            && inner.entity_counts == expected.entity_counts
            && inner.verb_counts == expected.verb_counts
    }
}
