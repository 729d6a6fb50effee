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

//! Write-through entity cache.
//!
//! Every entity write lands here before (and while) the durable write is in
//! flight, and every read probes here before the adapter. That is the whole
//! read-after-write guarantee: `add` followed by `get` or `relate` observes
//! the entity on this instance no matter how far behind the background flush
//! is. Entries are dropped only by `flush()`, after the durable writes have
//! been acknowledged.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use uuid::Uuid;

use crate::entity::Noun;
use crate::entity::Verb;

/// Entries are keyed by `(overlay scope, id)`: one store instance serves
/// several branch handles, and a dirty entity on one branch must not leak
/// into reads on another.
#[derive(Debug, Default)]
pub struct WriteThroughCache {
    nouns: Mutex<HashMap<(String, Uuid), Arc<Noun>>>,
    verbs: Mutex<HashMap<(String, Uuid), Arc<Verb>>>,
}

impl WriteThroughCache {
    pub fn insert_noun(&self, scope: &str, noun: Arc<Noun>) {
        self.nouns
            .lock()
            .unwrap()
            .insert((scope.to_string(), noun.id), noun);
    }

    pub fn insert_verb(&self, scope: &str, verb: Arc<Verb>) {
        self.verbs
            .lock()
            .unwrap()
            .insert((scope.to_string(), verb.id), verb);
    }

    pub fn noun(&self, scope: &str, id: &Uuid) -> Option<Arc<Noun>> {
        self.nouns
            .lock()
            .unwrap()
            .get(&(scope.to_string(), *id))
            .cloned()
    }

    pub fn verb(&self, scope: &str, id: &Uuid) -> Option<Arc<Verb>> {
        self.verbs
            .lock()
            .unwrap()
            .get(&(scope.to_string(), *id))
            .cloned()
    }

    /// Drops one entity, e.g. when it is deleted before the flush completes.
    pub fn forget(&self, scope: &str, id: &Uuid) {
        self.nouns.lock().unwrap().remove(&(scope.to_string(), *id));
        self.verbs.lock().unwrap().remove(&(scope.to_string(), *id));
    }

    /// Drops everything. Only called once the durable writes are acknowledged.
    pub fn clear(&self) {
        self.nouns.lock().unwrap().clear();
        self.verbs.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.nouns.lock().unwrap().len() + self.verbs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
