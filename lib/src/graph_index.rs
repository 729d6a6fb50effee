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

//! Bidirectional graph adjacency index.
//!
//! Two maps, `out` keyed by source and `in` keyed by target, are kept in
//! lockstep: every relate inserts into both, every unrelate removes from
//! both. Entries preserve insertion order, which ranks BFS results within a
//! depth level.

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;

use uuid::Uuid;

use crate::entity::Verb;
use crate::entity::VerbType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjacencyEntry {
    pub verb_type: VerbType,
    pub verb_id: Uuid,
    /// Target for `out` entries, source for `in` entries.
    pub other: Uuid,
}

/// Traversal direction for relations queries and BFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    Out,
    In,
    #[default]
    Both,
}

/// Filter for [`GraphIndex::relations`]. The no-filter query pages over
/// every relation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationsQuery {
    pub from: Option<Uuid>,
    pub to: Option<Uuid>,
    pub verb_type: Option<VerbType>,
    /// Defaults to 100 when unset.
    pub limit: Option<usize>,
    pub offset: usize,
}

pub const DEFAULT_RELATIONS_LIMIT: usize = 100;

#[derive(Debug, Default)]
pub struct GraphIndex {
    out: HashMap<Uuid, Vec<AdjacencyEntry>>,
    r#in: HashMap<Uuid, Vec<AdjacencyEntry>>,
    /// Verb id to (from, to, type); the authority for unrelate and paging.
    verbs: indexmap::IndexMap<Uuid, (Uuid, Uuid, VerbType)>,
}

impl GraphIndex {
    pub fn insert(&mut self, verb: &Verb) {
        if self.verbs.contains_key(&verb.id) {
            self.remove(&verb.id);
        }
        self.out.entry(verb.from).or_default().push(AdjacencyEntry {
            verb_type: verb.verb_type,
            verb_id: verb.id,
            other: verb.to,
        });
        self.r#in.entry(verb.to).or_default().push(AdjacencyEntry {
            verb_type: verb.verb_type,
            verb_id: verb.id,
            other: verb.from,
        });
        self.verbs.insert(verb.id, (verb.from, verb.to, verb.verb_type));
    }

    pub fn remove(&mut self, verb_id: &Uuid) -> bool {
        let Some((from, to, _)) = self.verbs.shift_remove(verb_id) else {
            return false;
        };
        if let Some(entries) = self.out.get_mut(&from) {
            entries.retain(|entry| entry.verb_id != *verb_id);
            if entries.is_empty() {
                self.out.remove(&from);
            }
        }
        if let Some(entries) = self.r#in.get_mut(&to) {
            entries.retain(|entry| entry.verb_id != *verb_id);
            if entries.is_empty() {
                self.r#in.remove(&to);
            }
        }
        true
    }

    pub fn clear(&mut self) {
        self.out.clear();
        self.r#in.clear();
        self.verbs.clear();
    }

    pub fn len(&self) -> usize {
        self.verbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verbs.is_empty()
    }

    pub fn contains(&self, verb_id: &Uuid) -> bool {
        self.verbs.contains_key(verb_id)
    }

    pub fn endpoints(&self, verb_id: &Uuid) -> Option<(Uuid, Uuid)> {
        self.verbs.get(verb_id).map(|(from, to, _)| (*from, *to))
    }

    /// Every indexed verb with its type, in insertion order.
    pub fn verb_entries(&self) -> impl Iterator<Item = (Uuid, VerbType)> + '_ {
        self.verbs
            .iter()
            .map(|(verb_id, (_, _, verb_type))| (*verb_id, *verb_type))
    }

    /// Matching verb ids, paginated. Insertion order throughout.
    pub fn relations(&self, query: RelationsQuery) -> Vec<Uuid> {
        let limit = query.limit.unwrap_or(DEFAULT_RELATIONS_LIMIT);
        let matches = |&(from, to, verb_type): &(Uuid, Uuid, VerbType)| {
            query.from.is_none_or(|want| from == want)
                && query.to.is_none_or(|want| to == want)
                && query.verb_type.is_none_or(|want| verb_type == want)
        };
        // The `from`-only query is the hot path; walk that adjacency list
        // instead of every verb.
        if let (Some(from), None) = (query.from, query.to) {
            return self
                .out
                .get(&from)
                .into_iter()
                .flatten()
                .filter(|entry| query.verb_type.is_none_or(|want| entry.verb_type == want))
                .map(|entry| entry.verb_id)
                .skip(query.offset)
                .take(limit)
                .collect();
        }
        if let (None, Some(to)) = (query.from, query.to) {
            return self
                .r#in
                .get(&to)
                .into_iter()
                .flatten()
                .filter(|entry| query.verb_type.is_none_or(|want| entry.verb_type == want))
                .map(|entry| entry.verb_id)
                .skip(query.offset)
                .take(limit)
                .collect();
        }
        self.verbs
            .iter()
            .filter(|(_, value)| matches(value))
            .map(|(verb_id, _)| *verb_id)
            .skip(query.offset)
            .take(limit)
            .collect()
    }

    /// Breadth-first traversal from `start` up to `max_depth` hops. Returns
    /// visited noun ids (excluding `start`) ranked by depth, then by
    /// insertion order within a depth level.
    pub fn bfs(
        &self,
        start: Uuid,
        max_depth: usize,
        direction: Direction,
        verb_type: Option<VerbType>,
    ) -> Vec<(Uuid, usize)> {
        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::from([(start, 0usize)]);
        let mut result = vec![];
        while let Some((node, depth)) = queue.pop_front() {
            if depth == max_depth {
                continue;
            }
            let neighbors = |entries: Option<&Vec<AdjacencyEntry>>| {
                entries
                    .into_iter()
                    .flatten()
                    .filter(|entry| verb_type.is_none_or(|want| entry.verb_type == want))
                    .map(|entry| entry.other)
                    .collect::<Vec<_>>()
            };
            let mut next = vec![];
            match direction {
                Direction::Out => next.extend(neighbors(self.out.get(&node))),
                Direction::In => next.extend(neighbors(self.r#in.get(&node))),
                Direction::Both => {
                    next.extend(neighbors(self.out.get(&node)));
                    next.extend(neighbors(self.r#in.get(&node)));
                }
            }
            for other in next {
                if visited.insert(other) {
                    result.push((other, depth + 1));
                    queue.push_back((other, depth + 1));
                }
            }
        }
        result
    }
}
