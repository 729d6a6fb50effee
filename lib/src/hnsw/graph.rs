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

//! A single Hierarchical Navigable Small World graph.
//!
//! Standard construction: insertion level drawn from a geometric
//! distribution, candidate search per layer with an `ef` frontier, neighbor
//! selection by the diversity-preserving heuristic, bidirectional links
//! pruned to `M` (`Mmax0` at layer 0).

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::HashMap;
use std::collections::HashSet;

use rand::Rng as _;
use rand::SeedableRng as _;
use rand::rngs::StdRng;
use uuid::Uuid;

use crate::config::DistanceMetric;
use crate::config::HnswParams;

/// Hard cap on drawn levels; the geometric draw crosses this only with
/// astronomically many nodes.
const MAX_LEVEL: usize = 32;

pub fn distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        DistanceMetric::Euclidean => a
            .iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt(),
        DistanceMetric::Cosine => {
            let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
            let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm_a == 0.0 || norm_b == 0.0 {
                1.0
            } else {
                1.0 - dot / (norm_a * norm_b)
            }
        }
        DistanceMetric::InnerProduct => -a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
    }
}

/// `(distance, id)` with a total order: by distance (`total_cmp`), ties by id
/// so search results are deterministic.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Scored {
    dist: f32,
    id: Uuid,
}

impl Eq for Scored {}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.dist
            .total_cmp(&other.dist)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
pub struct HnswNode {
    pub vector: Vec<f32>,
    pub level: usize,
    /// Neighbor lists, one per layer `0..=level`.
    pub links: Vec<Vec<Uuid>>,
}

#[derive(Debug)]
pub struct HnswGraph {
    params: HnswParams,
    metric: DistanceMetric,
    nodes: HashMap<Uuid, HnswNode>,
    entry: Option<Uuid>,
    max_level: usize,
    level_lambda: f64,
    rng: StdRng,
}

impl HnswGraph {
    pub fn new(params: HnswParams, metric: DistanceMetric) -> Self {
        Self::with_seed(params, metric, rand::rng().random())
    }

    pub fn with_seed(params: HnswParams, metric: DistanceMetric, seed: u64) -> Self {
        Self {
            params,
            metric,
            nodes: HashMap::new(),
            entry: None,
            max_level: 0,
            level_lambda: 1.0 / (params.m as f64).ln(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &Uuid) -> Option<&HnswNode> {
        self.nodes.get(id)
    }

    pub fn vector(&self, id: &Uuid) -> Option<&[f32]> {
        self.nodes.get(id).map(|node| node.vector.as_slice())
    }

    pub fn entry_point(&self) -> Option<Uuid> {
        self.entry
    }

    pub fn max_level(&self) -> usize {
        self.max_level
    }

    pub fn ids(&self) -> impl Iterator<Item = &Uuid> {
        self.nodes.keys()
    }

    /// Rough resident size: vectors plus link tables.
    pub fn memory_bytes(&self) -> usize {
        self.nodes
            .values()
            .map(|node| {
                node.vector.len() * size_of::<f32>()
                    + node.links.iter().map(|layer| layer.len() * size_of::<Uuid>()).sum::<usize>()
                    + 64
            })
            .sum()
    }

    fn dist(&self, a: &[f32], b: &[f32]) -> f32 {
        distance(self.metric, a, b)
    }

    fn dist_to(&self, query: &[f32], id: &Uuid) -> f32 {
        self.dist(query, &self.nodes[id].vector)
    }

    fn random_level(&mut self) -> usize {
        let uniform: f64 = self.rng.random();
        ((-uniform.ln() * self.level_lambda) as usize).min(MAX_LEVEL)
    }

    fn max_links(&self, layer: usize) -> usize {
        if layer == 0 {
            self.params.m_max0
        } else {
            self.params.m
        }
    }

    /// Best-first search within one layer. Returns up to `ef` closest nodes,
    /// ascending by distance.
    fn search_layer(&self, query: &[f32], entry: Scored, ef: usize, layer: usize) -> Vec<Scored> {
        let mut visited: HashSet<Uuid> = HashSet::from([entry.id]);
        // Frontier is a min-heap, result set a bounded max-heap.
        let mut frontier = BinaryHeap::from([Reverse(entry)]);
        let mut results = BinaryHeap::from([entry]);
        while let Some(Reverse(candidate)) = frontier.pop() {
            let worst = results.peek().unwrap().dist;
            if candidate.dist > worst && results.len() >= ef {
                break;
            }
            let node = &self.nodes[&candidate.id];
            let Some(neighbors) = node.links.get(layer) else {
                continue;
            };
            for neighbor in neighbors {
                if !visited.insert(*neighbor) {
                    continue;
                }
                // Restored adjacency may reference nodes that were removed
                // after the last persisted snapshot.
                let Some(neighbor_node) = self.nodes.get(neighbor) else {
                    continue;
                };
                let scored = Scored {
                    dist: self.dist(query, &neighbor_node.vector),
                    id: *neighbor,
                };
                if results.len() < ef || scored.dist < results.peek().unwrap().dist {
                    frontier.push(Reverse(scored));
                    results.push(scored);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }
        results.into_sorted_vec()
    }

    /// Diversity-preserving neighbor selection: a candidate is kept only if
    /// it is closer to the query than to every already-selected neighbor.
    fn select_neighbors(&self, candidates: &[Scored], m: usize) -> Vec<Scored> {
        let mut selected: Vec<Scored> = vec![];
        for candidate in candidates {
            if selected.len() >= m {
                break;
            }
            let candidate_vector = &self.nodes[&candidate.id].vector;
            let diverse = selected.iter().all(|existing| {
                self.dist(candidate_vector, &self.nodes[&existing.id].vector) > candidate.dist
            });
            if diverse {
                selected.push(*candidate);
            }
        }
        // Backfill with the nearest skipped candidates if diversity starved
        // the list.
        if selected.len() < m {
            for candidate in candidates {
                if selected.len() >= m {
                    break;
                }
                if !selected.contains(candidate) {
                    selected.push(*candidate);
                }
            }
        }
        selected
    }

    fn prune_links(&mut self, id: Uuid, layer: usize) {
        let limit = self.max_links(layer);
        let node = &self.nodes[&id];
        if node.links[layer].len() <= limit {
            return;
        }
        let origin = node.vector.clone();
        let mut candidates: Vec<Scored> = node.links[layer]
            .iter()
            .filter_map(|neighbor| {
                let neighbor_node = self.nodes.get(neighbor)?;
                Some(Scored {
                    dist: self.dist(&origin, &neighbor_node.vector),
                    id: *neighbor,
                })
            })
            .collect();
        candidates.sort();
        let kept: Vec<Uuid> = self
            .select_neighbors(&candidates, limit)
            .iter()
            .map(|scored| scored.id)
            .collect();
        self.nodes.get_mut(&id).unwrap().links[layer] = kept;
    }

    pub fn insert(&mut self, id: Uuid, vector: Vec<f32>) {
        if self.contains(&id) {
            self.remove(&id);
        }
        let level = self.random_level();
        self.insert_at_level(id, vector, level);
    }

    /// Inserts with a pre-chosen level. Used by the persistence layer when
    /// relinking restored nodes, and by `insert` with a drawn level.
    pub fn insert_at_level(&mut self, id: Uuid, vector: Vec<f32>, level: usize) {
        let node = HnswNode {
            vector: vector.clone(),
            level,
            links: vec![vec![]; level + 1],
        };
        self.nodes.insert(id, node);

        let Some(entry) = self.entry else {
            self.entry = Some(id);
            self.max_level = level;
            return;
        };

        let mut nearest = Scored {
            dist: self.dist_to(&vector, &entry),
            id: entry,
        };
        // Greedy descent through layers above the new node's level.
        for layer in ((level + 1)..=self.max_level).rev() {
            nearest = self.search_layer(&vector, nearest, 1, layer)[0];
        }
        // Link on every shared layer, top down.
        for layer in (0..=level.min(self.max_level)).rev() {
            let candidates =
                self.search_layer(&vector, nearest, self.params.ef_construction, layer);
            let neighbors = self.select_neighbors(&candidates, self.params.m);
            for neighbor in &neighbors {
                self.nodes.get_mut(&id).unwrap().links[layer].push(neighbor.id);
                let neighbor_node = self.nodes.get_mut(&neighbor.id).unwrap();
                if neighbor_node.links.len() > layer {
                    neighbor_node.links[layer].push(id);
                    self.prune_links(neighbor.id, layer);
                }
            }
            if let Some(best) = candidates.first() {
                nearest = *best;
            }
        }
        if level > self.max_level {
            self.max_level = level;
            self.entry = Some(id);
        }
    }

    /// Restores a node verbatim (links included) without re-running
    /// construction. The caller is responsible for restoring a consistent
    /// link structure, e.g. from per-node persistence.
    pub fn restore_node(&mut self, id: Uuid, vector: Vec<f32>, links: Vec<Vec<Uuid>>) {
        let level = links.len().saturating_sub(1);
        self.nodes.insert(id, HnswNode { vector, level, links });
        if self.entry.is_none() || level > self.max_level {
            self.entry = Some(id);
            self.max_level = level;
        }
    }

    /// Overrides the entry point, e.g. from the persisted system document.
    pub fn set_entry(&mut self, entry: Option<Uuid>, max_level: usize) {
        if let Some(id) = entry
            && self.nodes.contains_key(&id)
        {
            self.entry = Some(id);
            self.max_level = max_level;
        }
    }

    pub fn remove(&mut self, id: &Uuid) -> bool {
        let Some(node) = self.nodes.remove(id) else {
            return false;
        };
        // Bidirectional links mean only this node's neighbors can point back.
        for layer in 0..node.links.len() {
            for neighbor in &node.links[layer] {
                if let Some(neighbor_node) = self.nodes.get_mut(neighbor)
                    && let Some(links) = neighbor_node.links.get_mut(layer)
                {
                    links.retain(|linked| linked != id);
                }
            }
        }
        if self.entry == Some(*id) {
            let new_entry = self
                .nodes
                .iter()
                .max_by_key(|(id, node)| (node.level, **id))
                .map(|(id, node)| (*id, node.level));
            match new_entry {
                Some((entry, level)) => {
                    self.entry = Some(entry);
                    self.max_level = level;
                }
                None => {
                    self.entry = None;
                    self.max_level = 0;
                }
            }
        }
        true
    }

    /// Returns up to `k` `(id, distance)` pairs, ascending by distance.
    pub fn search(&self, query: &[f32], k: usize, ef: Option<usize>) -> Vec<(Uuid, f32)> {
        let Some(entry) = self.entry else {
            return vec![];
        };
        let ef = ef.unwrap_or(self.params.ef_search).max(k);
        let mut nearest = Scored {
            dist: self.dist_to(query, &entry),
            id: entry,
        };
        for layer in (1..=self.max_level).rev() {
            nearest = self.search_layer(query, nearest, 1, layer)[0];
        }
        self.search_layer(query, nearest, ef, 0)
            .into_iter()
            .take(k)
            .map(|scored| (scored.id, scored.dist))
            .collect()
    }
}
