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

//! The embeddable store surface.
//!
//! A [`Repo`] is a handle scoped to one branch (or to a read-only
//! point-in-time view). Writes go through the write-through cache and the
//! per-id locks; reads consult the cache, then the branch overlay, then the
//! state frozen at the branch's fork point. Commits snapshot the visible
//! entity set into a tree and advance the branch ref with compare-and-set.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use itertools::Itertools as _;
use pollster::FutureExt as _;
use uuid::Uuid;

use crate::backend::Backend;
use crate::backend::BackendError;
use crate::backend::Deadline;
use crate::commit::Commit;
use crate::commit::CommitData;
use crate::commit::walk_history;
use crate::config::StoreConfig;
use crate::content_hash::canonical_json_bytes;
use crate::counts::Counts;
use crate::counts::CountsDoc;
use crate::deleted_index::DeletedDoc;
use crate::embed::Embedder;
use crate::embed::HashingEmbedder;
use crate::entity::EntityData;
use crate::entity::FORMAT_VERSION;
use crate::entity::Metadata;
use crate::entity::MillisSinceEpoch;
use crate::entity::Noun;
use crate::entity::NounType;
use crate::entity::RelationDoc;
use crate::entity::Verb;
use crate::entity::VerbType;
use crate::fs_backend::FsBackend;
use crate::graph_index::RelationsQuery;
use crate::hnsw::HnswIndexStats;
use crate::hnsw::NodeCache;
use crate::hnsw::save_system;
use crate::index::IndexSet;
use crate::keys::Keyspace;
use crate::keys::MAIN_BRANCH;
use crate::memory;
use crate::memory::MemoryLimits;
use crate::memory::MemoryStats;
use crate::mem_backend::MemBackend;
use crate::object_id::Hash;
use crate::object_id::NULL_HASH;
use crate::query;
use crate::query::FindQuery;
use crate::query::RankedMatch;
use crate::query::SearchDimension;
use crate::refs::RefDoc;
use crate::stats::StatisticsDoc;
use crate::store::Store;
use crate::store::StoreError;
use crate::store::StoreResult;
use crate::store::ensure_version;
use crate::tree::Tree;
use crate::tree::TreeEntry;
use crate::tree::TreeEntryKind;
use crate::tree::walk;

const DEFAULT_AUTHOR: &str = "brainy";

/// Per-entity-id keyed locks serializing writers to the same id.
#[derive(Debug, Default)]
struct EntityLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl EntityLocks {
    fn lock_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.locks.lock().unwrap().entry(id).or_default().clone()
    }
}

/// The frozen state a branch inherits from its fork-point commit.
#[derive(Debug, Default)]
struct BaseState {
    entities: HashMap<Uuid, Hash>,
    relations: HashMap<Uuid, Hash>,
}

#[derive(Debug, Clone, Default)]
pub struct AddInput {
    /// Explicit id; also clears an existing tombstone for that id.
    pub id: Option<Uuid>,
    pub noun_type: Option<NounType>,
    /// Explicit embedding; must match the store dimension.
    pub vector: Option<Vec<f32>>,
    /// Text to embed when no vector is given.
    pub text: Option<String>,
    pub data: Option<EntityData>,
    pub metadata: Metadata,
    pub confidence: Option<f64>,
    pub weight: Option<f64>,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateInput {
    pub id: Uuid,
    pub data: Option<EntityData>,
    /// Replaces the entity's metadata wholesale when present.
    pub metadata: Option<Metadata>,
    pub confidence: Option<f64>,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct RelateInput {
    pub from: Uuid,
    pub to: Uuid,
    pub verb_type: Option<VerbType>,
    pub metadata: Metadata,
    pub weight: Option<f64>,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    pub message: String,
    pub author: Option<String>,
    /// Materialize a full tree of entity/relation blobs for time travel.
    pub capture_state: bool,
    pub metadata: Metadata,
}

#[derive(Debug, Clone)]
pub struct ForkOptions {
    /// Capture current state into a commit before branching, so the fork's
    /// base is frozen. Defaults to true.
    pub capture_state: bool,
}

impl Default for ForkOptions {
    fn default() -> Self {
        Self {
            capture_state: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HistoryOptions {
    pub limit: Option<usize>,
    pub branch: Option<String>,
    pub author: Option<String>,
}

/// Per-item outcome report for batched operations.
#[derive(Debug, Clone, Default)]
pub struct BatchReport<T> {
    pub successful: Vec<T>,
    pub failed: Vec<BatchFailure>,
}

#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub index: usize,
    pub error: String,
}

/// One fused query result with the flattened entity fields.
#[derive(Debug, Clone)]
pub struct FindResult {
    pub id: Uuid,
    pub score: f64,
    pub search_types: Vec<SearchDimension>,
    pub entity: Option<Noun>,
    pub noun_type: Option<NounType>,
    pub metadata: Metadata,
    pub data: Option<EntityData>,
    pub confidence: Option<f64>,
    pub weight: Option<f64>,
}

pub struct Repo {
    store: Arc<Store>,
    indexes: Arc<IndexSet>,
    counts: Counts,
    embedder: Arc<dyn Embedder>,
    node_cache: Arc<NodeCache>,
    branch: String,
    keyspace: Keyspace,
    base: Option<BaseState>,
    /// False for `as_of` views: reads come from the frozen tree only.
    overlay_enabled: bool,
    read_only: bool,
    memory: MemoryLimits,
    node_cache_mb: usize,
    locks: EntityLocks,
    commit_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for Repo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repo")
            .field("branch", &self.branch)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl Repo {
    /// Opens (or initializes) a store over the given adapter, checked out to
    /// `main`.
    pub fn open(backend: Box<dyn Backend>, config: StoreConfig) -> StoreResult<Self> {
        let dimensions = config.dimensions;
        Self::open_with_embedder(backend, config, Arc::new(HashingEmbedder::new(dimensions)))
    }

    pub fn open_with_embedder(
        backend: Box<dyn Backend>,
        config: StoreConfig,
        embedder: Arc<dyn Embedder>,
    ) -> StoreResult<Self> {
        if embedder.dimensions() != config.dimensions {
            return Err(StoreError::InvalidArgument(format!(
                "embedder produces {} dimensions, the store is configured for {}",
                embedder.dimensions(),
                config.dimensions
            )));
        }
        let store = Store::new(backend, config);
        let limits = memory::detect_limits(store.config().memory_override_bytes);
        let node_cache_mb = store
            .config()
            .node_cache_mb
            .unwrap_or_else(|| memory::auto_node_cache_mb(&limits));
        let node_cache = Arc::new(NodeCache::new(node_cache_mb));
        Self::ensure_initialized(&store)?;
        Self::load_branch(
            store,
            node_cache,
            embedder,
            limits,
            node_cache_mb,
            MAIN_BRANCH.to_string(),
            Arc::new(Mutex::new(())),
        )
    }

    /// Opens a store on the filesystem adapter rooted at `path`.
    pub fn open_at_path(path: &std::path::Path, config: StoreConfig) -> StoreResult<Self> {
        Self::open(Box::new(FsBackend::init(path)?), config)
    }

    /// Opens an ephemeral in-memory store.
    pub fn in_memory(config: StoreConfig) -> StoreResult<Self> {
        Self::open(Box::new(MemBackend::new()), config)
    }

    /// A fresh store always carries an initial commit and `refs/heads/main`,
    /// so history is never empty.
    fn ensure_initialized(store: &Arc<Store>) -> StoreResult<()> {
        if store.refs().read(MAIN_BRANCH, Deadline::NONE)?.is_some() {
            return Ok(());
        }
        let initial = Commit::write(
            store.blobs(),
            CommitData {
                version: FORMAT_VERSION,
                tree: NULL_HASH,
                parent: NULL_HASH,
                author: DEFAULT_AUTHOR.to_string(),
                message: "Initial commit".to_string(),
                timestamp: MillisSinceEpoch::now(),
                metadata: Metadata::new(),
            },
            Deadline::NONE,
        )
        .block_on()?;
        store
            .refs()
            .create(MAIN_BRANCH, &RefDoc::new(initial.id().clone(), None), Deadline::NONE)?;
        tracing::info!(commit = %initial.id(), "initialized store");
        Ok(())
    }

    fn load_branch(
        store: Arc<Store>,
        node_cache: Arc<NodeCache>,
        embedder: Arc<dyn Embedder>,
        memory: MemoryLimits,
        node_cache_mb: usize,
        branch: String,
        commit_lock: Arc<Mutex<()>>,
    ) -> StoreResult<Self> {
        let keyspace = Keyspace::for_branch(&branch);
        let indexes = Arc::new(IndexSet::new(store.config(), node_cache.clone()));

        // Tombstones first; the rebuild and the base overlay both honor them.
        if let Some(doc) = store
            .get_doc::<DeletedDoc>(&keyspace.deleted(), Deadline::NONE)
            .block_on()?
        {
            ensure_version(doc.version)?;
            indexes.install_deleted(doc);
        }
        let report = indexes.rebuild(store.backend(), &keyspace, store.config(), Deadline::NONE)?;

        let mut repo = Self {
            store,
            indexes,
            counts: Counts::default(),
            embedder,
            node_cache,
            branch: branch.clone(),
            keyspace,
            base: None,
            overlay_enabled: true,
            read_only: false,
            memory,
            node_cache_mb,
            locks: EntityLocks::default(),
            commit_lock,
        };

        if branch != MAIN_BRANCH {
            // A fork inherits the state frozen at its base commit.
            let head = repo.store.refs().read_required(&branch, Deadline::NONE)?;
            let base_commit = repo.nearest_captured_commit(&head.commit_hash)?;
            if let Some(commit) = base_commit {
                repo.install_base(&commit)?;
            }
        }

        // Counts must agree with content; prefer recomputed truth on
        // mismatch rather than failing the open.
        if let Some(doc) = repo
            .store
            .get_doc::<CountsDoc>(&repo.keyspace.counts(), Deadline::NONE)
            .block_on()?
        {
            ensure_version(doc.version)?;
            repo.counts.replace(doc);
        }
        let computed = repo.indexes.computed_counts();
        if !repo.counts.agrees_with(&computed) {
            tracing::warn!(
                restored = report.nouns_restored,
                "persisted counts disagree with content; recomputed"
            );
            repo.counts.replace(computed);
        }
        Ok(repo)
    }

    /// The youngest commit with a captured tree reachable from `head`.
    fn nearest_captured_commit(&self, head: &Hash) -> StoreResult<Option<Commit>> {
        for commit in walk_history(self.store.blobs(), head, Deadline::NONE) {
            let commit = commit?;
            if !commit.tree().is_null() {
                return Ok(Some(commit));
            }
        }
        Ok(None)
    }

    /// Loads a frozen tree into the live indexes, under the overlay: ids the
    /// overlay already indexed (or tombstoned) keep their overlay state.
    fn install_base(&mut self, commit: &Commit) -> StoreResult<()> {
        let mut base = BaseState::default();
        for entry in walk(self.store.blobs(), commit.tree(), Deadline::NONE) {
            let entry = entry?;
            if entry.kind != TreeEntryKind::Blob {
                continue;
            }
            let Some((kind, raw_id)) = entry.path.split_once('/') else {
                continue;
            };
            let Ok(id) = Uuid::parse_str(raw_id) else {
                continue;
            };
            match kind {
                "entities" => base.entities.insert(id, entry.hash),
                "relations" => base.relations.insert(id, entry.hash),
                _ => None,
            };
        }
        for (id, hash) in &base.entities {
            if self.indexes.is_noun_deleted(id) || self.indexes.noun_type_of(id).is_some() {
                continue;
            }
            let bytes = self.store.blobs().get(hash, Deadline::NONE).block_on()?;
            let noun: Noun = serde_json::from_slice(&bytes).map_err(|err| {
                StoreError::Backend(BackendError::Read {
                    key: hash.hex(),
                    source: err.into(),
                })
            })?;
            self.indexes.index_noun(&noun);
        }
        for (id, hash) in &base.relations {
            if self.indexes.is_verb_deleted(id) || self.indexes.verb_endpoints(id).is_some() {
                continue;
            }
            let bytes = self.store.blobs().get(hash, Deadline::NONE).block_on()?;
            let doc: RelationDoc = serde_json::from_slice(&bytes).map_err(|err| {
                StoreError::Backend(BackendError::Read {
                    key: hash.hex(),
                    source: err.into(),
                })
            })?;
            self.indexes.index_verb(&Verb::from_relation_doc(doc));
        }
        self.base = Some(base);
        Ok(())
    }

    fn ensure_writable(&self) -> StoreResult<()> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn indexes(&self) -> &Arc<IndexSet> {
        &self.indexes
    }

    pub fn current_branch(&self) -> &str {
        &self.branch
    }

    pub fn config(&self) -> &StoreConfig {
        self.store.config()
    }

    pub(crate) fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    pub fn max_query_limit(&self) -> usize {
        self.memory.max_query_limit
    }

    // ---- Entity CRUD -------------------------------------------------------

    pub fn add(&self, input: AddInput) -> StoreResult<Uuid> {
        self.ensure_writable()?;
        let id = input.id.unwrap_or_else(Uuid::new_v4);
        let id_lock = self.locks.lock_for(id);
        let _guard = id_lock.lock().unwrap();

        let noun_type = input.noun_type.unwrap_or(NounType::Thing);
        let vector = match input.vector {
            Some(vector) => {
                if vector.len() != self.config().dimensions {
                    return Err(StoreError::InvalidArgument(format!(
                        "vector has {} dimensions, the store holds {}",
                        vector.len(),
                        self.config().dimensions
                    )));
                }
                vector
            }
            None => {
                let text = input.text.as_deref().or(match &input.data {
                    Some(EntityData::Text(text)) => Some(text.as_str()),
                    _ => None,
                });
                match text {
                    Some(text) => self.embedder.embed(text),
                    None => vec![0.0; self.config().dimensions],
                }
            }
        };
        let existed = self.indexes.noun_type_of(&id).is_some();
        let now = MillisSinceEpoch::now();
        let noun = Noun {
            id,
            noun_type,
            vector,
            metadata: input.metadata,
            data: input.data,
            confidence: input.confidence,
            weight: input.weight,
            created_at: now,
            updated_at: now,
            created_by: input.created_by,
        };
        self.indexes.index_noun(&noun);
        let affected = self.indexes.hnsw().affected_nodes(noun_type, &id);
        self.store.write_noun(&self.keyspace, &noun, &affected)?;
        if !existed {
            self.counts.noun_added(noun_type);
        }
        self.store.stats().record_operation("add");
        Ok(id)
    }

    pub fn add_many(&self, items: Vec<AddInput>, continue_on_error: bool) -> BatchReport<Uuid> {
        let mut report = BatchReport::default();
        for (index, item) in items.into_iter().enumerate() {
            match self.add(item) {
                Ok(id) => report.successful.push(id),
                Err(err) => {
                    report.failed.push(BatchFailure {
                        index,
                        error: err.to_string(),
                    });
                    if !continue_on_error {
                        break;
                    }
                }
            }
        }
        report
    }

    /// Writes a fully-formed noun verbatim (vector, timestamps, and all),
    /// e.g. when restoring a version snapshot. Clears any tombstone for the
    /// id.
    pub(crate) fn write_full_noun(&self, noun: Noun) -> StoreResult<()> {
        self.ensure_writable()?;
        let id_lock = self.locks.lock_for(noun.id);
        let _guard = id_lock.lock().unwrap();
        let existed = self.indexes.noun_type_of(&noun.id).is_some();
        self.indexes.index_noun(&noun);
        let affected = self.indexes.hnsw().affected_nodes(noun.noun_type, &noun.id);
        self.store.write_noun(&self.keyspace, &noun, &affected)?;
        if !existed {
            self.counts.noun_added(noun.noun_type);
        }
        Ok(())
    }

    pub fn get(&self, id: &Uuid) -> StoreResult<Option<Noun>> {
        self.store.stats().record_operation("get");
        if self.indexes.is_noun_deleted(id) {
            return Ok(None);
        }
        if self.overlay_enabled {
            let noun = match self.indexes.noun_type_of(id) {
                Some(noun_type) => self
                    .store
                    .read_noun(&self.keyspace, noun_type, id, Deadline::NONE)
                    .block_on()?,
                None => self
                    .store
                    .read_noun_any_type(&self.keyspace, id, Deadline::NONE)
                    .block_on()?,
            };
            if let Some(noun) = noun {
                self.indexes.cache_noun_type(noun.id, noun.noun_type);
                return Ok(Some(noun));
            }
        }
        self.base_noun(id)
    }

    fn base_noun(&self, id: &Uuid) -> StoreResult<Option<Noun>> {
        let Some(base) = &self.base else {
            return Ok(None);
        };
        let Some(hash) = base.entities.get(id) else {
            return Ok(None);
        };
        let bytes = self.store.blobs().get(hash, Deadline::NONE).block_on()?;
        let noun: Noun = serde_json::from_slice(&bytes).map_err(|err| {
            StoreError::Backend(BackendError::Read {
                key: hash.hex(),
                source: err.into(),
            })
        })?;
        self.indexes.cache_noun_type(noun.id, noun.noun_type);
        Ok(Some(noun))
    }

    pub fn update(&self, input: UpdateInput) -> StoreResult<()> {
        self.ensure_writable()?;
        let id_lock = self.locks.lock_for(input.id);
        let _guard = id_lock.lock().unwrap();

        let mut noun = self.get(&input.id)?.ok_or(StoreError::NotFound(input.id))?;
        if let Some(data) = input.data {
            noun.data = Some(data);
        }
        if let Some(metadata) = input.metadata {
            noun.metadata = metadata;
        }
        if let Some(confidence) = input.confidence {
            noun.confidence = Some(confidence);
        }
        if let Some(weight) = input.weight {
            noun.weight = Some(weight);
        }
        noun.updated_at = MillisSinceEpoch::now();
        self.indexes.index_noun(&noun);
        let affected = self.indexes.hnsw().affected_nodes(noun.noun_type, &noun.id);
        self.store.write_noun(&self.keyspace, &noun, &affected)?;
        self.store.stats().record_operation("update");
        Ok(())
    }

    pub fn update_many(
        &self,
        items: Vec<UpdateInput>,
        continue_on_error: bool,
    ) -> BatchReport<Uuid> {
        let mut report = BatchReport::default();
        for (index, item) in items.into_iter().enumerate() {
            let id = item.id;
            match self.update(item) {
                Ok(()) => report.successful.push(id),
                Err(err) => {
                    report.failed.push(BatchFailure {
                        index,
                        error: err.to_string(),
                    });
                    if !continue_on_error {
                        break;
                    }
                }
            }
        }
        report
    }

    /// Deletes a noun (tombstoning it and unlinking its relations) by id.
    pub fn delete(&self, id: &Uuid) -> StoreResult<()> {
        self.ensure_writable()?;
        let id_lock = self.locks.lock_for(*id);
        let _guard = id_lock.lock().unwrap();

        let noun = self.get(id)?.ok_or(StoreError::NotFound(*id))?;
        // Relations touching the noun go with it.
        let mut touching = self.indexes.relations(RelationsQuery {
            from: Some(*id),
            limit: Some(usize::MAX),
            ..Default::default()
        });
        touching.extend(self.indexes.relations(RelationsQuery {
            to: Some(*id),
            limit: Some(usize::MAX),
            ..Default::default()
        }));
        // A self-loop shows up in both directions.
        for verb_id in touching.into_iter().unique() {
            self.unrelate(&verb_id)?;
        }
        self.indexes.tombstone_noun(noun.noun_type, *id);
        self.store.delete_noun(&self.keyspace, noun.noun_type, id);
        self.counts.noun_removed(noun.noun_type);
        self.store.stats().record_operation("delete");
        Ok(())
    }

    pub fn delete_many(&self, ids: &[Uuid], continue_on_error: bool) -> BatchReport<Uuid> {
        let mut report = BatchReport::default();
        for (index, id) in ids.iter().enumerate() {
            match self.delete(id) {
                Ok(()) => report.successful.push(*id),
                Err(err) => {
                    report.failed.push(BatchFailure {
                        index,
                        error: err.to_string(),
                    });
                    if !continue_on_error {
                        break;
                    }
                }
            }
        }
        report
    }

    // ---- Relations ---------------------------------------------------------

    pub fn relate(&self, input: RelateInput) -> StoreResult<Uuid> {
        self.ensure_writable()?;
        // Both endpoints must be visible first.
        if self.get(&input.from)?.is_none() {
            return Err(StoreError::NotFound(input.from));
        }
        if self.get(&input.to)?.is_none() {
            return Err(StoreError::NotFound(input.to));
        }
        let verb = Verb {
            id: Uuid::new_v4(),
            verb_type: input.verb_type.unwrap_or(VerbType::RelatedTo),
            from: input.from,
            to: input.to,
            metadata: input.metadata,
            weight: input.weight,
            created_at: MillisSinceEpoch::now(),
            created_by: input.created_by,
        };
        self.indexes.index_verb(&verb);
        self.store.write_verb(&self.keyspace, &verb)?;
        self.counts.verb_added(verb.verb_type);
        self.store.stats().record_operation("relate");
        Ok(verb.id)
    }

    pub fn relate_many(
        &self,
        items: Vec<RelateInput>,
        continue_on_error: bool,
    ) -> BatchReport<Uuid> {
        let mut report = BatchReport::default();
        for (index, item) in items.into_iter().enumerate() {
            match self.relate(item) {
                Ok(id) => report.successful.push(id),
                Err(err) => {
                    report.failed.push(BatchFailure {
                        index,
                        error: err.to_string(),
                    });
                    if !continue_on_error {
                        break;
                    }
                }
            }
        }
        report
    }

    /// Rewrites an existing verb in place (same id), e.g. when a migration
    /// transforms its metadata.
    pub(crate) fn write_full_verb(&self, verb: Verb) -> StoreResult<()> {
        self.ensure_writable()?;
        let existed = self.indexes.verb_endpoints(&verb.id).is_some();
        self.indexes.index_verb(&verb);
        self.store.write_verb(&self.keyspace, &verb)?;
        if !existed {
            self.counts.verb_added(verb.verb_type);
        }
        Ok(())
    }

    /// Every visible verb id on this branch view.
    pub(crate) fn all_verb_ids(&self) -> Vec<Uuid> {
        let mut ids = self.indexes.relations(RelationsQuery {
            limit: Some(usize::MAX),
            ..Default::default()
        });
        ids.sort();
        ids
    }

    pub fn unrelate(&self, verb_id: &Uuid) -> StoreResult<()> {
        self.ensure_writable()?;
        let verb = self.verb(verb_id)?.ok_or(StoreError::NotFound(*verb_id))?;
        self.indexes.tombstone_verb(*verb_id);
        self.store
            .delete_verb(&self.keyspace, Some(verb.verb_type), verb_id);
        self.counts.verb_removed(verb.verb_type);
        self.store.stats().record_operation("unrelate");
        Ok(())
    }

    /// Reads one verb, cache → overlay → frozen base.
    pub fn verb(&self, verb_id: &Uuid) -> StoreResult<Option<Verb>> {
        if self.indexes.is_verb_deleted(verb_id) {
            return Ok(None);
        }
        if self.overlay_enabled
            && let Some(verb) = self
                .store
                .read_verb(&self.keyspace, verb_id, Deadline::NONE)
                .block_on()?
        {
            return Ok(Some(verb));
        }
        let Some(base) = &self.base else {
            return Ok(None);
        };
        let Some(hash) = base.relations.get(verb_id) else {
            return Ok(None);
        };
        let bytes = self.store.blobs().get(hash, Deadline::NONE).block_on()?;
        let doc: RelationDoc = serde_json::from_slice(&bytes).map_err(|err| {
            StoreError::Backend(BackendError::Read {
                key: hash.hex(),
                source: err.into(),
            })
        })?;
        Ok(Some(Verb::from_relation_doc(doc)))
    }

    /// `get_relations(id)` shorthand: every relation with `from == id`.
    pub fn relations_of(&self, id: &Uuid) -> StoreResult<Vec<Verb>> {
        self.get_relations(RelationsQuery {
            from: Some(*id),
            ..Default::default()
        })
    }

    pub fn get_relations(&self, query: RelationsQuery) -> StoreResult<Vec<Verb>> {
        self.store.stats().record_operation("get_relations");
        let mut verbs = vec![];
        for verb_id in self.indexes.relations(query) {
            if let Some(verb) = self.verb(&verb_id)? {
                verbs.push(verb);
            }
        }
        Ok(verbs)
    }

    // ---- Query -------------------------------------------------------------

    pub fn find(&self, find: &FindQuery) -> StoreResult<Vec<FindResult>> {
        self.store.stats().record_operation("find");
        let matches = query::evaluate(
            &self.indexes,
            self.config(),
            self.embedder.as_ref(),
            self.memory.max_query_limit,
            find,
        )?;
        self.hydrate(matches)
    }

    /// Nearest neighbours of a stored entity, excluding the entity itself.
    pub fn similar(&self, to: &Uuid, limit: usize) -> StoreResult<Vec<FindResult>> {
        let noun = self.get(to)?.ok_or(StoreError::NotFound(*to))?;
        let matches = query::evaluate(
            &self.indexes,
            self.config(),
            self.embedder.as_ref(),
            self.memory.max_query_limit,
            &FindQuery {
                vector: Some(noun.vector),
                limit: limit + 1,
                ..Default::default()
            },
        )?;
        let matches = matches
            .into_iter()
            .filter(|matched| matched.id != *to)
            .take(limit)
            .collect();
        self.hydrate(matches)
    }

    fn hydrate(&self, matches: Vec<RankedMatch>) -> StoreResult<Vec<FindResult>> {
        matches
            .into_iter()
            .map(|matched| {
                let entity = self.get(&matched.id)?;
                Ok(FindResult {
                    id: matched.id,
                    score: matched.score,
                    search_types: matched.search_types,
                    noun_type: entity.as_ref().map(|noun| noun.noun_type),
                    metadata: entity
                        .as_ref()
                        .map(|noun| noun.metadata.clone())
                        .unwrap_or_default(),
                    data: entity.as_ref().and_then(|noun| noun.data.clone()),
                    confidence: entity.as_ref().and_then(|noun| noun.confidence),
                    weight: entity.as_ref().and_then(|noun| noun.weight),
                    entity,
                })
            })
            .collect()
    }

    // ---- Commit / fork / time travel --------------------------------------

    pub fn commit(&self, options: CommitOptions) -> StoreResult<Hash> {
        self.ensure_writable()?;
        let _guard = self.commit_lock.lock().unwrap();
        let head = self.store.refs().read_required(&self.branch, Deadline::NONE)?;

        let tree_hash = if options.capture_state {
            self.capture_state_tree()?
        } else {
            NULL_HASH
        };
        let commit = Commit::write(
            self.store.blobs(),
            CommitData {
                version: FORMAT_VERSION,
                tree: tree_hash,
                parent: head.commit_hash.clone(),
                author: options
                    .author
                    .unwrap_or_else(|| DEFAULT_AUTHOR.to_string()),
                message: options.message,
                timestamp: MillisSinceEpoch::now(),
                metadata: options.metadata,
            },
            Deadline::NONE,
        )
        .block_on()?;
        self.store.refs().compare_and_set(
            &self.branch,
            &head.commit_hash,
            &RefDoc::new(commit.id().clone(), None),
            Deadline::NONE,
        )?;
        self.store.stats().record_operation("commit");
        tracing::debug!(commit = %commit.id(), branch = %self.branch, "committed");
        Ok(commit.id().clone())
    }

    /// Enumerates every visible, non-tombstoned entity and relation and
    /// writes them as a tree of blobs. Unchanged entities hash to their
    /// existing blobs, so adjacent snapshots share storage.
    #[tracing::instrument(skip(self))]
    fn capture_state_tree(&self) -> StoreResult<Hash> {
        let blobs = self.store.blobs();
        let mut entity_entries = vec![];
        for id in self.indexes.all_noun_ids() {
            let Some(noun) = self.get(&id)? else { continue };
            let bytes = canonical_json_bytes(&noun)
                .map_err(|err| StoreError::Backend(BackendError::Other(err.into())))?;
            let hash = blobs.put(&bytes, Deadline::NONE).block_on()?;
            entity_entries.push(TreeEntry {
                name: id.to_string(),
                kind: TreeEntryKind::Blob,
                hash,
            });
        }
        let mut relation_entries = vec![];
        let mut verb_ids: Vec<Uuid> = self
            .indexes
            .relations(RelationsQuery {
                limit: Some(usize::MAX),
                ..Default::default()
            });
        verb_ids.sort();
        for verb_id in verb_ids {
            let Some(verb) = self.verb(&verb_id)? else { continue };
            let bytes = canonical_json_bytes(&verb.relation_doc())
                .map_err(|err| StoreError::Backend(BackendError::Other(err.into())))?;
            let hash = blobs.put(&bytes, Deadline::NONE).block_on()?;
            relation_entries.push(TreeEntry {
                name: verb_id.to_string(),
                kind: TreeEntryKind::Blob,
                hash,
            });
        }
        let entities_tree = Tree::from_entries(entity_entries)
            .write(blobs, Deadline::NONE)
            .block_on()?;
        let relations_tree = Tree::from_entries(relation_entries)
            .write(blobs, Deadline::NONE)
            .block_on()?;
        let root = Tree::from_entries(vec![
            TreeEntry {
                name: "entities".to_string(),
                kind: TreeEntryKind::Tree,
                hash: entities_tree,
            },
            TreeEntry {
                name: "relations".to_string(),
                kind: TreeEntryKind::Tree,
                hash: relations_tree,
            },
        ]);
        Ok(root.write(blobs, Deadline::NONE).block_on()?)
    }

    /// Creates a branch at the current head and returns a handle scoped to
    /// it. The new branch is immediately listable and checkout-able.
    pub fn fork(&self, name: &str, options: ForkOptions) -> StoreResult<Self> {
        self.ensure_writable()?;
        if name.is_empty() || name.contains('/') {
            return Err(StoreError::InvalidArgument(format!(
                "invalid branch name: {name}"
            )));
        }
        if self.store.refs().read(name, Deadline::NONE)?.is_some() {
            return Err(StoreError::InvalidArgument(format!(
                "branch {name} already exists"
            )));
        }
        let head = if options.capture_state {
            self.commit(CommitOptions {
                message: format!("Fork {name}"),
                author: None,
                capture_state: true,
                metadata: Metadata::new(),
            })?
        } else {
            self.store
                .refs()
                .read_required(&self.branch, Deadline::NONE)?
                .commit_hash
        };
        self.store
            .refs()
            .create(name, &RefDoc::new(head, None), Deadline::NONE)?;
        self.store.stats().record_operation("fork");
        self.checkout(name)
    }

    /// Returns a handle checked out to an existing branch.
    pub fn checkout(&self, name: &str) -> StoreResult<Self> {
        self.store.refs().read_required(name, Deadline::NONE)?;
        // The new handle rebuilds its indexes from durable state; pending
        // writes must land first.
        if !self.read_only {
            self.flush()?;
        }
        Self::load_branch(
            self.store.clone(),
            self.node_cache.clone(),
            self.embedder.clone(),
            self.memory.clone(),
            self.node_cache_mb,
            name.to_string(),
            self.commit_lock.clone(),
        )
    }

    pub fn list_branches(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .store
            .refs()
            .list_branches(Deadline::NONE)?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    /// A read-only view of this branch as of `timestamp`: the youngest
    /// commit whose timestamp is ≤ `timestamp`.
    pub fn as_of(&self, timestamp: MillisSinceEpoch) -> StoreResult<Self> {
        let head = self.store.refs().read_required(&self.branch, Deadline::NONE)?;
        let mut commits: Vec<Commit> =
            walk_history(self.store.blobs(), &head.commit_hash, Deadline::NONE)
                .collect::<Result<_, _>>()?;
        // Newest first, so timestamps descend: binary-search for the
        // youngest commit at or before the cut.
        let pos = commits.partition_point(|commit| commit.timestamp() > timestamp);
        let chosen = (pos < commits.len()).then(|| commits.swap_remove(pos));
        let Some(commit) = chosen else {
            return Err(StoreError::InvalidArgument(format!(
                "no commit at or before timestamp {}",
                timestamp.0
            )));
        };

        let indexes = Arc::new(IndexSet::new(self.store.config(), self.node_cache.clone()));
        let mut view = Self {
            store: self.store.clone(),
            indexes,
            counts: Counts::default(),
            embedder: self.embedder.clone(),
            node_cache: self.node_cache.clone(),
            branch: self.branch.clone(),
            keyspace: self.keyspace.clone(),
            base: None,
            overlay_enabled: false,
            read_only: true,
            memory: self.memory.clone(),
            node_cache_mb: self.node_cache_mb,
            locks: EntityLocks::default(),
            commit_lock: self.commit_lock.clone(),
        };
        let captured = view.nearest_captured_commit(commit.id())?;
        if let Some(captured) = captured {
            view.install_base(&captured)?;
        }
        self.store.stats().record_operation("as_of");
        Ok(view)
    }

    pub fn get_history(&self, options: &HistoryOptions) -> StoreResult<Vec<Commit>> {
        self.stream_history(options)?.collect()
    }

    /// Walks commits from the resolved ref, yielding one commit at a time
    /// with constant heap.
    pub fn stream_history(
        &self,
        options: &HistoryOptions,
    ) -> StoreResult<impl Iterator<Item = StoreResult<Commit>> + '_> {
        let branch = options.branch.as_deref().unwrap_or(&self.branch);
        let head = self.store.refs().read_required(branch, Deadline::NONE)?;
        let author = options.author.clone();
        let limit = options.limit.unwrap_or(usize::MAX);
        let iter = walk_history(self.store.blobs(), &head.commit_hash, Deadline::NONE)
            .filter(move |commit| match (commit, &author) {
                (Ok(commit), Some(author)) => commit.author().contains(author.as_str()),
                _ => true,
            })
            .take(limit)
            .map(|commit| commit.map_err(StoreError::from));
        Ok(iter)
    }

    // ---- Lifecycle ---------------------------------------------------------

    /// Drains pending durable writes, persists the index system documents,
    /// and clears the write-through cache.
    pub fn flush(&self) -> StoreResult<()> {
        self.store
            .put_doc_now(
                &self.keyspace.deleted(),
                &self.indexes.deleted_doc(),
                Deadline::NONE,
            )
            .block_on()?;
        save_system(
            self.store.backend(),
            &self.keyspace,
            &self.indexes.hnsw().system_doc(),
            Deadline::NONE,
        )
        .block_on()?;
        self.store
            .flush(&self.keyspace, &self.counts.doc(), Deadline::NONE)?;
        Ok(())
    }

    pub fn close(&self) -> StoreResult<()> {
        if !self.read_only {
            self.flush()?;
        }
        self.store.close()
    }

    // ---- Introspection -----------------------------------------------------

    pub fn get_statistics(&self) -> StatisticsDoc {
        self.store
            .stats()
            .snapshot(self.store.throttle().state().stats())
    }

    pub fn get_hnsw_stats(&self) -> HnswIndexStats {
        self.indexes.hnsw_stats()
    }

    pub fn get_memory_stats(&self) -> MemoryStats {
        memory::memory_stats(&self.memory, self.node_cache_mb)
    }

    pub fn counts(&self) -> &Counts {
        &self.counts
    }

    pub fn total_nouns(&self) -> u64 {
        self.counts.total_nouns()
    }

    pub fn total_verbs(&self) -> u64 {
        self.counts.total_verbs()
    }

    /// Recomputes counters by full scan of the live indexes and persists the
    /// result. The recovery path for counts-content mismatches.
    pub fn rebuild_counts(&self) -> StoreResult<()> {
        let computed = self.indexes.computed_counts();
        self.counts.replace(computed);
        self.store
            .put_doc_now(&self.keyspace.counts(), &self.counts.doc(), Deadline::NONE)
            .block_on()
    }
}
