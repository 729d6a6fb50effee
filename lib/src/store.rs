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

//! Wraps the low-level adapter and makes it return more convenient types.
//! Owns the durable-write pipeline: the write-through cache, the bounded
//! flush queue and its background worker, the blob store, refs, counters,
//! and statistics.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::thread::JoinHandle;

use pollster::FutureExt as _;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use uuid::Uuid;

use crate::backend::Backend;
use crate::backend::BackendError;
use crate::backend::BackendResult;
use crate::backend::Deadline;
use crate::blob_store::BlobStore;
use crate::config::StoreConfig;
use crate::counts::CountsDoc;
use crate::entity::FORMAT_VERSION;
use crate::entity::Noun;
use crate::entity::NounMetadataDoc;
use crate::entity::NounType;
use crate::entity::RelationDoc;
use crate::entity::VectorDoc;
use crate::entity::Verb;
use crate::hnsw::HnswNode;
use crate::hnsw::HnswNodeDoc;
use crate::index::IntegrityError;
use crate::keys::Keyspace;
use crate::refs::RefError;
use crate::refs::RefStore;
use crate::stats::Statistics;
use crate::throttle::ThrottlingBackend;
use crate::write_cache::WriteThroughCache;

/// Top-level error surface of the embeddable API.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Ref(#[from] RefError),
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    #[error("Entity {0} not found")]
    NotFound(Uuid),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("This handle is a read-only point-in-time view")]
    ReadOnly,
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
enum FlushOp {
    Put { key: String, bytes: Vec<u8> },
    Delete { key: String },
}

#[derive(Debug, Default)]
struct FlushState {
    queue: VecDeque<FlushOp>,
    busy: bool,
    shutdown: bool,
    last_error: Option<BackendError>,
}

#[derive(Debug, Default)]
struct FlushShared {
    state: Mutex<FlushState>,
    cond: Condvar,
}

/// Background flush worker: a single thread consuming a bounded queue.
/// Back-pressure is applied by blocking enqueue when the queue is full.
struct FlushWorker {
    shared: Arc<FlushShared>,
    capacity: usize,
    handle: Option<JoinHandle<()>>,
}

impl FlushWorker {
    fn spawn(backend: Arc<dyn Backend>, capacity: usize) -> Self {
        let shared = Arc::new(FlushShared::default());
        let worker_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name("brainy-flush".to_string())
            .spawn(move || Self::run(&worker_shared, backend.as_ref()))
            .expect("failed to spawn flush worker");
        Self {
            shared,
            capacity,
            handle: Some(handle),
        }
    }

    fn run(shared: &FlushShared, backend: &dyn Backend) {
        loop {
            let op = {
                let mut state = shared.state.lock().unwrap();
                loop {
                    if let Some(op) = state.queue.pop_front() {
                        state.busy = true;
                        shared.cond.notify_all();
                        break op;
                    }
                    if state.shutdown {
                        return;
                    }
                    state = shared.cond.wait(state).unwrap();
                }
            };
            let result = match &op {
                FlushOp::Put { key, bytes } => {
                    backend.put(key, bytes, Deadline::NONE).block_on()
                }
                FlushOp::Delete { key } => backend.delete(key, Deadline::NONE).block_on(),
            };
            let mut state = shared.state.lock().unwrap();
            if let Err(err) = result {
                tracing::warn!(%err, "durable flush failed");
                state.last_error = Some(err);
            }
            state.busy = false;
            shared.cond.notify_all();
        }
    }

    fn enqueue(&self, op: FlushOp) {
        let mut state = self.shared.state.lock().unwrap();
        while state.queue.len() >= self.capacity && !state.shutdown {
            state = self.shared.cond.wait(state).unwrap();
        }
        state.queue.push_back(op);
        self.shared.cond.notify_all();
    }

    /// Blocks until every queued write has been acknowledged, surfacing the
    /// first error seen since the last drain.
    fn drain(&self) -> BackendResult<()> {
        let mut state = self.shared.state.lock().unwrap();
        while !state.queue.is_empty() || state.busy {
            state = self.shared.cond.wait(state).unwrap();
        }
        match state.last_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn shutdown(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
            self.shared.cond.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FlushWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub struct Store {
    backend: Arc<dyn Backend>,
    throttling: Arc<ThrottlingBackend>,
    blobs: BlobStore,
    refs: RefStore,
    cache: WriteThroughCache,
    stats: Arc<Statistics>,
    config: StoreConfig,
    flush: Mutex<FlushWorker>,
}

impl Debug for Store {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        f.debug_struct("Store")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

impl Store {
    pub fn new(backend: Box<dyn Backend>, config: StoreConfig) -> Arc<Self> {
        let throttling = Arc::new(ThrottlingBackend::new(backend));
        let backend: Arc<dyn Backend> = throttling.clone();
        let blobs = BlobStore::new(backend.clone(), config.compression);
        let refs = RefStore::new(backend.clone());
        let flush = FlushWorker::spawn(backend.clone(), config.flush_queue_capacity);
        Arc::new(Self {
            backend,
            throttling,
            blobs,
            refs,
            cache: WriteThroughCache::default(),
            stats: Arc::new(Statistics::default()),
            config,
            flush: Mutex::new(flush),
        })
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Returns the raw adapter as its implementation type.
    pub fn backend_impl<T: Backend>(&self) -> Option<&T> {
        self.throttling.inner().downcast_ref()
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    pub fn cache(&self) -> &WriteThroughCache {
        &self.cache
    }

    pub fn stats(&self) -> &Arc<Statistics> {
        &self.stats
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn throttle(&self) -> &ThrottlingBackend {
        &self.throttling
    }

    // ---- JSON documents ----------------------------------------------------

    pub(crate) fn to_json_bytes<T: Serialize>(doc: &T) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(doc)
            .map_err(|err| StoreError::Backend(BackendError::Other(err.into())))
    }

    pub(crate) async fn get_doc<T: DeserializeOwned>(
        &self,
        key: &str,
        deadline: Deadline,
    ) -> StoreResult<Option<T>> {
        let Some(bytes) = self.backend.get(key, deadline).await? else {
            return Ok(None);
        };
        let doc = serde_json::from_slice(&bytes).map_err(|err| BackendError::Read {
            key: key.to_string(),
            source: err.into(),
        })?;
        Ok(Some(doc))
    }

    pub(crate) async fn put_doc_now<T: Serialize>(
        &self,
        key: &str,
        doc: &T,
        deadline: Deadline,
    ) -> StoreResult<()> {
        let bytes = Self::to_json_bytes(doc)?;
        self.backend.put(key, &bytes, deadline).await?;
        Ok(())
    }

    fn enqueue_doc<T: Serialize>(&self, key: String, doc: &T) -> StoreResult<()> {
        let bytes = Self::to_json_bytes(doc)?;
        self.flush.lock().unwrap().enqueue(FlushOp::Put { key, bytes });
        Ok(())
    }

    fn enqueue_delete(&self, key: String) {
        self.flush.lock().unwrap().enqueue(FlushOp::Delete { key });
    }

    // ---- Entity persistence ------------------------------------------------

    /// Caches the noun for read-after-write and schedules its durable
    /// documents (metadata, vector, HNSW adjacency for the rewired nodes).
    pub(crate) fn write_noun(
        &self,
        keyspace: &Keyspace,
        noun: &Noun,
        affected_hnsw: &[(Uuid, HnswNode)],
    ) -> StoreResult<()> {
        self.cache.insert_noun(keyspace.prefix(), Arc::new(noun.clone()));
        self.enqueue_doc(
            keyspace.noun_metadata(noun.noun_type, &noun.id),
            &noun.metadata_doc(),
        )?;
        self.enqueue_doc(
            keyspace.noun_vector(noun.noun_type, &noun.id),
            &noun.vector_doc(),
        )?;
        for (id, node) in affected_hnsw {
            self.enqueue_doc(
                keyspace.noun_hnsw(noun.noun_type, id),
                &HnswNodeDoc::from_node(*id, node),
            )?;
        }
        Ok(())
    }

    pub(crate) fn delete_noun(&self, keyspace: &Keyspace, noun_type: NounType, id: &Uuid) {
        self.cache.forget(keyspace.prefix(), id);
        self.enqueue_delete(keyspace.noun_metadata(noun_type, id));
        self.enqueue_delete(keyspace.noun_vector(noun_type, id));
        self.enqueue_delete(keyspace.noun_hnsw(noun_type, id));
    }

    pub(crate) fn write_verb(&self, keyspace: &Keyspace, verb: &Verb) -> StoreResult<()> {
        self.cache.insert_verb(keyspace.prefix(), Arc::new(verb.clone()));
        let doc = verb.relation_doc();
        self.enqueue_doc(keyspace.relation(&verb.id), &doc)?;
        // The type-scoped mirror keeps verb listings directory-bounded.
        self.enqueue_doc(keyspace.verb_metadata(verb.verb_type, &verb.id), &doc)?;
        Ok(())
    }

    pub(crate) fn delete_verb(
        &self,
        keyspace: &Keyspace,
        verb_type: Option<crate::entity::VerbType>,
        id: &Uuid,
    ) {
        self.cache.forget(keyspace.prefix(), id);
        self.enqueue_delete(keyspace.relation(id));
        if let Some(verb_type) = verb_type {
            self.enqueue_delete(keyspace.verb_metadata(verb_type, id));
        }
    }

    /// Reads a noun's two documents, cache first.
    pub(crate) async fn read_noun(
        &self,
        keyspace: &Keyspace,
        noun_type: NounType,
        id: &Uuid,
        deadline: Deadline,
    ) -> StoreResult<Option<Noun>> {
        if let Some(noun) = self.cache.noun(keyspace.prefix(), id) {
            self.stats.record_cache_hit();
            return Ok(Some(noun.as_ref().clone()));
        }
        self.stats.record_cache_miss();
        let (metadata, vector) = futures::future::try_join(
            self.get_doc::<NounMetadataDoc>(&keyspace.noun_metadata(noun_type, id), deadline),
            self.get_doc::<VectorDoc>(&keyspace.noun_vector(noun_type, id), deadline),
        )
        .await?;
        let Some(metadata) = metadata else {
            return Ok(None);
        };
        ensure_version(metadata.version)?;
        let vector = vector.unwrap_or(VectorDoc {
            version: FORMAT_VERSION,
            id: *id,
            vector: vec![],
        });
        Ok(Some(Noun::from_docs(metadata, vector)))
    }

    /// Reads a noun when its type is unknown, probing every type directory.
    pub(crate) async fn read_noun_any_type(
        &self,
        keyspace: &Keyspace,
        id: &Uuid,
        deadline: Deadline,
    ) -> StoreResult<Option<Noun>> {
        if let Some(noun) = self.cache.noun(keyspace.prefix(), id) {
            self.stats.record_cache_hit();
            return Ok(Some(noun.as_ref().clone()));
        }
        for noun_type in NounType::ALL {
            if let Some(noun) = self.read_noun(keyspace, noun_type, id, deadline).await? {
                return Ok(Some(noun));
            }
        }
        Ok(None)
    }

    pub(crate) async fn read_verb(
        &self,
        keyspace: &Keyspace,
        id: &Uuid,
        deadline: Deadline,
    ) -> StoreResult<Option<Verb>> {
        if let Some(verb) = self.cache.verb(keyspace.prefix(), id) {
            self.stats.record_cache_hit();
            return Ok(Some(verb.as_ref().clone()));
        }
        self.stats.record_cache_miss();
        let Some(doc) = self
            .get_doc::<RelationDoc>(&keyspace.relation(id), deadline)
            .await?
        else {
            return Ok(None);
        };
        ensure_version(doc.version)?;
        Ok(Some(Verb::from_relation_doc(doc)))
    }

    // ---- Flush -------------------------------------------------------------

    /// Drains the durable queue, persists the branch's counters and the
    /// statistics document, and only then clears the write-through cache.
    pub fn flush(
        &self,
        keyspace: &Keyspace,
        counts: &CountsDoc,
        deadline: Deadline,
    ) -> StoreResult<()> {
        self.flush.lock().unwrap().drain()?;
        self.put_doc_now(&keyspace.counts(), counts, deadline).block_on()?;
        self.put_doc_now(
            &keyspace.statistics(),
            &self.stats.snapshot(self.throttling.state().stats()),
            deadline,
        )
        .block_on()?;
        self.cache.clear();
        self.stats.record_flush();
        Ok(())
    }

    /// Stops the flush worker. Pending writes are drained first.
    pub fn close(&self) -> StoreResult<()> {
        let mut flush = self.flush.lock().unwrap();
        flush.drain()?;
        flush.shutdown();
        Ok(())
    }
}

pub(crate) fn ensure_version(found: u32) -> StoreResult<()> {
    if found > FORMAT_VERSION {
        return Err(StoreError::Backend(BackendError::IncompatibleFormat {
            found,
            supported: FORMAT_VERSION,
        }));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pollster::FutureExt as _;

    use super::*;
    use crate::entity::Metadata;
    use crate::entity::MillisSinceEpoch;
    use crate::keys::MAIN_BRANCH;
    use crate::mem_backend::MemBackend;

    fn store() -> Arc<Store> {
        Store::new(Box::new(MemBackend::new()), StoreConfig::default())
    }

    fn sample_noun() -> Noun {
        Noun {
            id: Uuid::new_v4(),
            noun_type: NounType::Thing,
            vector: vec![1.0, 2.0],
            metadata: Metadata::new(),
            data: None,
            confidence: None,
            weight: None,
            created_at: MillisSinceEpoch::now(),
            updated_at: MillisSinceEpoch::now(),
            created_by: None,
        }
    }

    #[test]
    fn test_read_after_write_before_flush() {
        let store = store();
        let keyspace = Keyspace::for_branch(MAIN_BRANCH);
        let noun = sample_noun();
        store.write_noun(&keyspace, &noun, &[]).unwrap();
        // Visible immediately, from the cache.
        let read = store
            .read_noun(&keyspace, NounType::Thing, &noun.id, Deadline::NONE)
            .block_on()
            .unwrap();
        assert_eq!(read, Some(noun));
    }

    #[test]
    fn test_flush_clears_cache_and_data_remains_readable() {
        let store = store();
        let keyspace = Keyspace::for_branch(MAIN_BRANCH);
        let noun = sample_noun();
        store.write_noun(&keyspace, &noun, &[]).unwrap();
        store
            .flush(&keyspace, &CountsDoc::default(), Deadline::NONE)
            .unwrap();
        assert!(store.cache.is_empty());
        let read = store
            .read_noun(&keyspace, NounType::Thing, &noun.id, Deadline::NONE)
            .block_on()
            .unwrap();
        assert_eq!(read, Some(noun));
    }

    #[test]
    fn test_flush_persists_counts() {
        let store = store();
        let keyspace = Keyspace::for_branch(MAIN_BRANCH);
        let counts = crate::counts::Counts::default();
        counts.noun_added(NounType::Thing);
        store.flush(&keyspace, &counts.doc(), Deadline::NONE).unwrap();
        let doc: CountsDoc = store
            .get_doc(&keyspace.counts(), Deadline::NONE)
            .block_on()
            .unwrap()
            .unwrap();
        assert_eq!(doc.total_noun_count, 1);
    }

    #[test]
    fn test_close_is_clean() {
        let store = store();
        let keyspace = Keyspace::for_branch(MAIN_BRANCH);
        let noun = sample_noun();
        store.write_noun(&keyspace, &noun, &[]).unwrap();
        store.close().unwrap();
        // The write landed durably before shutdown.
        let bytes = store
            .backend()
            .get(&keyspace.noun_metadata(NounType::Thing, &noun.id), Deadline::NONE)
            .block_on()
            .unwrap();
        assert!(bytes.is_some());
    }
}
