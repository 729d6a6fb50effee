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

//! Content-addressed immutable blob layer.
//!
//! A blob's key is the SHA-256 of its uncompressed bytes, so duplicate content
//! is stored exactly once and writes are idempotent. Compression is negotiated
//! at store level; the stored form may be zstd-framed, detected on read by the
//! frame magic.

use std::sync::Arc;

use crate::backend::Backend;
use crate::backend::BackendError;
use crate::backend::BackendResult;
use crate::backend::Deadline;
use crate::content_hash::hash_bytes;
use crate::keys::blob_key;
use crate::object_id::Hash;

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Store-level blob compression choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Zstd {
        level: i32,
    },
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    backend: Arc<dyn Backend>,
    compression: Compression,
}

impl BlobStore {
    pub fn new(backend: Arc<dyn Backend>, compression: Compression) -> Self {
        Self {
            backend,
            compression,
        }
    }

    fn null_hash_error() -> BackendError {
        BackendError::InvalidArgument(
            "NULL_HASH is a sentinel value (no parent / empty tree) and addresses no blob"
                .to_string(),
        )
    }

    /// Writes `bytes` and returns their content hash. Writing content that
    /// already exists is a no-op returning the same hash.
    pub async fn put(&self, bytes: &[u8], deadline: Deadline) -> BackendResult<Hash> {
        let hash = hash_bytes(bytes);
        let key = blob_key(&hash);
        if self.backend.get(&key, deadline).await?.is_some() {
            return Ok(hash);
        }
        let stored;
        let payload: &[u8] = match self.compression {
            Compression::None => bytes,
            Compression::Zstd { level } => {
                stored = zstd::encode_all(bytes, level)
                    .map_err(|err| BackendError::Write {
                        key: key.clone(),
                        source: err.into(),
                    })?;
                &stored
            }
        };
        self.backend.put(&key, payload, deadline).await?;
        Ok(hash)
    }

    /// Reads the blob addressed by `hash`. Reading [`crate::object_id::NULL_HASH`]
    /// fails with `InvalidArgument`.
    pub async fn get(&self, hash: &Hash, deadline: Deadline) -> BackendResult<Vec<u8>> {
        if hash.is_null() {
            return Err(Self::null_hash_error());
        }
        let key = blob_key(hash);
        let stored = self
            .backend
            .get(&key, deadline)
            .await?
            .ok_or(BackendError::NotFound { key: key.clone() })?;
        if stored.starts_with(&ZSTD_MAGIC) {
            zstd::decode_all(&stored[..]).map_err(|err| BackendError::Read {
                key,
                source: err.into(),
            })
        } else {
            Ok(stored)
        }
    }

    pub async fn exists(&self, hash: &Hash, deadline: Deadline) -> BackendResult<bool> {
        if hash.is_null() {
            return Ok(false);
        }
        Ok(self.backend.get(&blob_key(hash), deadline).await?.is_some())
    }

    pub async fn delete(&self, hash: &Hash, deadline: Deadline) -> BackendResult<()> {
        if hash.is_null() {
            return Err(Self::null_hash_error());
        }
        self.backend.delete(&blob_key(hash), deadline).await
    }
}
