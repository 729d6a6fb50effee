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

//! The storage adapter interface: a uniform key/value facade over
//! filesystem, memory, and cloud blob stores.

use std::any::Any;
use std::fmt::Debug;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;

/// Caller-imposed bound on a single adapter call. [`Deadline::NONE`] means
/// unbounded.
#[derive(Clone, Copy, Debug, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub const NONE: Self = Self(None);

    pub fn after(timeout: Duration) -> Self {
        Self(Some(Instant::now() + timeout))
    }

    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    /// Fails with [`BackendError::Timeout`] once the deadline has elapsed.
    pub fn check(&self) -> BackendResult<()> {
        match self.0 {
            Some(instant) if Instant::now() >= instant => Err(BackendError::Timeout),
            _ => Ok(()),
        }
    }

    /// Time left, or `None` if unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|instant| instant.saturating_duration_since(Instant::now()))
    }
}

/// Adapter error that may occur after the backend is loaded.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Key {key} not found")]
    NotFound { key: String },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Backend throttled: {reason}")]
    Throttled { reason: String },
    #[error("Deadline elapsed")]
    Timeout,
    #[error("Persisted state version {found} is newer than supported version {supported}")]
    IncompatibleFormat { found: u32, supported: u32 },
    #[error("Error when reading key {key}")]
    Read {
        key: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Could not write key {key}")]
    Write {
        key: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// One page of a prefix listing. `cursor` is opaque; feed it back to
/// [`Backend::list`] to continue. `None` means the listing is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub cursor: Option<String>,
}

/// Defines the interface for storage adapters.
///
/// Keys are `/`-separated paths. Implementations must list keys in lexicographic
/// order so opaque cursors stay stable across pages.
#[async_trait]
pub trait Backend: Any + Send + Sync + Debug {
    /// A unique name that identifies this adapter kind.
    fn name(&self) -> &str;

    /// An estimate of how many concurrent requests this adapter handles well.
    /// A local filesystem adapter may want to set this to 1; a cloud-backed
    /// adapter may want to set it to 100 or so.
    fn concurrency(&self) -> usize {
        1
    }

    async fn get(&self, key: &str, deadline: Deadline) -> BackendResult<Option<Vec<u8>>>;

    async fn put(&self, key: &str, bytes: &[u8], deadline: Deadline) -> BackendResult<()>;

    /// Deleting a missing key is a no-op.
    async fn delete(&self, key: &str, deadline: Deadline) -> BackendResult<()>;

    async fn list(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
        deadline: Deadline,
    ) -> BackendResult<ListPage>;

    /// Fetches many keys in one round trip where the adapter supports it.
    /// The result is positionally aligned with `keys`; missing keys yield
    /// `None`.
    async fn bulk_get(
        &self,
        keys: &[String],
        deadline: Deadline,
    ) -> BackendResult<Vec<Option<Vec<u8>>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            deadline.check()?;
            out.push(self.get(key, deadline).await?);
        }
        Ok(out)
    }
}

impl dyn Backend {
    /// Returns reference of the implementation type.
    pub fn downcast_ref<T: Backend>(&self) -> Option<&T> {
        (self as &dyn Any).downcast_ref()
    }
}

/// Collects every key under `prefix`, paging until the cursor runs out.
pub async fn list_all(
    backend: &dyn Backend,
    prefix: &str,
    deadline: Deadline,
) -> BackendResult<Vec<String>> {
    const PAGE: usize = 1000;
    let mut keys = vec![];
    let mut cursor: Option<String> = None;
    loop {
        deadline.check()?;
        let page = backend.list(prefix, cursor.as_deref(), PAGE, deadline).await?;
        keys.extend(page.keys);
        match page.cursor {
            Some(next) => cursor = Some(next),
            None => return Ok(keys),
        }
    }
}
