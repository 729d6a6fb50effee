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

//! In-memory storage adapter for tests and ephemeral stores.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::ops::Bound;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backend::Backend;
use crate::backend::BackendResult;
use crate::backend::Deadline;
use crate::backend::ListPage;

/// Keys live in a sorted map, so listings are naturally lexicographic and
/// cursors are plain exclusive lower bounds.
#[derive(Debug, Default)]
pub struct MemBackend {
    data: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemBackend {
    pub fn name() -> &'static str {
        "memory"
    }

    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl Backend for MemBackend {
    fn name(&self) -> &str {
        Self::name()
    }

    fn concurrency(&self) -> usize {
        100
    }

    async fn get(&self, key: &str, deadline: Deadline) -> BackendResult<Option<Vec<u8>>> {
        deadline.check()?;
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: &[u8], deadline: Deadline) -> BackendResult<()> {
        deadline.check()?;
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str, deadline: Deadline) -> BackendResult<()> {
        deadline.check()?;
        self.data.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
        deadline: Deadline,
    ) -> BackendResult<ListPage> {
        deadline.check()?;
        let data = self.data.lock().unwrap();
        let lower = match cursor {
            Some(cursor) => Bound::Excluded(cursor.to_string()),
            None => Bound::Included(prefix.to_string()),
        };
        let mut keys: Vec<String> = data
            .range((lower, Bound::Unbounded))
            .map(|(key, _)| key.clone())
            .take_while(|key| key.starts_with(prefix))
            .take(limit + 1)
            .collect();
        let next = if keys.len() > limit {
            keys.truncate(limit);
            keys.last().cloned()
        } else {
            None
        };
        Ok(ListPage { keys, cursor: next })
    }

    async fn bulk_get(
        &self,
        keys: &[String],
        deadline: Deadline,
    ) -> BackendResult<Vec<Option<Vec<u8>>>> {
        deadline.check()?;
        let data = self.data.lock().unwrap();
        Ok(keys.iter().map(|key| data.get(key).cloned()).collect())
    }
}

#[cfg(test)]
mod tests {
    use pollster::FutureExt as _;

    use super::*;

    #[test]
    fn test_list_cursor() {
        let backend = MemBackend::new();
        for key in ["a/1", "a/2", "a/3", "b/1"] {
            backend.put(key, b"x", Deadline::NONE).block_on().unwrap();
        }
        let page = backend.list("a/", None, 2, Deadline::NONE).block_on().unwrap();
        assert_eq!(page.keys, ["a/1", "a/2"]);
        let page = backend
            .list("a/", page.cursor.as_deref(), 2, Deadline::NONE)
            .block_on()
            .unwrap();
        assert_eq!(page.keys, ["a/3"]);
        assert_eq!(page.cursor, None);
    }

    #[test]
    fn test_bulk_get_positional() {
        let backend = MemBackend::new();
        backend.put("x", b"1", Deadline::NONE).block_on().unwrap();
        let out = backend
            .bulk_get(&["x".to_string(), "missing".to_string()], Deadline::NONE)
            .block_on()
            .unwrap();
        assert_eq!(out, vec![Some(b"1".to_vec()), None]);
    }
}
