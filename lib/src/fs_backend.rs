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

//! Filesystem storage adapter.

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::backend::Backend;
use crate::backend::BackendError;
use crate::backend::BackendResult;
use crate::backend::Deadline;
use crate::backend::ListPage;
use crate::file_util::persist_content_addressed_temp_file;

fn to_read_err(err: std::io::Error, key: &str) -> BackendError {
    BackendError::Read {
        key: key.to_string(),
        source: err.into(),
    }
}

fn to_write_err(err: std::io::Error, key: &str) -> BackendError {
    BackendError::Write {
        key: key.to_string(),
        source: err.into(),
    }
}

/// Adapter storing each key as a file under a root directory. Writes go
/// through a temp file and an atomic rename, so readers never observe a
/// partially written document.
#[derive(Debug)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn name() -> &'static str {
        "filesystem"
    }

    /// Creates the root directory and returns an adapter over it.
    pub fn init(root: &Path) -> BackendResult<Self> {
        fs::create_dir_all(root).map_err(|err| to_write_err(err, &root.display().to_string()))?;
        Ok(Self::load(root))
    }

    pub fn load(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in key.split('/') {
            path.push(part);
        }
        path
    }

    fn collect_keys(&self, dir: &Path, key_prefix: &str, out: &mut BTreeSet<String>) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let key = if key_prefix.is_empty() {
                name.to_string()
            } else {
                format!("{key_prefix}/{name}")
            };
            let path = entry.path();
            if path.is_dir() {
                self.collect_keys(&path, &key, out);
            } else {
                out.insert(key);
            }
        }
    }
}

#[async_trait]
impl Backend for FsBackend {
    fn name(&self) -> &str {
        Self::name()
    }

    fn concurrency(&self) -> usize {
        1
    }

    async fn get(&self, key: &str, deadline: Deadline) -> BackendResult<Option<Vec<u8>>> {
        deadline.check()?;
        match fs::read(self.key_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(to_read_err(err, key)),
        }
    }

    async fn put(&self, key: &str, bytes: &[u8], deadline: Deadline) -> BackendResult<()> {
        deadline.check()?;
        let path = self.key_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| to_write_err(err, key))?;
        }
        let mut temp_file = NamedTempFile::new_in(&self.root).map_err(|err| to_write_err(err, key))?;
        temp_file
            .write_all(bytes)
            .map_err(|err| to_write_err(err, key))?;
        persist_content_addressed_temp_file(temp_file, path)
            .map_err(|err| to_write_err(err, key))?;
        Ok(())
    }

    async fn delete(&self, key: &str, deadline: Deadline) -> BackendResult<()> {
        deadline.check()?;
        match fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(to_write_err(err, key)),
        }
    }

    async fn list(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
        deadline: Deadline,
    ) -> BackendResult<ListPage> {
        deadline.check()?;
        // The deepest directory fully covered by the prefix bounds the walk;
        // the string prefix filter below handles any trailing partial
        // component.
        let dir_prefix = match prefix.rfind('/') {
            Some(pos) => &prefix[..pos],
            None => "",
        };
        let start_dir = self.key_path(dir_prefix);
        let mut all = BTreeSet::new();
        self.collect_keys(&start_dir, dir_prefix, &mut all);

        let mut keys: Vec<String> = all
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .filter(|key| cursor.is_none_or(|cursor| key.as_str() > cursor))
            .collect();
        let next = if keys.len() > limit {
            keys.truncate(limit);
            keys.last().cloned()
        } else {
            None
        };
        Ok(ListPage { keys, cursor: next })
    }
}
