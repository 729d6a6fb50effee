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

//! Test fixtures for brainy-lib.

use brainy_lib::config::StoreConfig;
use brainy_lib::entity::Metadata;
use brainy_lib::entity::NounType;
use brainy_lib::entity::VerbType;
use brainy_lib::repo::AddInput;
use brainy_lib::repo::RelateInput;
use brainy_lib::repo::Repo;
use rand::Rng as _;
use tempfile::TempDir;
use uuid::Uuid;

pub fn new_temp_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("brainy-test-")
        .tempdir()
        .unwrap()
}

/// Small dimension keeps HNSW construction fast in tests.
pub const TEST_DIMENSIONS: usize = 16;

pub fn test_config() -> StoreConfig {
    StoreConfig {
        dimensions: TEST_DIMENSIONS,
        ..StoreConfig::default()
    }
}

/// An in-memory repo checked out to `main`.
pub fn new_repo() -> Repo {
    Repo::in_memory(test_config()).unwrap()
}

/// A filesystem-backed repo plus the directory that owns its storage. Reopen
/// with [`reopen_repo`] to exercise rebuild-on-open.
pub fn new_fs_repo() -> (TempDir, Repo) {
    let temp_dir = new_temp_dir();
    let repo = Repo::open_at_path(temp_dir.path(), test_config()).unwrap();
    (temp_dir, repo)
}

pub fn reopen_repo(temp_dir: &TempDir) -> Repo {
    Repo::open_at_path(temp_dir.path(), test_config()).unwrap()
}

/// Metadata literal from JSON.
pub fn metadata(value: serde_json::Value) -> Metadata {
    match value {
        serde_json::Value::Object(map) => map,
        _ => panic!("metadata fixture must be a JSON object"),
    }
}

pub fn add_text_noun(repo: &Repo, noun_type: NounType, text: &str) -> Uuid {
    repo.add(AddInput {
        noun_type: Some(noun_type),
        text: Some(text.to_string()),
        ..Default::default()
    })
    .unwrap()
}

pub fn add_noun_with_metadata(
    repo: &Repo,
    noun_type: NounType,
    text: &str,
    metadata_value: serde_json::Value,
) -> Uuid {
    repo.add(AddInput {
        noun_type: Some(noun_type),
        text: Some(text.to_string()),
        metadata: metadata(metadata_value),
        ..Default::default()
    })
    .unwrap()
}

pub fn relate(repo: &Repo, from: Uuid, to: Uuid, verb_type: VerbType) -> Uuid {
    repo.relate(RelateInput {
        from,
        to,
        verb_type: Some(verb_type),
        ..Default::default()
    })
    .unwrap()
}

/// A deterministic-ish random vector of the test dimension.
pub fn random_vector() -> Vec<f32> {
    let mut rng = rand::rng();
    (0..TEST_DIMENSIONS).map(|_| rng.random_range(-1.0..1.0)).collect()
}
