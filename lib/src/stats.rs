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

//! Per-instance operation counters, persisted as `system/statistics.json`.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;

use crate::entity::FORMAT_VERSION;
use crate::entity::MillisSinceEpoch;
use crate::throttle::ThrottleStats;

/// Counters for cache behavior and operation impact. Cheap to bump from any
/// thread; snapshotted on flush.
#[derive(Debug, Default)]
pub struct Statistics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    flushes: AtomicU64,
    operations: Mutex<BTreeMap<String, u64>>,
}

impl Statistics {
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_operation(&self, name: &str) {
        let mut operations = self.operations.lock().unwrap();
        *operations.entry(name.to_string()).or_default() += 1;
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, throttle: ThrottleStats) -> StatisticsDoc {
        StatisticsDoc {
            version: FORMAT_VERSION,
            cache_hits: self.cache_hits(),
            cache_misses: self.cache_misses(),
            flushes: self.flushes.load(Ordering::Relaxed),
            operations: self.operations.lock().unwrap().clone(),
            throttle,
            last_updated: MillisSinceEpoch::now(),
        }
    }
}

/// Persisted statistics document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsDoc {
    pub version: u32,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub flushes: u64,
    pub operations: BTreeMap<String, u64>,
    pub throttle: ThrottleStats,
    pub last_updated: MillisSinceEpoch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = Statistics::default();
        stats.record_cache_hit();
        stats.record_cache_hit();
        stats.record_cache_miss();
        stats.record_operation("add");
        stats.record_operation("add");
        stats.record_operation("find");
        let doc = stats.snapshot(ThrottleStats::default());
        assert_eq!(doc.cache_hits, 2);
        assert_eq!(doc.cache_misses, 1);
        assert_eq!(doc.operations["add"], 2);
        assert_eq!(doc.operations["find"], 1);
    }
}
