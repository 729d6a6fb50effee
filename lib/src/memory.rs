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

//! Container memory detection and derived query limits.
//!
//! On start the store detects available memory from, in order: an explicit
//! override, `CLOUD_RUN_MEMORY`, `MEMORY_LIMIT`, the cgroup limit, and
//! finally free system memory. With detected memory `C`, the maximum query
//! limit is `floor(C * 0.25 / 100 MiB) * 1000`, clamped to at least 1000.

use std::fs;

use serde::Deserialize;
use serde::Serialize;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// What the detected number was derived from.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MemoryBasis {
    Override,
    ContainerMemory,
    ReservedMemory,
    FreeMemory,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryLimits {
    pub basis: MemoryBasis,
    pub detected_bytes: Option<u64>,
    pub max_query_limit: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub limits: MemoryLimits,
    pub node_cache_mb: usize,
    pub recommendations: Vec<String>,
}

/// Parses sizes as plain bytes (`1073741824`), binary units (`512Mi`, `2Gi`),
/// or decimal-style shorthand (`512M`, `2G`) which cloud providers use for
/// binary sizes anyway.
pub fn parse_memory_size(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(bytes) = value.parse::<u64>() {
        return Some(bytes);
    }
    let (digits, unit): (String, String) = value.chars().partition(|c| c.is_ascii_digit());
    let number: u64 = digits.parse().ok()?;
    let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
        "k" | "ki" | "kb" => 1024,
        "m" | "mi" | "mb" => MIB,
        "g" | "gi" | "gb" => GIB,
        _ => return None,
    };
    Some(number * multiplier)
}

fn cgroup_limit() -> Option<u64> {
    // cgroup v2, then v1. "max" (v2) and absurdly large values (v1) both mean
    // unlimited.
    for path in [
        "/sys/fs/cgroup/memory.max",
        "/sys/fs/cgroup/memory/memory.limit_in_bytes",
    ] {
        if let Ok(raw) = fs::read_to_string(path) {
            let raw = raw.trim();
            if raw == "max" {
                continue;
            }
            if let Ok(bytes) = raw.parse::<u64>()
                && bytes < u64::MAX / 2
            {
                return Some(bytes);
            }
        }
    }
    None
}

fn free_system_memory() -> Option<u64> {
    let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
    let line = meminfo
        .lines()
        .find(|line| line.starts_with("MemAvailable:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

fn max_query_limit(bytes: u64) -> usize {
    let budget = bytes / 4;
    let units = (budget / (100 * MIB)) as usize;
    (units * 1000).max(1000)
}

/// Detects available memory and derives the query limit.
pub fn detect_limits(override_bytes: Option<u64>) -> MemoryLimits {
    let (basis, detected) = if let Some(bytes) = override_bytes {
        (MemoryBasis::Override, Some(bytes))
    } else if let Some(bytes) = std::env::var("CLOUD_RUN_MEMORY")
        .ok()
        .as_deref()
        .and_then(parse_memory_size)
    {
        (MemoryBasis::ContainerMemory, Some(bytes))
    } else if let Some(bytes) = std::env::var("MEMORY_LIMIT")
        .ok()
        .as_deref()
        .and_then(parse_memory_size)
    {
        (MemoryBasis::ReservedMemory, Some(bytes))
    } else if let Some(bytes) = cgroup_limit() {
        (MemoryBasis::ContainerMemory, Some(bytes))
    } else {
        (MemoryBasis::FreeMemory, free_system_memory())
    };
    let max_query_limit = detected.map_or(1000, max_query_limit);
    MemoryLimits {
        basis,
        detected_bytes: detected,
        max_query_limit,
    }
}

/// Auto-sizes the shared HNSW node cache: a quarter of the query budget,
/// between 64 MiB and 1 GiB.
pub fn auto_node_cache_mb(limits: &MemoryLimits) -> usize {
    let bytes = limits.detected_bytes.unwrap_or(512 * MIB);
    ((bytes / 16) / MIB).clamp(64, 1024) as usize
}

pub fn memory_stats(limits: &MemoryLimits, node_cache_mb: usize) -> MemoryStats {
    let mut recommendations = vec![];
    if limits.detected_bytes.is_none() {
        recommendations.push(
            "memory could not be detected; set MEMORY_LIMIT to size caches explicitly"
                .to_string(),
        );
    }
    if limits.max_query_limit <= 1000 {
        recommendations.push(
            "detected memory supports only the minimum query limit; large scans will page"
                .to_string(),
        );
    }
    MemoryStats {
        limits: limits.clone(),
        node_cache_mb,
        recommendations,
    }
}
