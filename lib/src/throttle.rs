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

//! Exponential-backoff handling for rate-limited storage backends.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::backend::Backend;
use crate::backend::BackendError;
use crate::backend::BackendResult;
use crate::backend::Deadline;
use crate::backend::ListPage;

const INITIAL_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 30_000;

/// Retries per call before the throttle is surfaced to the caller.
const MAX_ATTEMPTS: u32 = 5;

/// Message fragments that identify a rate-limit response regardless of the
/// backend vendor.
const THROTTLE_PATTERNS: &[&str] = &[
    "429",
    "503",
    "rate limit",
    "quota exceeded",
    "serverbusy",
    "too many requests",
];

/// Point-in-time view of the throttle state machine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleStats {
    pub currently_throttled: bool,
    pub total_throttle_events: u64,
    pub consecutive_throttle_events: u64,
    pub current_backoff_ms: u64,
    pub throttle_reasons: BTreeMap<String, u64>,
    pub per_service_throttling: BTreeMap<String, u64>,
}

#[derive(Debug)]
struct ThrottleInner {
    currently_throttled: bool,
    total_events: u64,
    consecutive_events: u64,
    backoff_ms: u64,
    reasons: BTreeMap<String, u64>,
    per_service: BTreeMap<String, u64>,
}

impl Default for ThrottleInner {
    fn default() -> Self {
        Self {
            currently_throttled: false,
            total_events: 0,
            consecutive_events: 0,
            backoff_ms: INITIAL_BACKOFF_MS,
            reasons: BTreeMap::new(),
            per_service: BTreeMap::new(),
        }
    }
}

/// Backoff state machine shared by every call going through one adapter.
#[derive(Debug, Default)]
pub struct ThrottleState {
    inner: Mutex<ThrottleInner>,
}

impl ThrottleState {
    /// Returns the matched reason if `message` looks like a rate-limit
    /// response.
    pub fn classify(message: &str) -> Option<&'static str> {
        let lower = message.to_ascii_lowercase();
        THROTTLE_PATTERNS
            .iter()
            .find(|pattern| lower.contains(*pattern))
            .copied()
    }

    /// Records a throttle event and returns how long to back off before the
    /// next attempt. Backoff doubles per consecutive event, capped at 30 s.
    pub fn record_throttle(&self, reason: &str, service: &str) -> Duration {
        let mut inner = self.inner.lock().unwrap();
        let backoff = Duration::from_millis(inner.backoff_ms);
        inner.currently_throttled = true;
        inner.total_events += 1;
        inner.consecutive_events += 1;
        inner.backoff_ms = (inner.backoff_ms * 2).min(MAX_BACKOFF_MS);
        *inner.reasons.entry(reason.to_string()).or_default() += 1;
        *inner.per_service.entry(service.to_string()).or_default() += 1;
        backoff
    }

    /// A successful call clears the throttled state entirely.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.currently_throttled = false;
        inner.consecutive_events = 0;
        inner.backoff_ms = INITIAL_BACKOFF_MS;
    }

    pub fn is_throttled(&self) -> bool {
        self.inner.lock().unwrap().currently_throttled
    }

    pub fn stats(&self) -> ThrottleStats {
        let inner = self.inner.lock().unwrap();
        ThrottleStats {
            currently_throttled: inner.currently_throttled,
            total_throttle_events: inner.total_events,
            consecutive_throttle_events: inner.consecutive_events,
            current_backoff_ms: inner.backoff_ms,
            throttle_reasons: inner.reasons.clone(),
            per_service_throttling: inner.per_service.clone(),
        }
    }
}

/// Adapter wrapper that retries throttled calls with exponential backoff.
///
/// A call sleeps through at most [`MAX_ATTEMPTS`] backoffs; a caller-imposed
/// deadline converts a would-be sleep past the deadline into `Timeout`.
#[derive(Debug)]
pub struct ThrottlingBackend {
    inner: Box<dyn Backend>,
    state: ThrottleState,
}

impl ThrottlingBackend {
    pub fn new(inner: Box<dyn Backend>) -> Self {
        Self {
            inner,
            state: ThrottleState::default(),
        }
    }

    pub fn state(&self) -> &ThrottleState {
        &self.state
    }

    pub fn inner(&self) -> &dyn Backend {
        self.inner.as_ref()
    }

    fn throttle_reason(err: &BackendError) -> Option<String> {
        match err {
            BackendError::Throttled { reason } => Some(reason.clone()),
            err => ThrottleState::classify(&err.to_string()).map(str::to_string),
        }
    }

    fn backoff_or_timeout(&self, backoff: Duration, deadline: Deadline) -> BackendResult<()> {
        if let Some(remaining) = deadline.remaining()
            && backoff >= remaining
        {
            return Err(BackendError::Timeout);
        }
        std::thread::sleep(backoff);
        Ok(())
    }

    async fn retry<T, F, Fut>(&self, deadline: Deadline, mut op: F) -> BackendResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        let service = self.inner.name().to_string();
        for attempt in 1..=MAX_ATTEMPTS {
            deadline.check()?;
            match op().await {
                Ok(value) => {
                    self.state.record_success();
                    return Ok(value);
                }
                Err(err) => match Self::throttle_reason(&err) {
                    Some(reason) => {
                        let backoff = self.state.record_throttle(&reason, &service);
                        tracing::warn!(%reason, attempt, backoff_ms = backoff.as_millis() as u64, "backend throttled");
                        if attempt == MAX_ATTEMPTS {
                            return Err(BackendError::Throttled { reason });
                        }
                        self.backoff_or_timeout(backoff, deadline)?;
                    }
                    None => return Err(err),
                },
            }
        }
        unreachable!("loop returns on the final attempt");
    }
}

#[async_trait]
impl Backend for ThrottlingBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn concurrency(&self) -> usize {
        self.inner.concurrency()
    }

    async fn get(&self, key: &str, deadline: Deadline) -> BackendResult<Option<Vec<u8>>> {
        self.retry(deadline, || self.inner.get(key, deadline)).await
    }

    async fn put(&self, key: &str, bytes: &[u8], deadline: Deadline) -> BackendResult<()> {
        self.retry(deadline, || self.inner.put(key, bytes, deadline)).await
    }

    async fn delete(&self, key: &str, deadline: Deadline) -> BackendResult<()> {
        self.retry(deadline, || self.inner.delete(key, deadline)).await
    }

    async fn list(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
        deadline: Deadline,
    ) -> BackendResult<ListPage> {
        self.retry(deadline, || self.inner.list(prefix, cursor, limit, deadline))
            .await
    }

    async fn bulk_get(
        &self,
        keys: &[String],
        deadline: Deadline,
    ) -> BackendResult<Vec<Option<Vec<u8>>>> {
        self.retry(deadline, || self.inner.bulk_get(keys, deadline)).await
    }
}
