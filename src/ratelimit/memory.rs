//! Process-local fixed window counters.
//!
//! This backend is the fallback when no shared store is configured or the
//! shared store fails. Each key gets a counter that resets at a fixed
//! boundary, so up to twice the quota can pass in a short span straddling
//! two windows. It gives no guarantee across processes.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use super::backend::RateLimitBackend;
use super::clock::{Clock, SystemClock};
use super::key::RateLimitKey;
use super::result::RateLimitResult;
use super::rules::RateLimitConfig;
use crate::error::Result;

/// Requests counted in the current window for one key.
#[derive(Debug, Clone, Copy)]
struct MemoryCounter {
    count: u64,
    /// Absolute time (ms) at which this window ends
    reset_time: u64,
}

impl MemoryCounter {
    fn fresh(now: u64, config: &RateLimitConfig) -> Self {
        Self {
            count: 1,
            reset_time: now.saturating_add(config.window_ms()),
        }
    }

    fn is_stale(&self, now: u64) -> bool {
        now > self.reset_time
    }
}

/// Fixed window counters held in process memory.
///
/// Each check holds the key's map entry for its whole read-modify-write, so
/// concurrent checks on one key are serialized.
pub struct MemoryBackend {
    counters: DashMap<String, MemoryCounter>,
    clock: Arc<dyn Clock>,
}

impl MemoryBackend {
    /// Create a backend driven by the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: DashMap::new(),
            clock,
        }
    }

    /// Count a request against `key` and decide whether it is allowed.
    pub fn check(&self, key: &RateLimitKey, config: &RateLimitConfig) -> RateLimitResult {
        let now = self.clock.now_ms();

        trace!(key = %key, "Checking memory rate limit");

        match self.counters.entry(key.as_str().to_owned()) {
            Entry::Occupied(mut entry) if !entry.get().is_stale(now) => {
                let counter = entry.get_mut();
                let reset_in = counter.reset_time - now;

                if counter.count >= config.max() {
                    debug!(
                        key = %key,
                        count = counter.count,
                        limit = config.max(),
                        "Memory rate limit exceeded"
                    );
                    return RateLimitResult::denied(reset_in);
                }

                counter.count += 1;
                RateLimitResult::allowed(config.max() - counter.count, reset_in)
            }
            Entry::Occupied(mut entry) => {
                entry.insert(MemoryCounter::fresh(now, config));
                RateLimitResult::allowed(config.max() - 1, config.window_ms())
            }
            Entry::Vacant(entry) => {
                debug!(
                    key = %key,
                    limit = config.max(),
                    window_ms = config.window_ms(),
                    "Creating memory rate limit counter"
                );
                entry.insert(MemoryCounter::fresh(now, config));
                RateLimitResult::allowed(config.max() - 1, config.window_ms())
            }
        }
    }

    /// Drop every counter.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.counters.clear();
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimitBackend for MemoryBackend {
    async fn check(&self, key: &RateLimitKey, config: &RateLimitConfig) -> Result<RateLimitResult> {
        Ok(MemoryBackend::check(self, key, config))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
