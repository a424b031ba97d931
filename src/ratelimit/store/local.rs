//! In-process window store.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::{AtomicWindowStore, OpReply, WindowOp};
use crate::error::Result;
use crate::ratelimit::clock::{Clock, SystemClock};

#[derive(Debug, Default)]
struct OrderedSet {
    /// Members ordered by (score, member)
    entries: BTreeSet<(u64, String)>,
    /// Absolute expiry time in ms
    expires_at: Option<u64>,
}

impl OrderedSet {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// An [`AtomicWindowStore`] held in process memory.
///
/// One lock covers a whole pipeline, which gives the same atomicity as a
/// transaction against a remote store. Useful for single-node deployments
/// and for exercising the shared backend without a server.
pub struct LocalWindowStore {
    sets: Mutex<HashMap<String, OrderedSet>>,
    clock: Arc<dyn Clock>,
}

impl LocalWindowStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            sets: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of members under `key`, ignoring expired collections.
    pub fn member_count(&self, key: &str) -> usize {
        let now = self.clock.now_ms();
        self.sets
            .lock()
            .get(key)
            .filter(|set| !set.is_expired(now))
            .map_or(0, |set| set.entries.len())
    }
}

impl Default for LocalWindowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AtomicWindowStore for LocalWindowStore {
    async fn execute_atomic(&self, key: &str, ops: &[WindowOp]) -> Result<Vec<OpReply>> {
        let now = self.clock.now_ms();
        let mut sets = self.sets.lock();

        if sets.get(key).is_some_and(|set| set.is_expired(now)) {
            sets.remove(key);
        }
        let set = sets.entry(key.to_string()).or_default();

        let replies = ops
            .iter()
            .map(|op| match op {
                WindowOp::RemoveBefore { score } => {
                    let kept = set.entries.split_off(&(*score, String::new()));
                    let removed = set.entries.len() as u64;
                    set.entries = kept;
                    OpReply::Removed(removed)
                }
                WindowOp::Insert { score, member } => {
                    OpReply::Inserted(u64::from(set.entries.insert((*score, member.clone()))))
                }
                WindowOp::Count => OpReply::Count(set.entries.len() as u64),
                WindowOp::Expire { ttl_ms } => {
                    if set.entries.is_empty() {
                        OpReply::Expired(false)
                    } else {
                        set.expires_at = Some(now.saturating_add(*ttl_ms));
                        OpReply::Expired(true)
                    }
                }
            })
            .collect();

        // Empty collections do not exist, as in a remote sorted-set store.
        if sets.get(key).is_some_and(|set| set.entries.is_empty()) {
            sets.remove(key);
        }

        Ok(replies)
    }

    async fn oldest_score(&self, key: &str) -> Result<Option<u64>> {
        let now = self.clock.now_ms();
        let sets = self.sets.lock();

        Ok(sets
            .get(key)
            .filter(|set| !set.is_expired(now))
            .and_then(|set| set.entries.first())
            .map(|(score, _)| *score))
    }
}
