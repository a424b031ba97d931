//! Sliding window rate limiting against a shared store.
//!
//! Every check records a timestamped member in the key's ordered collection
//! and counts the members left inside the trailing window. Purge, insert,
//! count and expiry run as a single atomic pipeline, so concurrent callers on
//! any number of processes can never both observe room for one more request.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::backend::RateLimitBackend;
use super::clock::{Clock, SystemClock};
use super::key::RateLimitKey;
use super::result::RateLimitResult;
use super::rules::RateLimitConfig;
use super::store::{AtomicWindowStore, OpReply, WindowOp};
use crate::error::{GatekeeperError, Result};

/// Upper bound on one check's round trips before the caller falls back.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(100);

/// Extra lifetime given to a key's collection beyond its window.
const EXPIRY_SLACK_MS: u64 = 1_000;

/// Position of the count reply in the window pipeline.
const COUNT_REPLY: usize = 2;

/// Sliding window backend over an [`AtomicWindowStore`].
pub struct SharedBackend {
    store: Arc<dyn AtomicWindowStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl SharedBackend {
    pub fn new(store: Arc<dyn AtomicWindowStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record a request against `key` and decide whether it is allowed.
    ///
    /// Store failures, timeouts and malformed replies are returned as errors;
    /// choosing a fallback is up to the caller.
    pub async fn check(&self, key: &RateLimitKey, config: &RateLimitConfig) -> Result<RateLimitResult> {
        tokio::time::timeout(self.timeout, self.check_unbounded(key, config))
            .await
            .map_err(|_| GatekeeperError::Timeout(self.timeout))?
    }

    async fn check_unbounded(&self, key: &RateLimitKey, config: &RateLimitConfig) -> Result<RateLimitResult> {
        let now = self.clock.now_ms();
        let window_ms = config.window_ms();

        trace!(key = %key, now, window_ms, "Checking shared rate limit");

        let ops = [
            WindowOp::RemoveBefore {
                score: now.saturating_sub(window_ms),
            },
            WindowOp::Insert {
                score: now,
                member: unique_member(now),
            },
            WindowOp::Count,
            WindowOp::Expire {
                ttl_ms: window_ms.saturating_add(EXPIRY_SLACK_MS),
            },
        ];

        let replies = self.store.execute_atomic(key.as_str(), &ops).await?;
        let count = count_reply(&ops, &replies)?;

        let allowed = count <= config.max();
        let remaining = config.max().saturating_sub(count);

        let reset_in = match self.store.oldest_score(key.as_str()).await? {
            Some(oldest) => oldest.saturating_add(window_ms).saturating_sub(now),
            None => window_ms,
        };

        if !allowed {
            debug!(key = %key, count, limit = config.max(), reset_in, "Shared rate limit exceeded");
        }

        Ok(RateLimitResult {
            allowed,
            remaining,
            reset_in,
        })
    }
}

#[async_trait]
impl RateLimitBackend for SharedBackend {
    async fn check(&self, key: &RateLimitKey, config: &RateLimitConfig) -> Result<RateLimitResult> {
        SharedBackend::check(self, key, config).await
    }

    fn name(&self) -> &'static str {
        "shared"
    }
}

/// A member that stays unique when several requests share a millisecond.
fn unique_member(now: u64) -> String {
    format!("{}-{:016x}", now, rand::random::<u64>())
}

/// Pull the post-insert count out of the pipeline replies.
fn count_reply(ops: &[WindowOp], replies: &[OpReply]) -> Result<u64> {
    if replies.len() != ops.len() {
        return Err(GatekeeperError::MalformedResponse(format!(
            "expected {} replies, got {}",
            ops.len(),
            replies.len()
        )));
    }
    match replies[COUNT_REPLY] {
        OpReply::Count(count) => Ok(count),
        other => Err(GatekeeperError::MalformedResponse(format!(
            "expected a count reply, got {:?}",
            other
        ))),
    }
}
