//! Rate limit coordinator.

use std::sync::Arc;
use tracing::{trace, warn};

use super::backend::RateLimitBackend;
use super::key::RateLimitKey;
use super::memory::MemoryBackend;
use super::result::RateLimitResult;
use super::rules::RateLimitConfig;

/// The public entry point for rate limit checks.
///
/// When a shared backend is configured every check tries it first; if it
/// fails, that one check is answered by the process-local memory backend.
/// No failure state is carried between checks. Without a shared backend all
/// checks go straight to memory.
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct RateLimiter {
    shared: Option<Arc<dyn RateLimitBackend>>,
    memory: MemoryBackend,
}

impl RateLimiter {
    pub fn new(shared: Option<Arc<dyn RateLimitBackend>>, memory: MemoryBackend) -> Self {
        Self { shared, memory }
    }

    /// A limiter that only ever uses process memory.
    pub fn memory_only() -> Self {
        Self::new(None, MemoryBackend::new())
    }

    /// A limiter with a shared backend and a wall-clock memory fallback.
    pub fn with_shared(shared: Arc<dyn RateLimitBackend>) -> Self {
        Self::new(Some(shared), MemoryBackend::new())
    }

    /// Check and count a request. Never fails.
    pub async fn check(&self, key: &RateLimitKey, config: &RateLimitConfig) -> RateLimitResult {
        if let Some(shared) = &self.shared {
            match shared.check(key, config).await {
                Ok(result) => return result,
                Err(e) => {
                    warn!(
                        key = %key,
                        backend = shared.name(),
                        error = %e,
                        "Shared rate limit check failed, falling back to memory"
                    );
                }
            }
        }

        trace!(key = %key, "Using memory rate limit backend");
        self.memory.check(key, config)
    }

    /// Clear all memory backend counters. Shared store state is untouched.
    pub fn clear_all(&self) {
        self.memory.clear();
    }

    pub fn has_shared_store(&self) -> bool {
        self.shared.is_some()
    }

    pub fn memory(&self) -> &MemoryBackend {
        &self.memory
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::memory_only()
    }
}
