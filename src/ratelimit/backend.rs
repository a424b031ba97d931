//! Rate limit backend trait for abstracting shared and local implementations.

use async_trait::async_trait;

use super::key::RateLimitKey;
use super::result::RateLimitResult;
use super::rules::RateLimitConfig;
use crate::error::Result;

/// Trait for rate limit backends.
///
/// This trait abstracts over the shared sliding-window backend and the local
/// fixed-window backend so the coordinator can treat either as its primary
/// path. Implementations count the request as a side effect of checking it.
#[async_trait]
pub trait RateLimitBackend: Send + Sync {
    /// Count a request against `key` and decide whether it is allowed.
    async fn check(&self, key: &RateLimitKey, config: &RateLimitConfig) -> Result<RateLimitResult>;

    /// Short backend name used in logs.
    fn name(&self) -> &'static str;
}
