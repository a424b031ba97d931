//! The uniform outcome of a rate limit check.

use serde::Serialize;
use std::time::Duration;

/// Outcome of a rate limit check, identical whichever backend answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitResult {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests left in the current window; zero when denied
    pub remaining: u64,
    /// Milliseconds until the window's oldest constraint expires
    pub reset_in: u64,
}

impl RateLimitResult {
    pub fn allowed(remaining: u64, reset_in: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_in,
        }
    }

    pub fn denied(reset_in: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_in,
        }
    }

    pub fn reset_in(&self) -> Duration {
        Duration::from_millis(self.reset_in)
    }

    /// Seconds until the window resets, rounded up.
    pub fn reset_in_secs(&self) -> u64 {
        self.reset_in.div_ceil(1_000)
    }

    /// Retry hint for denied callers, never less than one second.
    pub fn retry_after_secs(&self) -> u64 {
        self.reset_in_secs().max(1)
    }
}
