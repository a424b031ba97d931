//! Rate limit key generation.

use std::fmt;

/// Namespace prepended to every key so limiter state never collides with
/// unrelated data in a shared store.
pub const KEY_NAMESPACE: &str = "ratelimit";

/// A key that uniquely identifies a (caller, path) pair.
///
/// Format: `ratelimit:<subject>:<pathname>` where the subject is
/// `user:<id>` for authenticated callers and `ip:<address>` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    key: String,
    /// End offset of the subject within `key`
    subject_end: usize,
}

impl RateLimitKey {
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// The subject discriminator, e.g. `user:42` or `ip:10.0.0.1`.
    pub fn subject(&self) -> &str {
        &self.key[KEY_NAMESPACE.len() + 1..self.subject_end]
    }

    pub fn into_string(self) -> String {
        self.key
    }
}

impl AsRef<str> for RateLimitKey {
    fn as_ref(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Build the rate limit key for a request.
///
/// Authenticated callers are tracked by user id so their quota follows them
/// across addresses; anonymous callers are tracked per address.
pub fn build_key(pathname: &str, ip: &str, user_id: Option<&str>) -> RateLimitKey {
    let subject = match user_id.filter(|id| !id.is_empty()) {
        Some(id) => format!("user:{}", id),
        None => format!("ip:{}", ip),
    };
    let subject_end = KEY_NAMESPACE.len() + 1 + subject.len();
    RateLimitKey {
        key: format!("{}:{}:{}", KEY_NAMESPACE, subject, pathname),
        subject_end,
    }
}
