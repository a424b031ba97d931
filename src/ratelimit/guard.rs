//! Per-request entry point and response header rendering.

use serde::Serialize;
use std::sync::Arc;

use super::key::{build_key, RateLimitKey};
use super::limiter::RateLimiter;
use super::result::RateLimitResult;
use super::rules::{RateLimitConfig, RuleTable};

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

const STATUS_OK: u16 = 200;
const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Resolves the quota and key for a request and checks it.
#[derive(Clone)]
pub struct RateLimitGuard {
    limiter: Arc<RateLimiter>,
    rules: Arc<RuleTable>,
}

impl RateLimitGuard {
    pub fn new(limiter: Arc<RateLimiter>, rules: Arc<RuleTable>) -> Self {
        Self { limiter, rules }
    }

    /// Check one inbound request.
    pub async fn check_request(&self, pathname: &str, ip: &str, user_id: Option<&str>) -> Decision {
        let limit = self.rules.resolve(pathname);
        let key = build_key(pathname, ip, user_id);
        let result = self.limiter.check(&key, &limit).await;

        Decision { key, limit, result }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }
}

/// The outcome of a request check together with what produced it.
#[derive(Debug, Clone)]
pub struct Decision {
    pub key: RateLimitKey,
    pub limit: RateLimitConfig,
    pub result: RateLimitResult,
}

impl Decision {
    pub fn allowed(&self) -> bool {
        self.result.allowed
    }

    /// HTTP status the host should answer with.
    pub fn status_code(&self) -> u16 {
        if self.result.allowed {
            STATUS_OK
        } else {
            STATUS_TOO_MANY_REQUESTS
        }
    }

    /// Informational headers, plus a retry hint when denied.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (HEADER_LIMIT, self.limit.max().to_string()),
            (HEADER_REMAINING, self.result.remaining.to_string()),
            (HEADER_RESET, self.result.reset_in_secs().to_string()),
        ];
        if !self.result.allowed {
            headers.push((HEADER_RETRY_AFTER, self.result.retry_after_secs().to_string()));
        }
        headers
    }

    /// Wire form for hosts that talk JSON.
    pub fn to_response(&self) -> DecisionResponse {
        DecisionResponse {
            status: self.status_code(),
            allowed: self.result.allowed,
            remaining: self.result.remaining,
            reset_in: self.result.reset_in,
            headers: self
                .headers()
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionResponse {
    pub status: u16,
    pub allowed: bool,
    pub remaining: u64,
    pub reset_in: u64,
    pub headers: Vec<(String, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> RateLimitGuard {
        RateLimitGuard::new(
            Arc::new(RateLimiter::memory_only()),
            Arc::new(RuleTable::builtin()),
        )
    }

    fn header<'a>(headers: &'a [(&'static str, String)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    #[tokio::test]
    async fn test_signup_limit_applies() {
        let guard = guard();

        for _ in 0..5 {
            let decision = guard.check_request("/api/auth/signup", "10.0.0.1", None).await;
            assert!(decision.allowed());
        }

        let decision = guard.check_request("/api/auth/signup", "10.0.0.1", None).await;
        assert!(!decision.allowed());
        assert_eq!(decision.status_code(), 429);
        assert_eq!(decision.limit.max(), 5);

        let headers = decision.headers();
        assert_eq!(header(&headers, HEADER_REMAINING), Some("0"));
        assert_eq!(header(&headers, HEADER_LIMIT), Some("5"));
        let retry: u64 = header(&headers, HEADER_RETRY_AFTER).unwrap().parse().unwrap();
        assert!((1..=3_600).contains(&retry));
    }

    #[tokio::test]
    async fn test_allowed_has_no_retry_hint() {
        let decision = guard().check_request("/api/workspaces", "10.0.0.1", None).await;

        assert_eq!(decision.status_code(), 200);
        let headers = decision.headers();
        assert_eq!(header(&headers, HEADER_REMAINING), Some("99"));
        assert_eq!(header(&headers, HEADER_RESET), Some("60"));
        assert_eq!(header(&headers, HEADER_RETRY_AFTER), None);
    }

    #[tokio::test]
    async fn test_user_quota_follows_identity() {
        let guard = guard();

        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            guard.check_request("/api/demo", ip, Some("42")).await;
        }
        let decision = guard.check_request("/api/demo", "10.0.0.4", Some("42")).await;
        assert_eq!(decision.result.remaining, 6);
        assert_eq!(decision.key.subject(), "user:42");

        // An anonymous caller on one of those addresses is unaffected.
        let anonymous = guard.check_request("/api/demo", "10.0.0.1", None).await;
        assert_eq!(anonymous.result.remaining, 9);
    }

    #[tokio::test]
    async fn test_response_serialization() {
        let decision = guard().check_request("/api/demo", "10.0.0.1", None).await;
        let json = serde_json::to_value(decision.to_response()).unwrap();

        assert_eq!(json["status"], 200);
        assert_eq!(json["allowed"], true);
        assert_eq!(json["remaining"], 9);
        assert_eq!(json["headers"][0][0], "X-RateLimit-Limit");
        assert_eq!(json["headers"][0][1], "10");
    }
}
