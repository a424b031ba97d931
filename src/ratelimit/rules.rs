//! Rate limit rules configuration and matching.
//!
//! This module maps a request path to the quota that protects it. Rules are
//! matched by literal path prefix in declaration order; the first matching
//! rule wins and unmatched paths get the table's default quota.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{GatekeeperError, Result};

const MINUTE_MS: u64 = 60_000;
const HOUR_MS: u64 = 60 * MINUTE_MS;

/// A resolved quota: at most `max` requests per `window_ms` milliseconds.
///
/// Both values are strictly positive; the only way to build one is through
/// [`RateLimitConfig::new`] (or deserialization, which goes through it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawLimit", into = "RawLimit")]
pub struct RateLimitConfig {
    window_ms: u64,
    max: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawLimit {
    window_ms: u64,
    max: u64,
}

impl RateLimitConfig {
    /// Create a quota, rejecting zero-length windows and zero ceilings.
    pub fn new(window_ms: u64, max: u64) -> Result<Self> {
        if window_ms == 0 {
            return Err(GatekeeperError::Config(
                "window_ms must be greater than zero".to_string(),
            ));
        }
        if max == 0 {
            return Err(GatekeeperError::Config(
                "max must be greater than zero".to_string(),
            ));
        }
        Ok(Self { window_ms, max })
    }

    /// Window length in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Requests allowed per window.
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Window length as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    // Only for the literal tables below, whose values are known to be valid.
    const fn preset(window_ms: u64, max: u64) -> Self {
        Self { window_ms, max }
    }
}

impl TryFrom<RawLimit> for RateLimitConfig {
    type Error = GatekeeperError;

    fn try_from(raw: RawLimit) -> Result<Self> {
        RateLimitConfig::new(raw.window_ms, raw.max)
    }
}

impl From<RateLimitConfig> for RawLimit {
    fn from(limit: RateLimitConfig) -> Self {
        RawLimit {
            window_ms: limit.window_ms,
            max: limit.max,
        }
    }
}

/// A quota applied to every path starting with `prefix`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRoute", into = "RawRoute")]
pub struct RouteRule {
    prefix: String,
    limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawRoute {
    prefix: String,
    window_ms: u64,
    max: u64,
}

impl RouteRule {
    /// Create a rule. An empty prefix is rejected because it would match
    /// every path and shadow all later rules.
    pub fn new(prefix: impl Into<String>, limit: RateLimitConfig) -> Result<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(GatekeeperError::Config(
                "route prefix must not be empty".to_string(),
            ));
        }
        Ok(Self { prefix, limit })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn limit(&self) -> RateLimitConfig {
        self.limit
    }

    fn matches(&self, pathname: &str) -> bool {
        pathname.starts_with(self.prefix.as_str())
    }
}

impl TryFrom<RawRoute> for RouteRule {
    type Error = GatekeeperError;

    fn try_from(raw: RawRoute) -> Result<Self> {
        RouteRule::new(raw.prefix, RateLimitConfig::new(raw.window_ms, raw.max)?)
    }
}

impl From<RouteRule> for RawRoute {
    fn from(rule: RouteRule) -> Self {
        RawRoute {
            prefix: rule.prefix,
            window_ms: rule.limit.window_ms,
            max: rule.limit.max,
        }
    }
}

/// Static table of path prefix rules plus a default quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTable {
    /// Rules in match order
    #[serde(default)]
    routes: Vec<RouteRule>,
    /// Quota for paths no rule matches
    #[serde(default = "default_limit")]
    default: RateLimitConfig,
}

fn default_limit() -> RateLimitConfig {
    RateLimitConfig::preset(MINUTE_MS, 100)
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RuleTable {
    /// Create a table from rules in match order.
    pub fn new(routes: Vec<RouteRule>, default: RateLimitConfig) -> Self {
        Self { routes, default }
    }

    /// The stock application table.
    ///
    /// Signup is guarded by a long window with a very low ceiling, uploads
    /// and the demo by a short window with a low ceiling, and status polling
    /// by a short window with enough headroom for legitimate clients.
    pub fn builtin() -> Self {
        let route = |prefix: &str, limit| RouteRule {
            prefix: prefix.to_string(),
            limit,
        };
        Self {
            routes: vec![
                route("/api/auth/signup", RateLimitConfig::preset(HOUR_MS, 5)),
                route("/api/contracts/upload", RateLimitConfig::preset(MINUTE_MS, 10)),
                route("/api/demo", RateLimitConfig::preset(MINUTE_MS, 10)),
                route("/api/contracts/status", RateLimitConfig::preset(MINUTE_MS, 60)),
            ],
            default: default_limit(),
        }
    }

    /// Load a table from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a table from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse rate limit rules: {}", e)))
    }

    /// Resolve the quota for a request path.
    ///
    /// Returns the limit of the first rule whose prefix is a literal prefix
    /// of `pathname`, or the default.
    pub fn resolve(&self, pathname: &str) -> RateLimitConfig {
        self.routes
            .iter()
            .find(|rule| rule.matches(pathname))
            .map(|rule| rule.limit)
            .unwrap_or(self.default)
    }

    pub fn routes(&self) -> &[RouteRule] {
        &self.routes
    }

    pub fn default_limit(&self) -> RateLimitConfig {
        self.default
    }
}
