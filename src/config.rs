//! Configuration management for Gatekeeper.
//!
//! Settings are layered: an optional YAML file, then `GATEKEEPER__*`
//! environment variables (e.g. `GATEKEEPER__STORE__URL`), then whatever the
//! binary applies from its command line.

use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::RuleTable;

/// Prefix of environment variables read by [`GatekeeperConfig::load`].
pub const ENV_PREFIX: &str = "GATEKEEPER";

/// Main configuration for the Gatekeeper limiter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Shared store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limit rules; the built-in table is used when absent
    #[serde(default)]
    pub rules: Option<RuleTable>,
}

/// Shared store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Connection string, e.g. `redis://127.0.0.1:6379`. Absent means the
    /// limiter runs on process memory only.
    #[serde(default)]
    pub url: Option<String>,

    /// Bound on each check's shared store round trips, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    100
}

impl StoreConfig {
    /// The configured connection string, treating an empty one as absent.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref().filter(|url| !url.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl GatekeeperConfig {
    /// Load configuration from an optional YAML file and the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    pub(crate) fn load_with_prefix(path: Option<&str>, env_prefix: &str) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::new(path, FileFormat::Yaml));
        }
        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .separator("__")
                .try_parsing(true),
        );

        let config: GatekeeperConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file only.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: GatekeeperConfig = serde_yaml::from_str(&contents)
            .map_err(|e| GatekeeperError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the limiter misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.store.timeout_ms == 0 {
            return Err(GatekeeperError::Config(
                "store.timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The configured rule table, or the built-in one.
    pub fn rule_table(&self) -> RuleTable {
        self.rules.clone().unwrap_or_else(RuleTable::builtin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> String {
        let path = std::env::temp_dir().join(format!("gatekeeper-{}-{}.yaml", name, std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_defaults_are_memory_only() {
        let config = GatekeeperConfig::default();
        assert_eq!(config.store.url(), None);
        assert_eq!(config.store.timeout(), Duration::from_millis(100));
        assert_eq!(config.rule_table(), RuleTable::builtin());
    }

    #[test]
    fn test_empty_url_is_absent() {
        let store = StoreConfig {
            url: Some("  ".to_string()),
            ..StoreConfig::default()
        };
        assert_eq!(store.url(), None);
    }

    #[test]
    fn test_load_without_sources() {
        let config = GatekeeperConfig::load_with_prefix(None, "GATEKEEPER_TEST_NONE").unwrap();
        assert_eq!(config, GatekeeperConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let path = write_temp(
            "load",
            r#"
store:
  url: redis://127.0.0.1:6379
  timeout_ms: 250
rules:
  routes:
    - prefix: /api/reports
      window_ms: 60000
      max: 3
  default:
    window_ms: 1000
    max: 20
"#,
        );

        let config = GatekeeperConfig::load_with_prefix(Some(&path), "GATEKEEPER_TEST_FILE").unwrap();
        assert_eq!(config.store.url(), Some("redis://127.0.0.1:6379"));
        assert_eq!(config.store.timeout(), Duration::from_millis(250));

        let table = config.rule_table();
        assert_eq!(table.resolve("/api/reports/1").max(), 3);
        assert_eq!(table.resolve("/").max(), 20);

        assert_eq!(GatekeeperConfig::from_file(&path).unwrap(), config);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_environment_overrides_file() {
        let path = write_temp("env", "store:\n  url: redis://file:6379\n");
        std::env::set_var("GATEKEEPER_TEST_ENV__STORE__URL", "redis://env:6379");
        std::env::set_var("GATEKEEPER_TEST_ENV__STORE__TIMEOUT_MS", "40");

        let config = GatekeeperConfig::load_with_prefix(Some(&path), "GATEKEEPER_TEST_ENV").unwrap();
        assert_eq!(config.store.url(), Some("redis://env:6379"));
        assert_eq!(config.store.timeout_ms, 40);

        std::env::remove_var("GATEKEEPER_TEST_ENV__STORE__URL");
        std::env::remove_var("GATEKEEPER_TEST_ENV__STORE__TIMEOUT_MS");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_invalid_rules_fail_fast() {
        let path = write_temp(
            "invalid",
            r#"
rules:
  default:
    window_ms: 60000
    max: 0
"#,
        );

        assert!(matches!(
            GatekeeperConfig::load_with_prefix(Some(&path), "GATEKEEPER_TEST_INVALID"),
            Err(GatekeeperError::Config(_))
        ));
        assert!(GatekeeperConfig::from_file(&path).is_err());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = GatekeeperConfig {
            store: StoreConfig {
                url: None,
                timeout_ms: 0,
            },
            rules: None,
        };
        assert!(config.validate().is_err());
    }
}
