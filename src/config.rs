//! Configuration management for Tallygate.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TallygateError};
use crate::ratelimit::{LimiterError, LimiterOptions, Policy, TimeUnit};

/// Prefix of environment variables overriding file settings,
/// e.g. `TALLYGATE__LIMITER__REQUESTS_PER_UNIT=10`.
pub const ENV_PREFIX: &str = "TALLYGATE";

/// Main configuration for Tallygate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TallygateConfig {
    /// Rate limit policy and limiter options
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

/// Rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Number of requests allowed per window
    #[serde(default = "default_requests_per_unit")]
    pub requests_per_unit: u64,

    /// Window length as a unit of time
    #[serde(default = "default_unit")]
    pub unit: TimeUnit,

    /// Explicit window length in seconds; overrides `unit`
    #[serde(default)]
    pub window_secs: Option<u64>,

    /// Prefix prepended to every identity to form the store key
    #[serde(default)]
    pub key_prefix: String,

    /// Timeout for a single store round trip in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Use the store's single-step increment-with-expiry when available
    #[serde(default = "default_true")]
    pub prefer_atomic_ttl: bool,

    /// Reinstall the window on over-limit keys that have no expiry
    #[serde(default = "default_true")]
    pub repair_missing_ttl: bool,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_unit: default_requests_per_unit(),
            unit: default_unit(),
            window_secs: None,
            key_prefix: String::new(),
            store_timeout_ms: default_store_timeout_ms(),
            prefer_atomic_ttl: true,
            repair_missing_ttl: true,
        }
    }
}

fn default_requests_per_unit() -> u64 {
    100
}

fn default_unit() -> TimeUnit {
    TimeUnit::Minute
}

fn default_store_timeout_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

impl LimiterConfig {
    /// The configured window length.
    pub fn window(&self) -> Duration {
        self.window_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.unit.duration())
    }

    /// Validate and build the rate limit policy.
    pub fn policy(&self) -> std::result::Result<Policy, LimiterError> {
        match self.window_secs {
            Some(secs) => Policy::new(self.requests_per_unit, Duration::from_secs(secs)),
            None => Policy::per_unit(self.requests_per_unit, self.unit),
        }
    }

    pub fn options(&self) -> LimiterOptions {
        LimiterOptions {
            key_prefix: self.key_prefix.clone(),
            store_timeout: Duration::from_millis(self.store_timeout_ms.max(1)),
            prefer_atomic_ttl: self.prefer_atomic_ttl,
            repair_missing_ttl: self.repair_missing_ttl,
        }
    }
}

/// Which counter store to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store; counts are not shared between instances
    #[default]
    Memory,
    /// Shared Redis instance
    Redis,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Connection URL for networked backends
    #[serde(default = "default_store_url")]
    pub url: String,

    /// How often the memory backend drops expired counters, in seconds
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

impl StoreConfig {
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs.max(1))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
            purge_interval_secs: default_purge_interval_secs(),
        }
    }
}

fn default_store_url() -> String {
    "redis://127.0.0.1/".to_string()
}

fn default_purge_interval_secs() -> u64 {
    60
}

impl TallygateConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| TallygateError::Config(e.to_string()))
    }

    /// Load configuration from an optional file, then apply `TALLYGATE__*`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TallygateConfig::default();

        assert_eq!(config.limiter.requests_per_unit, 100);
        assert_eq!(config.limiter.window(), Duration::from_secs(60));
        assert_eq!(config.limiter.key_prefix, "");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.url, "redis://127.0.0.1/");
        assert_eq!(config.store.purge_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
limiter:
  requests_per_unit: 3
  unit: minute
  key_prefix: "ratelimit:"
  store_timeout_ms: 250
store:
  backend: redis
  url: redis://cache:6379/
"#;
        let config = TallygateConfig::from_yaml(yaml).unwrap();

        let policy = config.limiter.policy().unwrap();
        assert_eq!(policy.threshold(), 3);
        assert_eq!(policy.window(), Duration::from_secs(60));

        let options = config.limiter.options();
        assert_eq!(options.key_prefix, "ratelimit:");
        assert_eq!(options.store_timeout, Duration::from_millis(250));
        assert!(options.prefer_atomic_ttl);
        assert!(options.repair_missing_ttl);

        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.url, "redis://cache:6379/");
    }

    #[test]
    fn test_window_secs_overrides_unit() {
        let yaml = r#"
limiter:
  unit: day
  window_secs: 90
"#;
        let config = TallygateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.limiter.window(), Duration::from_secs(90));
        assert_eq!(
            config.limiter.policy().unwrap().window(),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn test_policy_from_unit() {
        let config = TallygateConfig::from_yaml("limiter:\n  unit: hour\n").unwrap();
        let policy = config.limiter.policy().unwrap();

        assert_eq!(policy.threshold(), 100);
        assert_eq!(policy.window(), Duration::from_secs(3600));
    }

    #[test]
    fn test_purge_interval_floor() {
        let config = TallygateConfig::from_yaml("store:\n  purge_interval_secs: 0\n").unwrap();
        assert_eq!(config.store.purge_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let config = TallygateConfig::from_yaml("limiter:\n  requests_per_unit: 0\n").unwrap();
        assert!(matches!(
            config.limiter.policy(),
            Err(LimiterError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let result = TallygateConfig::from_yaml("store:\n  backend: memcached\n");
        assert!(matches!(result, Err(TallygateError::Config(_))));
    }

    #[test]
    fn test_load_file() {
        let path = std::env::temp_dir().join(format!(
            "tallygate-config-{}.yaml",
            std::process::id()
        ));
        std::fs::write(&path, "limiter:\n  requests_per_unit: 7\n  unit: second\n").unwrap();

        let config = TallygateConfig::load(Some(path.as_path())).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.limiter.requests_per_unit, 7);
        assert_eq!(config.limiter.unit, TimeUnit::Second);
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!(
            "tallygate-from-file-{}.yaml",
            std::process::id()
        ));
        std::fs::write(&path, "store:\n  backend: redis\n").unwrap();

        let config = TallygateConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.limiter.requests_per_unit, 100);
        assert!(matches!(
            TallygateConfig::from_file(&path),
            Err(TallygateError::Io(_))
        ));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let path = Path::new("/nonexistent/tallygate.yaml");
        assert!(matches!(
            TallygateConfig::load(Some(path)),
            Err(TallygateError::Config(_))
        ));
    }
}
