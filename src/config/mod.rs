use crate::error::{LimiterError, Result};
use crate::rate_limit::local::LocalStoreSettings;
use crate::rate_limit::presets::PresetTable;
use crate::rate_limit::redis::DEFAULT_KEY_PREFIX;
use crate::rate_limit::types::RateLimitPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix for environment variable overrides, e.g.
/// `SPARKLE__RATE_LIMITING__STORE_URL=redis://cache:6379`
pub const ENV_PREFIX: &str = "SPARKLE";

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Shared store connection string.
    ///
    /// `redis://…` selects the Redis store, `memory://` the in-process
    /// sliding window store. Absent means local-fallback-only mode.
    #[serde(default)]
    pub store_url: Option<String>,
    /// Prefix for keys in the shared store
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Bound on each shared store round-trip in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Maximum keys tracked by the local fallback
    #[serde(default = "default_local_max_entries")]
    pub local_max_entries: u64,
    /// Chance per call of scheduling a local store sweep
    #[serde(default = "default_sweep_probability")]
    pub sweep_probability: f64,
    /// Period of the background sweep task (disabled when absent)
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
    /// Overrides for the named presets
    #[serde(default)]
    pub presets: PresetTable,
    /// Policy for check requests naming neither a preset nor explicit limits
    #[serde(default = "default_policy")]
    pub default_policy: RateLimitPolicy,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_store_timeout_ms() -> u64 {
    50
}

fn default_local_max_entries() -> u64 {
    100_000
}

fn default_sweep_probability() -> f64 {
    0.01
}

fn default_policy() -> RateLimitPolicy {
    RateLimitPolicy::new(60_000, 60, "api")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            store_url: None,
            key_prefix: default_key_prefix(),
            store_timeout_ms: default_store_timeout_ms(),
            local_max_entries: default_local_max_entries(),
            sweep_probability: default_sweep_probability(),
            sweep_interval_secs: None,
            presets: PresetTable::default(),
            default_policy: default_policy(),
        }
    }
}

impl RateLimitingConfig {
    /// Store round-trip bound as a Duration
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Sweep period as a Duration
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs.map(Duration::from_secs)
    }

    /// Settings for the local fallback store
    pub fn local_settings(&self) -> LocalStoreSettings {
        LocalStoreSettings {
            max_entries: self.local_max_entries,
            sweep_probability: self.sweep_probability,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LimiterError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load an optional YAML file layered with `SPARKLE__…` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).format(::config::FileFormat::Yaml));
        }
        let config = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let rate_limiting = &self.rate_limiting;

        if rate_limiting.store_timeout_ms == 0 {
            return Err(LimiterError::Config(
                "store_timeout_ms must be > 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&rate_limiting.sweep_probability) {
            return Err(LimiterError::Config(format!(
                "sweep_probability must be within [0, 1], got {}",
                rate_limiting.sweep_probability
            )));
        }

        if rate_limiting.local_max_entries == 0 {
            return Err(LimiterError::Config(
                "local_max_entries must be > 0".to_string(),
            ));
        }

        if rate_limiting.sweep_interval_secs == Some(0) {
            return Err(LimiterError::Config(
                "sweep_interval_secs must be > 0".to_string(),
            ));
        }

        if let Some(url) = &rate_limiting.store_url {
            if !url.starts_with("redis://")
                && !url.starts_with("rediss://")
                && !url.starts_with("memory://")
            {
                return Err(LimiterError::Config(format!(
                    "store_url must start with redis://, rediss:// or memory://, got {}",
                    url
                )));
            }
        }

        rate_limiting
            .default_policy
            .validate()
            .map_err(|e| LimiterError::Config(format!("default_policy: {}", e)))?;

        for preset in crate::rate_limit::PolicyPreset::ALL {
            rate_limiting
                .presets
                .policy(preset)
                .validate()
                .map_err(|e| LimiterError::Config(format!("preset {}: {}", preset, e)))?;
        }

        Ok(())
    }
}
