//! Configuration management for the server.

use dashsync_engine::{BackoffPolicy, EngineConfig};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Base URL of the upstream data service
    pub upstream_url: String,
    /// Key sent as `apikey` and bearer token, if the upstream wants one
    pub upstream_api_key: Option<String>,
    /// Path probed for reachability
    pub health_path: String,
    /// Where the offline queue is persisted
    pub data_dir: PathBuf,
    /// Synced entity types; `None` keeps the engine defaults
    pub entity_types: Option<Vec<String>>,
    pub refresh_interval: Option<Duration>,
    pub fetch_timeout: Option<Duration>,
    pub probe_timeout: Option<Duration>,
    pub backoff_base: Option<Duration>,
    pub backoff_max_attempts: Option<u32>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = lookup("PORT")
            .unwrap_or_else(|| "3001".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let upstream_url = lookup("UPSTREAM_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::MissingUpstreamUrl)?
            .trim_end_matches('/')
            .to_string();

        let upstream_api_key = lookup("UPSTREAM_API_KEY").filter(|key| !key.is_empty());

        let health_path = lookup("UPSTREAM_HEALTH_PATH")
            .map(|path| format!("/{}", path.trim_start_matches('/')))
            .unwrap_or_else(|| "/health".to_string());

        let data_dir = lookup("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./.dashsync"));

        let entity_types = lookup("ENTITY_TYPES").map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        });

        let number = |key: &'static str| -> Result<Option<u64>, ConfigError> {
            lookup(key)
                .map(|raw| {
                    raw.trim()
                        .parse::<u64>()
                        .map_err(|_| ConfigError::InvalidNumber { key, value: raw })
                })
                .transpose()
        };

        Ok(Self {
            host,
            port,
            upstream_url,
            upstream_api_key,
            health_path,
            data_dir,
            entity_types,
            refresh_interval: number("REFRESH_INTERVAL_SECS")?.map(Duration::from_secs),
            fetch_timeout: number("FETCH_TIMEOUT_MS")?.map(Duration::from_millis),
            probe_timeout: number("PROBE_TIMEOUT_MS")?.map(Duration::from_millis),
            backoff_base: number("BACKOFF_BASE_MS")?.map(Duration::from_millis),
            backoff_max_attempts: number("BACKOFF_MAX_ATTEMPTS")?
                .map(|n| u32::try_from(n).unwrap_or(u32::MAX)),
        })
    }

    /// Engine configuration with every override applied.
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        if let Some(types) = &self.entity_types {
            config = config.with_entity_types(types.iter().cloned());
        }
        if let Some(interval) = self.refresh_interval {
            config = config.with_refresh_interval(interval);
        }
        if let Some(timeout) = self.fetch_timeout {
            config = config
                .with_fetch_timeout(timeout)
                .with_write_timeout(timeout);
        }
        if let Some(timeout) = self.probe_timeout {
            config = config.with_probe_timeout(timeout);
        }

        let mut backoff = BackoffPolicy::default();
        if let Some(base) = self.backoff_base {
            backoff.base = base;
        }
        if let Some(attempts) = self.backoff_max_attempts {
            backoff.max_attempts = attempts;
        }
        config.with_backoff(backoff)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("UPSTREAM_URL environment variable is required")]
    MissingUpstreamUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid {key} value: {value}")]
    InvalidNumber { key: &'static str, value: String },
}
