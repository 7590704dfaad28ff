//! Node configuration.
//!
//! Loaded from the JSON file named by `SAHAAY_CONFIG`, or defaults when the
//! variable is unset. Every section may be omitted.

use crate::metrics::MetricsConfig;
use crate::persistence::ArchiveConfig;
use crate::reaper::ReaperConfig;
use crate::registry::RegistryConfig;
use crate::routing::RoutingConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_ENV: &str = "SAHAAY_CONFIG";

/// Longest accepted message lifetime, ten years
pub const MAX_EXPIRY_HOURS: f64 = 87_600.0;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub api_addr: SocketAddr,

    /// Period of the stale-device sweep and pending relay retry
    pub maintenance_interval_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            api_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            maintenance_interval_secs: 15,
        }
    }
}

impl NodeConfig {
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub node: NodeConfig,
    pub registry: RegistryConfig,
    pub routing: RoutingConfig,
    pub reaper: ReaperConfig,
    pub metrics: MetricsConfig,
    pub archive: Option<ArchiveConfig>,

    /// Expiry applied to new messages that do not carry one
    pub default_expiry_hours: Option<f64>,
}

impl MeshConfig {
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: MeshConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Read the file named by `SAHAAY_CONFIG`, falling back to defaults
    pub fn load() -> ConfigResult<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => {
                tracing::info!(path = %path, "Loading configuration");
                Self::from_json_file(path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.routing.fanout == 0 {
            return Err(ConfigError::Invalid("routing.fanout must be at least 1".into()));
        }
        let limits = &self.routing.hop_limits;
        if [limits.low, limits.medium, limits.high, limits.critical].contains(&0) {
            return Err(ConfigError::Invalid("hop limits must be at least 1".into()));
        }
        if self.routing.handoff_timeout_ms == 0 {
            return Err(ConfigError::Invalid("routing.handoff_timeout_ms must be positive".into()));
        }
        if self.routing.max_concurrent_relays == 0 {
            return Err(ConfigError::Invalid(
                "routing.max_concurrent_relays must be at least 1".into(),
            ));
        }
        if self.reaper.interval_secs == 0 || self.node.maintenance_interval_secs == 0 {
            return Err(ConfigError::Invalid("intervals must be positive".into()));
        }
        if self.registry.stale_after_secs == 0 {
            return Err(ConfigError::Invalid("registry.stale_after_secs must be positive".into()));
        }
        if let Some(hours) = self.default_expiry_hours {
            if !(hours.is_finite() && hours > 0.0 && hours <= MAX_EXPIRY_HOURS) {
                return Err(ConfigError::Invalid(format!(
                    "default_expiry_hours must be a positive number up to {MAX_EXPIRY_HOURS}"
                )));
            }
        }
        Ok(())
    }
}
