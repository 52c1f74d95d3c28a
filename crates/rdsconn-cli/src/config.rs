//! Client configuration at `~/.rdsconn/config.toml`.
//!
//! Provides default local port, endpoint, tunnel duration, region and
//! profile. CLI flags always override config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Default proxy settings.
    #[serde(default)]
    pub default: DefaultConfig,
}

/// Default proxy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultConfig {
    /// Local port to listen on (0 = scan upwards from the remote port).
    #[serde(default)]
    pub local_port: u16,

    /// Instance connect endpoint id (empty = discover from the VPC).
    #[serde(default)]
    pub endpoint_id: String,

    /// Requested tunnel lifetime in seconds.
    #[serde(default = "default_max_tunnel_duration")]
    pub max_tunnel_duration: u64,

    /// AWS region (empty = SDK default chain).
    #[serde(default)]
    pub region: String,

    /// AWS profile (empty = SDK default chain).
    #[serde(default)]
    pub profile: String,
}

impl Default for DefaultConfig {
    fn default() -> Self {
        Self {
            local_port: 0,
            endpoint_id: String::new(),
            max_tunnel_duration: default_max_tunnel_duration(),
            region: String::new(),
            profile: String::new(),
        }
    }
}

fn default_max_tunnel_duration() -> u64 {
    rdsconn_core::DEFAULT_MAX_TUNNEL_DURATION.as_secs()
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Default config location, `~/.rdsconn/config.toml`.
    pub fn default_path() -> std::path::PathBuf {
        let home = dirs::home_dir().unwrap_or_default();
        home.join(".rdsconn").join("config.toml")
    }
}

/// `Some(value)` unless the value is empty.
pub fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
