//! CLI configuration
//!
//! Sources in increasing priority: built-in defaults, the optional config
//! file, then `LICENSEDESK_` environment variables with `__` between nested
//! keys (e.g. `LICENSEDESK_BACKEND__DEFAULT_URL`).

use anyhow::{Context, Result};
use licensedesk_client::{BackendResolver, DEFAULT_BACKEND_URL, DEFAULT_POLL_INTERVAL, HostMapping};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub backend: BackendSettings,
    pub monitor: MonitorSettings,
    /// Overrides the platform state directory
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Hostname the client presents itself as, looked up in `hosts`
    pub hostname: String,
    pub default_url: String,
    pub hosts: Vec<HostMapping>,
    pub timeout_secs: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            default_url: DEFAULT_BACKEND_URL.to_string(),
            hosts: Vec::new(),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub interval_secs: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
        }
    }
}

impl Settings {
    /// Load settings, optionally from a TOML or YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a value has the wrong type
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("LICENSEDESK")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .context("Failed to load configuration")?;

        Ok(settings.try_deserialize()?)
    }

    pub fn resolver(&self) -> Result<BackendResolver> {
        Ok(BackendResolver::from_config(
            &self.backend.default_url,
            &self.backend.hosts,
        )?)
    }

    /// Request timeout, never zero
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.backend.timeout_secs.max(1))
    }

    /// Health poll interval, never zero
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.interval_secs.max(1))
    }
}
