//! Scheduler configuration.
//!
//! Loaded from a TOML file:
//! - tick cadence and state directory
//! - log output format
//! - an `[engine]` table mapped onto [`EngineConfig`]

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use elastic_scaling::{ClusterId, EngineConfig, ResourceType};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// Default seconds between evaluation passes.
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 300;

/// Default state directory.
pub const DEFAULT_STATE_DIR: &str = "/var/lib/elastic-scheduler";

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// The `[engine]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Whether passes run at all.
    pub enabled: bool,
    /// Per-strategy lock TTL in seconds.
    pub lock_ttl_secs: u64,
    /// Maximum candidates fetched per matching policy.
    pub candidate_cap: usize,
    /// Devices requested per search page.
    pub search_page_size: usize,
    /// Clusters evaluated for strategies without associations.
    pub default_clusters: Vec<u64>,
    /// Resource pool for strategies that list none.
    pub default_resource_type: String,
    /// Creator recorded on orders.
    pub order_creator: String,
    /// Order number prefix.
    pub order_number_prefix: String,
}

impl Default for EngineSection {
    fn default() -> Self {
        let defaults = EngineConfig::default();
        Self {
            enabled: defaults.enabled,
            lock_ttl_secs: defaults.lock_ttl.as_secs(),
            candidate_cap: defaults.candidate_cap,
            search_page_size: defaults.search_page_size,
            default_clusters: Vec::new(),
            default_resource_type: defaults.default_resource_type.to_string(),
            order_creator: defaults.order_creator,
            order_number_prefix: defaults.order_number_prefix,
        }
    }
}

/// Main scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between evaluation passes.
    pub tick_interval_secs: u64,
    /// Directory holding `repository.json` and `devices.json`.
    pub state_dir: PathBuf,
    /// Log line format.
    pub log_format: LogFormat,
    /// Engine settings.
    pub engine: EngineSection,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            log_format: LogFormat::default(),
            engine: EngineSection::default(),
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            SchedulerError::Config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| SchedulerError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SchedulerError::Config(format!("cannot render TOML: {e}")))
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is unusable.
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_secs == 0 {
            return Err(SchedulerError::Config(
                "tick_interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.state_dir.as_os_str().is_empty() {
            return Err(SchedulerError::Config("state_dir cannot be empty".to_string()));
        }

        self.engine_config()
            .validate()
            .map_err(|e| SchedulerError::Config(e.to_string()))
    }

    /// Interval between passes.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// Engine configuration built from the `[engine]` table.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        let engine = &self.engine;
        EngineConfig::default()
            .with_enabled(engine.enabled)
            .with_lock_ttl(Duration::from_secs(engine.lock_ttl_secs))
            .with_candidate_cap(engine.candidate_cap)
            .with_search_page_size(engine.search_page_size)
            .with_default_clusters(engine.default_clusters.iter().copied().map(ClusterId::new).collect())
            .with_default_resource_type(ResourceType::new(engine.default_resource_type.as_str()))
            .with_order_creator(engine.order_creator.as_str())
            .with_order_number_prefix(engine.order_number_prefix.as_str())
    }
}
