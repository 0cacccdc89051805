//! Configuration for the Foreman coordination core.
//!
//! Configuration is a single TOML document with one section per component:
//!
//! ```toml
//! [general]
//! log_level = "info"
//! supervisor_id = "supervisor"
//!
//! [bus]
//! default_hop_limit = 5
//! response_timeout_secs = 30
//! message_log_size = 1000
//!
//! [blockers]
//! chronic_threshold = 3
//! chronic_window_secs = 604800
//!
//! [performance]
//! mvp_threshold = 75.0
//! uptime_floor_secs = 1.0
//! ```
//!
//! # Configuration Location
//!
//! By default the file lives at `<platform config dir>/foreman/config.toml`.
//! This can be overridden with the `FOREMAN_CONFIG_PATH` environment variable.
//! Individual values can be overridden with `FOREMAN_*` variables, see
//! [`ForemanConfig::merge_env_vars`].

use crate::error::{ForemanError, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

// Environment variable names
pub const ENV_CONFIG_PATH: &str = "FOREMAN_CONFIG_PATH";
pub const ENV_LOG_LEVEL: &str = "FOREMAN_LOG_LEVEL";
pub const ENV_HOP_LIMIT: &str = "FOREMAN_HOP_LIMIT";
pub const ENV_RESPONSE_TIMEOUT_SECS: &str = "FOREMAN_RESPONSE_TIMEOUT_SECS";
pub const ENV_MVP_THRESHOLD: &str = "FOREMAN_MVP_THRESHOLD";

/// Longest response timeout a config or a single send may ask for (one day)
pub const MAX_RESPONSE_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Longest chronic window that still fits a millisecond [`chrono::TimeDelta`]
pub const MAX_CHRONIC_WINDOW_SECS: u64 = i64::MAX as u64 / 1000;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForemanConfig {
    #[serde(default)]
    general: GeneralConfig,
    #[serde(default)]
    bus: BusConfig,
    #[serde(default)]
    blockers: BlockerConfig,
    #[serde(default)]
    performance: PerformanceConfig,
}

/// General configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,
    /// Name the supervisor uses on the message bus
    pub supervisor_id: String,
}

/// Message bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Hop limit stamped on freshly sent messages
    pub default_hop_limit: i32,
    /// How long a request waits for its response
    pub response_timeout_secs: u64,
    /// Number of sent messages kept in the message log
    pub message_log_size: usize,
}

/// Blocker resolution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockerConfig {
    /// Reports within the window that make an agent a chronic blocker
    pub chronic_threshold: usize,
    /// Observation window for chronic blocker detection
    pub chronic_window_secs: u64,
    /// Latency samples kept per blocker type
    pub resolution_history_size: usize,
    /// Resolved blockers kept in history
    pub resolved_history_size: usize,
    /// Agents tried, in order, when no scored agent can take a delegation
    pub delegate_pool: Vec<String>,
    /// Delegation target when every candidate is itself blocking
    pub last_resort_agent: String,
}

/// Performance tracking settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Response-time samples kept per agent
    pub response_window: usize,
    /// Weekly scores kept per agent
    pub weekly_window: usize,
    /// Minimum score for the weekly MVP
    pub mvp_threshold: f64,
    /// Smallest uptime used when computing availability
    pub uptime_floor_secs: f64,
    /// Performance events kept in the event log
    pub event_log_size: usize,
    /// Task records kept per agent
    pub task_history_size: usize,
    /// Blocker reports that add one strike
    pub blockers_per_strike: u32,
    /// Sass level at or above which the recipient gets a strike
    pub strike_sass_level: u8,
    /// Strikes that put an agent on the shame list
    pub strikes_for_shame: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            supervisor_id: "supervisor".to_string(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            default_hop_limit: 5,
            response_timeout_secs: 30,
            message_log_size: 1000,
        }
    }
}

impl BusConfig {
    /// Response timeout as a [`Duration`]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }
}

impl Default for BlockerConfig {
    fn default() -> Self {
        Self {
            chronic_threshold: 3,
            chronic_window_secs: 7 * 24 * 60 * 60,
            resolution_history_size: 100,
            resolved_history_size: 1000,
            delegate_pool: vec![
                "agent-resolver".to_string(),
                "agent-fixer".to_string(),
                "agent-specialist".to_string(),
            ],
            last_resort_agent: "agent-last-resort".to_string(),
        }
    }
}

impl BlockerConfig {
    /// Chronic observation window as a [`chrono::Duration`]
    ///
    /// Windows too large to represent saturate to [`chrono::TimeDelta::MAX`].
    pub fn chronic_window(&self) -> chrono::Duration {
        i64::try_from(self.chronic_window_secs)
            .ok()
            .and_then(chrono::TimeDelta::try_seconds)
            .unwrap_or(chrono::TimeDelta::MAX)
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            response_window: 100,
            weekly_window: 52,
            mvp_threshold: 75.0,
            uptime_floor_secs: 1.0,
            event_log_size: 1000,
            task_history_size: 200,
            blockers_per_strike: 3,
            strike_sass_level: 9,
            strikes_for_shame: 3,
        }
    }
}

impl ForemanConfig {
    /// General section
    pub fn general(&self) -> &GeneralConfig {
        &self.general
    }

    /// Mutable general section
    pub fn general_mut(&mut self) -> &mut GeneralConfig {
        &mut self.general
    }

    /// Message bus section
    pub fn bus(&self) -> &BusConfig {
        &self.bus
    }

    /// Mutable message bus section
    pub fn bus_mut(&mut self) -> &mut BusConfig {
        &mut self.bus
    }

    /// Blocker section
    pub fn blockers(&self) -> &BlockerConfig {
        &self.blockers
    }

    /// Mutable blocker section
    pub fn blockers_mut(&mut self) -> &mut BlockerConfig {
        &mut self.blockers
    }

    /// Performance section
    pub fn performance(&self) -> &PerformanceConfig {
        &self.performance
    }

    /// Mutable performance section
    pub fn performance_mut(&mut self) -> &mut PerformanceConfig {
        &mut self.performance
    }
}

impl ForemanConfig {
    /// Load configuration from the default location
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read or parsed
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from_path(&config_path).await
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ForemanError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config = Self::from_toml_str(&content)?;

        config.merge_env_vars()?;
        config.validate()?;

        info!("Configuration loaded successfully from {}", path.display());
        Ok(config)
    }

    /// Load from the default location, falling back to defaults when no file exists.
    ///
    /// Environment overrides apply in both cases.
    pub async fn load_or_default() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path).await
        } else {
            debug!(
                "No configuration at {}, using defaults",
                config_path.display()
            );
            let mut config = Self::default();
            config.merge_env_vars()?;
            config.validate()?;
            Ok(config)
        }
    }

    /// Parse a TOML document without touching the environment.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ForemanError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ForemanError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Save configuration to the default location
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        self.save_to_path(&config_path).await
    }

    /// Save configuration to a specific path atomically
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized or written
    pub async fn save_to_path(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        self.validate()?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ForemanError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = self.to_toml_string()?;

        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("toml.tmp");

        tokio::fs::write(&temp_path, content)
            .await
            .map_err(|e| ForemanError::Config(format!("Failed to write config file: {}", e)))?;

        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|e| ForemanError::Config(format!("Failed to rename config file: {}", e)))?;

        info!("Configuration saved successfully to {}", path.display());
        Ok(())
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid
    pub fn validate(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.general.log_level.as_str()) {
            return Err(ForemanError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.general.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.general.supervisor_id.trim().is_empty() {
            return Err(ForemanError::Config(
                "supervisor_id must not be empty".to_string(),
            ));
        }

        if self.bus.default_hop_limit <= 0 {
            return Err(ForemanError::Config(
                "default_hop_limit must be greater than 0".to_string(),
            ));
        }

        if self.bus.response_timeout_secs == 0 {
            return Err(ForemanError::Config(
                "response_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.bus.response_timeout_secs > MAX_RESPONSE_TIMEOUT_SECS {
            return Err(ForemanError::Config(format!(
                "response_timeout_secs must be at most {}, got {}",
                MAX_RESPONSE_TIMEOUT_SECS, self.bus.response_timeout_secs
            )));
        }

        if self.bus.message_log_size == 0 {
            warn!("message_log_size is 0, the message log will stay empty");
        }

        if self.blockers.chronic_threshold == 0 {
            return Err(ForemanError::Config(
                "chronic_threshold must be greater than 0".to_string(),
            ));
        }

        if self.blockers.chronic_window_secs > MAX_CHRONIC_WINDOW_SECS {
            return Err(ForemanError::Config(format!(
                "chronic_window_secs must be at most {}, got {}",
                MAX_CHRONIC_WINDOW_SECS, self.blockers.chronic_window_secs
            )));
        }

        if self.blockers.last_resort_agent.trim().is_empty() {
            return Err(ForemanError::Config(
                "last_resort_agent must not be empty".to_string(),
            ));
        }

        if !(0.0..=100.0).contains(&self.performance.mvp_threshold) {
            return Err(ForemanError::Config(format!(
                "mvp_threshold must be within 0..=100, got {}",
                self.performance.mvp_threshold
            )));
        }

        if self.performance.uptime_floor_secs <= 0.0 {
            return Err(ForemanError::Config(
                "uptime_floor_secs must be greater than 0".to_string(),
            ));
        }

        if self.performance.response_window == 0 || self.performance.weekly_window == 0 {
            return Err(ForemanError::Config(
                "response_window and weekly_window must be greater than 0".to_string(),
            ));
        }

        if self.performance.blockers_per_strike == 0 {
            return Err(ForemanError::Config(
                "blockers_per_strike must be greater than 0".to_string(),
            ));
        }

        if self.performance.strikes_for_shame == 0 {
            return Err(ForemanError::Config(
                "strikes_for_shame must be greater than 0".to_string(),
            ));
        }

        debug!("Configuration validation passed");
        Ok(())
    }

    /// Merge environment variable overrides into the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables contain invalid values
    pub fn merge_env_vars(&mut self) -> Result<()> {
        debug!("Merging environment variable overrides");

        if let Ok(log_level) = std::env::var(ENV_LOG_LEVEL) {
            debug!("Overriding log_level from environment: {}", log_level);
            self.general.log_level = log_level;
        }

        if let Ok(hop_limit) = std::env::var(ENV_HOP_LIMIT) {
            let limit = hop_limit.parse::<i32>().map_err(|e| {
                ForemanError::Config(format!("Invalid hop limit in environment: {}", e))
            })?;
            debug!("Overriding default_hop_limit from environment: {}", limit);
            self.bus.default_hop_limit = limit;
        }

        if let Ok(timeout) = std::env::var(ENV_RESPONSE_TIMEOUT_SECS) {
            let secs = timeout.parse::<u64>().map_err(|e| {
                ForemanError::Config(format!("Invalid response timeout in environment: {}", e))
            })?;
            debug!("Overriding response_timeout_secs from environment: {}", secs);
            self.bus.response_timeout_secs = secs;
        }

        if let Ok(threshold) = std::env::var(ENV_MVP_THRESHOLD) {
            let value = threshold.parse::<f64>().map_err(|e| {
                ForemanError::Config(format!("Invalid MVP threshold in environment: {}", e))
            })?;
            debug!("Overriding mvp_threshold from environment: {}", value);
            self.performance.mvp_threshold = value;
        }

        Ok(())
    }

    /// Path of the configuration file
    ///
    /// Can be overridden with the FOREMAN_CONFIG_PATH environment variable.
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(custom_path) = std::env::var(ENV_CONFIG_PATH) {
            return Ok(PathBuf::from(custom_path));
        }

        let base_dirs = BaseDirs::new().ok_or_else(|| {
            ForemanError::Config("Could not determine home directory".to_string())
        })?;

        Ok(base_dirs.config_dir().join("foreman").join("config.toml"))
    }
}
