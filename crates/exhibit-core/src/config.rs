//! Configuration types for the exhibit pipeline.
//!
//! Configuration is read from an optional `exhibit.json` file. Every field has
//! a default, so an absent file yields a fully usable configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ExhibitError, Result};
use crate::repair::SelfHealingExecutor;

/// The default config file name.
pub const CONFIG_FILE_NAME: &str = "exhibit.json";

/// Default broadcast buffer per event subscriber.
const fn default_event_capacity() -> usize {
    100
}

/// Default number of thinking traces a stream view keeps.
const fn default_thinking_buffer_size() -> usize {
    5
}

/// Default repair budget for executable content.
const fn default_max_retries() -> u32 {
    2
}

/// Default library assumed for scripts that do not name one.
fn default_library() -> String {
    "d3".to_string()
}

/// Default value for boolean options that default to true.
const fn default_true() -> bool {
    true
}

/// Main configuration for the exhibit pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Optional cap on concurrently running generators. `None` dispatches every item at once.
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    /// Buffer size of the event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// How many `manifest_thinking` traces a stream view retains.
    #[serde(default = "default_thinking_buffer_size")]
    pub thinking_buffer_size: usize,

    /// Self-healing settings for executable content.
    #[serde(default)]
    pub repair: RepairConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            event_capacity: default_event_capacity(),
            thinking_buffer_size: default_thinking_buffer_size(),
            repair: RepairConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            ExhibitError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads `exhibit.json` from a specific directory, or defaults if it is absent.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        Self::load_from_file(&config_path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `ExhibitError::ConfigParseError` if the file exists but contains
    /// invalid JSON, and `ExhibitError::ConfigValidationError` if values are out
    /// of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(ExhibitError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| ExhibitError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// - `maxConcurrency`, when set, must be greater than 0
    /// - `eventCapacity` must be greater than 0
    /// - `thinkingBufferSize` must be greater than 0
    /// - `repair.maxRetries` must not exceed the executor's ceiling (2)
    /// - `repair.defaultLibrary` must not be empty
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == Some(0) {
            return Err(ExhibitError::config_validation(
                "maxConcurrency must be greater than 0 when set",
                "Remove maxConcurrency from exhibit.json to dispatch every item at once",
            ));
        }

        if self.event_capacity == 0 {
            return Err(ExhibitError::config_validation(
                "eventCapacity must be greater than 0",
                "Set eventCapacity to at least 1 in your exhibit.json",
            ));
        }

        if self.thinking_buffer_size == 0 {
            return Err(ExhibitError::config_validation(
                "thinkingBufferSize must be greater than 0",
                "Set thinkingBufferSize to at least 1 in your exhibit.json",
            ));
        }

        if self.repair.max_retries > SelfHealingExecutor::MAX_RETRIES_CEILING {
            return Err(ExhibitError::config_validation(
                format!(
                    "repair.maxRetries must be at most {}, got {}",
                    SelfHealingExecutor::MAX_RETRIES_CEILING,
                    self.repair.max_retries
                ),
                "Lower repair.maxRetries in your exhibit.json; generated scripts get at most two repairs",
            ));
        }

        if self.repair.default_library.trim().is_empty() {
            return Err(ExhibitError::config_validation(
                "repair.defaultLibrary must not be empty",
                "Name the visualization library scripts target, e.g. \"d3\"",
            ));
        }

        Ok(())
    }
}

/// Settings for the bounded self-healing loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairConfig {
    /// Whether executable outputs are run and repaired during the build.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of repair requests per component instance.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Library passed to the repair collaborator when the content names none.
    #[serde(default = "default_library")]
    pub default_library: String,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_retries: default_max_retries(),
            default_library: default_library(),
        }
    }
}
