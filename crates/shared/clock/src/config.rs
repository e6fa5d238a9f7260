//! Configuration for the virtual clock
//!
//! Supports JSON so test suites can pin a starting instant in a fixture file:
//!
//! ```json
//! { "start": "2024-01-01T00:00:00Z", "name": "settlement-clock" }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tempo_core::{EPOCH, Timestamp};
use thiserror::Error;

/// Configuration for [`crate::MockClock`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockClockConfig {
    /// Initial current time
    #[serde(default = "default_start")]
    pub start: Timestamp,

    /// Name reported by `Clock::name`
    #[serde(default = "default_name")]
    pub name: String,

    /// Name of the thread that runs `after_func` callbacks
    #[serde(default = "default_callback_thread_name")]
    pub callback_thread_name: String,
}

fn default_start() -> Timestamp {
    EPOCH
}

fn default_name() -> String {
    "MockClock".to_string()
}

fn default_callback_thread_name() -> String {
    "tempo-callbacks".to_string()
}

impl Default for MockClockConfig {
    fn default() -> Self {
        Self {
            start: default_start(),
            name: default_name(),
            callback_thread_name: default_callback_thread_name(),
        }
    }
}

impl MockClockConfig {
    /// Default configuration starting at `start`
    pub fn starting_at(start: Timestamp) -> Self {
        Self {
            start,
            ..Default::default()
        }
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;

        Self::from_json(&content)
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Configuration loading errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Io { path: String, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),
}
