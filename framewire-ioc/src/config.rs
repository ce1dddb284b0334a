//! File-based resolution settings

use crate::builder::ContainerBuilder;
use crate::error::{DiError, DiResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for a resolution pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveConfig {
    /// Work allowed per turn before yielding, in milliseconds
    pub max_slice_ms: u64,
    /// Minimum delay between checks while waiting for another scope
    pub wait_poll_ms: u64,
    /// Log progress changes at info level
    pub log_progress: bool,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            max_slice_ms: 16,
            wait_poll_ms: 0,
            log_progress: false,
        }
    }
}

impl ResolveConfig {
    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> DiResult<Self> {
        toml::from_str(toml_str)
            .map_err(|e| DiError::ConfigError(format!("Failed to parse TOML: {}", e)))
    }

    /// Load configuration from JSON string
    pub fn from_json(json_str: &str) -> DiResult<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| DiError::ConfigError(format!("Failed to parse JSON: {}", e)))
    }

    pub fn max_slice(&self) -> Duration {
        Duration::from_millis(self.max_slice_ms)
    }

    pub fn wait_poll(&self) -> Duration {
        Duration::from_millis(self.wait_poll_ms)
    }

    /// Apply the settings to a container builder
    pub fn apply_to_builder(&self, builder: ContainerBuilder) -> ContainerBuilder {
        builder
            .max_slice(self.max_slice())
            .wait_poll(self.wait_poll())
            .log_progress(self.log_progress)
    }
}
