//! Configuration management for Tessera
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (TESSERA_* prefix, `__` between section and key)
//! 2. tessera.local.toml (local overrides)
//! 3. tessera.toml (deployment config)
//! 4. ~/.config/tessera/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main Tessera configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseraConfig {
    pub coordinator: CoordinatorConfig,
    pub schedule: ScheduleConfig,
    pub store: StoreConfig,
}

/// Placement coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Worker threads delivering executor registration notifications.
    pub notify_workers: usize,
    /// Bounded inbox capacity per notification worker.
    pub notify_queue_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            notify_workers: 2,
            notify_queue_capacity: 1024,
        }
    }
}

/// Split and replica placement policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// A region reporting more bytes than this is split.
    pub split_size_bytes: u64,
    /// A region reporting more rows than this is split.
    pub split_row_count: u64,
    /// Replica count for tables that declare zero.
    pub replica_count: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            split_size_bytes: 64 * 1024 * 1024,
            split_row_count: 1_000_000,
            replica_count: 3,
        }
    }
}

/// Region store proxy settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Rows fetched per round trip by a scan cursor.
    pub scan_batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            scan_batch_size: 256,
        }
    }
}

impl TesseraConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from a specific deployment directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Parse a single TOML document, without layering.
    pub fn from_toml_str(path: impl AsRef<Path>, content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::ParseError {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Rejects settings the runtime cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.coordinator.notify_workers == 0, "coordinator.notify_workers must be at least 1"),
            (
                self.coordinator.notify_queue_capacity == 0,
                "coordinator.notify_queue_capacity must be at least 1",
            ),
            (self.schedule.split_size_bytes == 0, "schedule.split_size_bytes must be positive"),
            (self.schedule.split_row_count == 0, "schedule.split_row_count must be positive"),
            (self.schedule.replica_count == 0, "schedule.replica_count must be at least 1"),
            (self.store.scan_batch_size == 0, "store.scan_batch_size must be at least 1"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(ConfigError::ValidationError((*message).to_string())),
            None => Ok(()),
        }
    }
}
