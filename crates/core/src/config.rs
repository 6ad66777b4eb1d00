//! Configuration management for block mesh simulations.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::clock::LogicalClock;
use crate::error::{Error, Result};
use crate::types::Mode;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshConfig {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory; every node directory lives below it
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_replica_dir")]
    pub replica_dir: String,
    #[serde(default = "default_participant_dir")]
    pub participant_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    #[serde(default = "default_start_time")]
    pub start_time: u64,
    #[serde(default = "default_step")]
    pub step: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("blockmesh")
}

fn default_replica_dir() -> String {
    "Storages".to_string()
}

fn default_participant_dir() -> String {
    "Users".to_string()
}

fn default_start_time() -> u64 {
    1
}

fn default_step() -> u64 {
    1
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            replica_dir: default_replica_dir(),
            participant_dir: default_participant_dir(),
        }
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            start_time: default_start_time(),
            step: default_step(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

impl MeshConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading mesh config {}", path.display()))?;
        let config: MeshConfig = toml::from_str(&content)
            .with_context(|| format!("parsing mesh config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration rooted at `data_dir`
    pub fn with_data_dir(mode: Mode, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            storage: StorageConfig {
                data_dir: data_dir.into(),
                ..StorageConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.clock.start_time < 1 {
            return Err(Error::Config("clock.start_time must be > 0".to_string()));
        }
        if self.clock.step < 1 {
            return Err(Error::Config("clock.step must be > 0".to_string()));
        }
        if self.storage.replica_dir.is_empty() || self.storage.participant_dir.is_empty() {
            return Err(Error::Config("storage directory names must not be empty".to_string()));
        }
        if self.storage.replica_dir == self.storage.participant_dir {
            return Err(Error::Config(
                "replica and participant directories must differ".to_string(),
            ));
        }
        Ok(())
    }

    pub fn replica_path(&self, name: &str) -> PathBuf {
        self.storage
            .data_dir
            .join(&self.storage.replica_dir)
            .join(name)
    }

    pub fn participant_path(&self, address: &str) -> PathBuf {
        self.storage
            .data_dir
            .join(&self.storage.participant_dir)
            .join(address)
    }

    pub fn build_clock(&self) -> Result<LogicalClock> {
        LogicalClock::new(self.clock.start_time, self.clock.step)
    }
}
