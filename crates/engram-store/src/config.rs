use std::path::{Path, PathBuf};
use std::{env, fs};

use serde::{Deserialize, Serialize};

use engram_core::constants::{DEFAULT_DECAY_FACTOR, DEFAULT_MATERIALITY};
use engram_core::{GraphConfig, QuantizerConfig};

use crate::error::{Result, StoreError};

/// Database file inside a data directory.
pub const DB_FILE: &str = "engram.db";

/// Config file inside a data directory.
pub const CONFIG_FILE: &str = "engram.toml";

/// `~/.engram`, falling back to the working directory without a home.
pub fn default_data_dir() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".engram")
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Weights with |w| at or below this are dropped on compaction.
    pub materiality: f32,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            materiality: DEFAULT_MATERIALITY,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub decay_factor: f32,
    pub interval_ms: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            decay_factor: DEFAULT_DECAY_FACTOR,
            interval_ms: 60_000,
        }
    }
}

/// Settings read from `engram.toml`. Every section and field is optional.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub quantizer: QuantizerConfig,
    pub compaction: CompactionConfig,
    pub graph: GraphConfig,
    pub maintenance: MaintenanceConfig,
}

impl EngineConfig {
    /// Load from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| StoreError::Config(e.to_string()))?;
        fs::write(path, content)
            .map_err(|e| StoreError::Config(format!("failed to write {}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<()> {
        self.quantizer.validate()?;
        self.graph.validate()?;
        let materiality = self.compaction.materiality;
        if !(materiality.is_finite() && materiality >= 0.0) {
            return Err(StoreError::Config(format!(
                "materiality must be finite and non-negative, got {materiality}"
            )));
        }
        if !(0.0..=1.0).contains(&self.maintenance.decay_factor) {
            return Err(StoreError::Config(format!(
                "decay_factor must be in [0, 1], got {}",
                self.maintenance.decay_factor
            )));
        }
        if self.maintenance.interval_ms == 0 {
            return Err(StoreError::Config("interval_ms must be positive".into()));
        }
        Ok(())
    }
}
