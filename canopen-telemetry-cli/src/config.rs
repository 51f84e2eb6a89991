//! Configuration loading and parsing

use anyhow::{Context, Result};
use canopen_telemetry::{AcquisitionConfig, FieldMap, FieldMapConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Replaces the built-in motor controller map when present
    #[serde(default)]
    pub field_map: Option<FieldMapConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Replay,
    Socketcan,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,
    /// JSON-lines capture played back by the replay transport
    pub replay_file: Option<PathBuf>,
    /// SocketCAN interface; defaults to `can<channel>`
    pub interface: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_csv_dir")]
    pub csv_dir: PathBuf,
    #[serde(default = "default_export_after_trial")]
    pub export_after_trial: bool,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_csv_dir() -> PathBuf {
    PathBuf::from("csv_exports")
}

fn default_export_after_trial() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            csv_dir: default_csv_dir(),
            export_after_trial: default_export_after_trial(),
        }
    }
}

impl AppConfig {
    /// Field map to decode with: the configured one, or the built-in map
    pub fn field_map(&self) -> Result<FieldMap> {
        match &self.field_map {
            Some(config) => FieldMap::from_config(config.clone())
                .context("Invalid [field_map] section"),
            None => Ok(FieldMap::motor_controller()),
        }
    }

    /// Directory holding one table per trial
    pub fn trials_dir(&self) -> PathBuf {
        self.storage.data_dir.join("trials")
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}
