//! Daemon-level config (§10 Ambient stack "Configuration"): pool sizes and
//! paths that don't belong in the resource/target YAML catalogues. Read
//! from a small TOML file; every field has a default so a missing file is
//! not fatal.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DaemonConfig {
    pub apply_pool_desired: usize,
    pub apply_pool_max: usize,
    pub apply_pool_max_queue: usize,
    pub timer_pool_desired: usize,
    pub timer_pool_max: usize,
    pub timer_pool_max_queue: usize,
    pub persisted_state_path: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            apply_pool_desired: 4,
            apply_pool_max: 8,
            apply_pool_max_queue: 256,
            timer_pool_desired: 4,
            timer_pool_max: 8,
            timer_pool_max_queue: 256,
            persisted_state_path: PathBuf::from("resource_original_values.txt"),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {e}"),
            Self::Parse(e) => write!(f, "failed to parse config file: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl DaemonConfig {
    /// Loads `path` if it exists; a missing file quietly yields the
    /// defaults above (there's nothing analogous to a malformed-root
    /// failure here since every field defaults).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }
}
