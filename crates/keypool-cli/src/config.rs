//! Configuration file for the keypool binary

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use keypool_pool::KeypoolConfig;
use serde::{Deserialize, Serialize};

use crate::workload::WorkloadConfig;

/// Registry and pool settings plus the simulated workload
///
/// ```toml
/// [registry]
/// max_entries = 50
///
/// [pool]
/// max_total = 10
/// min_idle = 2
///
/// [workload]
/// tables = 4
/// workers = 32
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    #[serde(flatten)]
    pub keypool: KeypoolConfig,
    pub workload: WorkloadConfig,
}

impl CliConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("Failed to parse configuration")?;
        config.keypool.validate()?;
        config.workload.validate()?;
        Ok(config)
    }

    /// Load `path`, or the default config file if present, or built-in defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_config_file() {
                Some(path) if path.exists() => path,
                _ => {
                    tracing::debug!("no configuration file; using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration: {:?}", path))?;
        let config = Self::from_toml_str(&text)
            .with_context(|| format!("Invalid configuration: {:?}", path))?;
        tracing::info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

/// `<config dir>/keypool/keypool.toml`
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("keypool").join("keypool.toml"))
}
