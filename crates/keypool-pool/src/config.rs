//! File configuration for a registry and its pools

use std::path::Path;

use keypool_core::Result;
use serde::{Deserialize, Serialize};

use crate::pool::PoolConfig;
use crate::registry::RegistryConfig;

/// Top-level configuration, usually read from a TOML file
///
/// ```toml
/// [registry]
/// expire_after_write_ms = 300000
/// refresh_after_write_ms = 60000
/// max_entries = 100
///
/// [pool]
/// min_idle = 10
/// max_total = 100
/// block_when_exhausted = true
/// ```
///
/// Every section and field is optional; missing values take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeypoolConfig {
    pub registry: RegistryConfig,
    pub pool: PoolConfig,
}

impl KeypoolConfig {
    /// Parse and validate a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded keypool configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.registry.validate()?;
        self.pool.validate()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use keypool_core::KeypoolError;

    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = KeypoolConfig::from_toml_str("").expect("parse");
        assert_eq!(config, KeypoolConfig::default());
        assert_eq!(config.pool.max_total(), 100);
        assert_eq!(config.pool.min_idle(), 10);
        assert_eq!(
            config.registry.expire_after_write(),
            Duration::from_secs(300)
        );
        assert_eq!(
            config.registry.refresh_after_write(),
            Some(Duration::from_secs(60))
        );
        assert_eq!(config.registry.max_entries(), 100);
        assert_eq!(config.registry.initial_capacity(), 10);
    }

    #[test]
    fn test_partial_sections() {
        let config = KeypoolConfig::from_toml_str(
            r#"
            [registry]
            refresh_after_write_ms = 0

            [pool]
            max_total = 8
            min_idle = 2
            block_when_exhausted = false
            "#,
        )
        .expect("parse");

        assert_eq!(config.registry.refresh_after_write(), None);
        assert_eq!(config.registry.max_entries(), 100);
        assert_eq!(config.pool.max_total(), 8);
        assert_eq!(config.pool.min_idle(), 2);
        assert!(!config.pool.block_when_exhausted());
        assert_eq!(config.pool.max_wait(), Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = KeypoolConfig::from_toml_str("[pool]\nmax_total = 4\nmin_idle = 5\n")
            .expect_err("min_idle above max_total");
        assert!(matches!(err, KeypoolError::Configuration(_)), "got {err}");

        let err = KeypoolConfig::from_toml_str("[registry]\nmax_entries = 0\n")
            .expect_err("no room for entries");
        assert!(matches!(err, KeypoolError::Configuration(_)), "got {err}");
    }

    #[test]
    fn test_malformed_toml_is_a_parse_error() {
        let err = KeypoolConfig::from_toml_str("[pool\nmax_total = ").expect_err("malformed");
        assert!(matches!(err, KeypoolError::ConfigParse(_)), "got {err}");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[pool]\nmax_total = 12\nmin_idle = 3").expect("write");

        let config = KeypoolConfig::load(file.path()).expect("load");
        assert_eq!(config.pool.max_total(), 12);
        assert_eq!(config.pool.min_idle(), 3);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = KeypoolConfig::load(dir.path().join("absent.toml")).expect_err("missing");
        assert!(matches!(err, KeypoolError::Io(_)), "got {err}");
    }
}
