/*!
 * Configuration
 *
 * `EngineConfig` sizes the decryption engine. `Config` is the command-line
 * configuration file (TOML) that wraps it together with logging settings.
 */

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::keys::DEFAULT_MAX_KEYS;
use crate::core::store::DEFAULT_MAX_SECURITY_ASSOCIATIONS;

/// Capacities of the decryption engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Security association slots
    pub max_security_associations: usize,
    /// Keys accepted by a single `set_keys` call
    pub max_keys: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_security_associations: DEFAULT_MAX_SECURITY_ASSOCIATIONS,
            max_keys: DEFAULT_MAX_KEYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {:?}: {}", path, e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;
        if config.engine.max_security_associations == 0 {
            anyhow::bail!("engine.max_security_associations must be at least 1");
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let config = Config::parse(
            r#"
            [engine]
            max_security_associations = 16
            max_keys = 4

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.max_security_associations, 16);
        assert_eq!(config.engine.max_keys, 4);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config = Config::parse("[engine]\nmax_keys = 8\n").unwrap();
        assert_eq!(config.engine.max_keys, 8);
        assert_eq!(config.engine.max_security_associations, 256);
        assert_eq!(config.logging.level, "info");

        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn test_invalid_config() {
        assert!(Config::parse("[engine]\nmax_keys = \"many\"\n").is_err());
        assert!(Config::parse("[engine]\nmax_security_associations = 0\n").is_err());
    }
}
