//! CLI configuration management.

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// CLI configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Directory holding pre-installed runtimes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_cache: Option<PathBuf>,
    /// Pipeline file used when `--pipeline` is not given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_pipeline: Option<PathBuf>,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Prefix for input variables read from the environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_prefix: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl CliConfig {
    /// Load configuration from file.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_yaml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("io", "relstat", "relstat")
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    /// Set a configuration value. An empty value clears optional keys.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let optional = |v: &str| (!v.is_empty()).then(|| v.to_string());
        match key {
            "tool_cache" => self.tool_cache = optional(value).map(PathBuf::from),
            "default_pipeline" => self.default_pipeline = optional(value).map(PathBuf::from),
            "env_prefix" => self.env_prefix = optional(value),
            "log_format" => {
                self.log_format = match value {
                    "text" => LogFormat::Text,
                    "json" => LogFormat::Json,
                    _ => bail!("Invalid log format: {}", value),
                };
            }
            _ => bail!("Unknown config key: {}", key),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_known_keys() {
        let mut config = CliConfig::default();
        config.set("tool_cache", "/opt/hostedtoolcache").unwrap();
        config.set("log_format", "json").unwrap();
        config.set("env_prefix", "RELSTAT").unwrap();

        assert_eq!(config.tool_cache, Some(PathBuf::from("/opt/hostedtoolcache")));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.env_prefix.as_deref(), Some("RELSTAT"));

        config.set("env_prefix", "").unwrap();
        assert_eq!(config.env_prefix, None);
    }

    #[test]
    fn test_set_rejects_unknown() {
        let mut config = CliConfig::default();
        assert!(config.set("api_url", "x").is_err());
        assert!(config.set("log_format", "xml").is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.yaml");

        assert_eq!(CliConfig::load_from(&path).unwrap(), CliConfig::default());

        let mut config = CliConfig::default();
        config.set("default_pipeline", "relstat.yaml").unwrap();
        config.save_to(&path).unwrap();

        let loaded = CliConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
