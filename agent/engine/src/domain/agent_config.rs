// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0

// Agent Configuration
//
// YAML settings for an agent process hosting a dependency engine:
// - engine tuning (backoff policy, bounce delay, event buffer)
// - logging level and format
// - built-in diagnostic manifolds
//
// Discovery precedence matches the rest of the agent tooling: explicit path,
// KEYSTONE_CONFIG_PATH, working directory, user home, system.

use crate::domain::backoff::BackoffPolicy;
use crate::domain::config::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "KEYSTONE_CONFIG_PATH";
pub const BOUNCE_DELAY_ENV: &str = "KEYSTONE_BOUNCE_DELAY";
pub const LOG_FORMAT_ENV: &str = "KEYSTONE_LOG_FORMAT";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

/// Serializable subset of [`EngineConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub backoff: BackoffPolicy,

    #[serde(default, with = "humantime_serde")]
    pub bounce_delay: Duration,

    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            bounce_delay: Duration::ZERO,
            event_capacity: default_event_capacity(),
        }
    }
}

impl EngineSettings {
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            backoff: self.backoff.clone(),
            bounce_delay: self.bounce_delay,
            event_capacity: self.event_capacity,
            is_fatal: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_interval", with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: default_heartbeat_interval(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Candidate config paths, in precedence order (existing or not).
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            paths.push(PathBuf::from(path));
        }
        paths.push(PathBuf::from("./keystone-config.yaml"));
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".keystone").join("config.yaml"));
        }
        #[cfg(unix)]
        paths.push(PathBuf::from("/etc/keystone/config.yaml"));
        #[cfg(windows)]
        paths.push(PathBuf::from("C:\\ProgramData\\Keystone\\config.yaml"));
        paths
    }

    /// First existing path from [`AgentConfig::search_paths`].
    pub fn discover_config() -> Option<PathBuf> {
        Self::search_paths().into_iter().find(|path| path.exists())
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // An explicit path must load
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = match Self::discover_config() {
            Some(path) => {
                tracing::info!("Loading configuration from discovered path: {:?}", path);
                Self::from_yaml_file(&path)
                    .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?
            }
            None => {
                tracing::debug!("No configuration file found in standard locations. Using defaults.");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(BOUNCE_DELAY_ENV) {
            match humantime::parse_duration(val.trim()) {
                Ok(delay) => {
                    tracing::info!("Environment override: {}={:?}", BOUNCE_DELAY_ENV, delay);
                    self.engine.bounce_delay = delay;
                }
                Err(e) => {
                    tracing::warn!("Invalid value for {}: '{}' ({}). Ignoring.", BOUNCE_DELAY_ENV, val, e);
                }
            }
        }

        if let Ok(val) = std::env::var(LOG_FORMAT_ENV) {
            match val.to_lowercase().as_str() {
                "compact" => self.logging.format = LogFormat::Compact,
                "json" => self.logging.format = LogFormat::Json,
                _ => {
                    tracing::warn!(
                        "Invalid value for {}: '{}'. Expected compact/json. Ignoring.",
                        LOG_FORMAT_ENV,
                        val
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.engine
            .to_engine_config()
            .validate()
            .map_err(|e| anyhow::anyhow!("engine: {}", e))?;

        if self.logging.level.trim().is_empty() {
            anyhow::bail!("logging.level cannot be empty");
        }

        if self.heartbeat.interval.is_zero() {
            anyhow::bail!("heartbeat.interval must be greater than zero");
        }

        Ok(())
    }
}

fn default_event_capacity() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert_eq!(config.engine.event_capacity, 256);
    }

    #[test]
    fn test_parse_full_document() {
        let yaml = r#"
engine:
  backoff:
    kind: fixed
    delay: 2s
  bounce_delay: 50ms
  event_capacity: 64
logging:
  level: debug
  format: json
heartbeat:
  interval: 5s
"#;
        let config = AgentConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(
            config.engine.backoff,
            BackoffPolicy::Fixed {
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(config.engine.bounce_delay, Duration::from_millis(50));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.heartbeat.interval, Duration::from_secs(5));

        let engine = config.engine.to_engine_config();
        assert_eq!(engine.event_capacity, 64);
        assert!(engine.is_fatal.is_none());
    }

    #[test]
    fn test_yaml_roundtrip_through_file() {
        let config = AgentConfig::default();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_yaml_string().unwrap().as_bytes()).unwrap();

        let loaded = AgentConfig::load_or_default(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(loaded.engine, config.engine);
        assert_eq!(loaded.heartbeat, config.heartbeat);
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yaml");
        assert!(AgentConfig::load_or_default(Some(missing)).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AgentConfig::default();
        config.heartbeat.interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.engine.backoff = BackoffPolicy::Fixed { delay: Duration::ZERO };
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.logging.level = " ".to_string();
        assert!(config.validate().is_err());
    }
}
