//! Rig configuration loaded from a TOML file

use crate::alert::AlertConfig;
use crate::device::AdbConfig;
use crate::orchestrator::CycleConfig;
use crate::readiness::ReadinessConfig;
use crate::transport::MqttConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration, one table per concern
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub rig: CycleConfig,
    pub mqtt: MqttConfig,
    pub readiness: ReadinessConfig,
    pub adb: AdbConfig,
    pub alert: AlertConfig,
}

impl RigConfig {
    /// Read, parse and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: RigConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rig.hosts.is_empty() {
            return Err(ConfigError::Invalid("rig.hosts must list at least one host".into()));
        }
        if self.mqtt.broker.is_empty() {
            return Err(ConfigError::Invalid("mqtt.broker is empty".into()));
        }
        if self.mqtt.command_topic.is_empty() || self.mqtt.ack_topic.is_empty() {
            return Err(ConfigError::Invalid(
                "mqtt.command_topic and mqtt.ack_topic are required".into(),
            ));
        }
        if self.rig.cycle_timeout_secs == 0 {
            return Err(ConfigError::Invalid("rig.cycle_timeout_secs must be positive".into()));
        }
        Ok(())
    }
}
