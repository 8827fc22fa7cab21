//! Element configuration.
//!
//! Every field has a default, so an empty document is a valid
//! configuration:
//!
//! ```yaml
//! channels: 2
//! frequency: fixed-48k      # or from-sample-rate
//! level: 1.0
//! bias: 0.0
//! strict: false
//! platform:
//!   downmix_path: /proc/stb/audio/ac3
//!   sync_mode_path: /proc/stb/stc/0/sync
//!   sync_mode: audio
//! logging:
//!   level: warn
//!   format: plain
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use dca_stream::process::packetize::FrequencyPolicy;
use serde::{Deserialize, Serialize};

use crate::logging::LoggingConfig;
use crate::platform::PlatformConfig;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Only stereo output is supported, got {0} channels")]
    UnsupportedChannels(u8),

    #[error("level must be a finite positive gain, got {0}")]
    InvalidLevel(f32),

    #[error("bias must be finite, got {0}")]
    InvalidBias(f32),

    #[error("sync_mode must not be empty")]
    EmptySyncMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ElementConfig {
    /// Output channel count of the downmix.
    pub channels: u8,
    /// Frequency code written into the LPCM header.
    pub frequency: FrequencyPolicy,
    /// Gain handed to the decoder with every frame.
    pub level: f32,
    /// Bias added by the decoder to every sample.
    pub bias: f32,
    /// Abort the chunk on frame and block decode errors instead of skipping.
    pub strict: bool,
    pub platform: PlatformConfig,
    pub logging: LoggingConfig,
}

impl Default for ElementConfig {
    fn default() -> Self {
        Self {
            channels: 2,
            frequency: FrequencyPolicy::default(),
            level: 1.0,
            bias: 0.0,
            strict: false,
            platform: PlatformConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ElementConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml_ng::from_str(yaml).context("Invalid element configuration")?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read configuration {}", path.display()))?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels != 2 {
            return Err(ConfigError::UnsupportedChannels(self.channels));
        }
        if !self.level.is_finite() || self.level <= 0.0 {
            return Err(ConfigError::InvalidLevel(self.level));
        }
        if !self.bias.is_finite() {
            return Err(ConfigError::InvalidBias(self.bias));
        }
        if self.platform.sync_mode.trim().is_empty() {
            return Err(ConfigError::EmptySyncMode);
        }
        Ok(())
    }

    /// The fail level for per-frame decode problems.
    pub fn fail_level(&self) -> log::Level {
        if self.strict {
            log::Level::Warn
        } else {
            log::Level::Error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogFormat, LogLevel};

    #[test]
    fn empty_document_is_default() -> Result<()> {
        assert_eq!(ElementConfig::from_yaml_str("")?, ElementConfig::default());
        assert_eq!(ElementConfig::from_yaml_str("{}")?, ElementConfig::default());
        Ok(())
    }

    #[test]
    fn parses_every_section() -> Result<()> {
        let config = ElementConfig::from_yaml_str(
            "frequency: from-sample-rate\n\
             level: 0.5\n\
             strict: true\n\
             platform:\n  sync_mode_path: /tmp/sync\n\
             logging:\n  level: trace\n  format: json\n",
        )?;

        assert_eq!(config.frequency, FrequencyPolicy::FromSampleRate);
        assert_eq!(config.level, 0.5);
        assert!(config.strict);
        assert_eq!(config.fail_level(), log::Level::Warn);
        assert_eq!(config.platform.sync_mode_path, Path::new("/tmp/sync"));
        assert_eq!(config.platform.sync_mode, "audio");
        assert_eq!(config.logging.level, LogLevel::Trace);
        assert_eq!(config.logging.format, LogFormat::Json);
        Ok(())
    }

    #[test]
    fn rejects_unknown_and_invalid_fields() {
        assert!(ElementConfig::from_yaml_str("downmix: yes").is_err());
        assert!(ElementConfig::from_yaml_str("channels: 6").is_err());
        assert!(ElementConfig::from_yaml_str("level: -1.0").is_err());
        assert!(ElementConfig::from_yaml_str("platform:\n  sync_mode: ''").is_err());
    }

    #[test]
    fn yaml_round_trip() -> Result<()> {
        let config = ElementConfig {
            frequency: FrequencyPolicy::FromSampleRate,
            ..Default::default()
        };
        let yaml = config.to_yaml_string()?;
        assert_eq!(ElementConfig::from_yaml_str(&yaml)?, config);
        Ok(())
    }
}
