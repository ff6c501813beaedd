//! Configuration management for the mirror server

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::audio::AudioFormat;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete configuration file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mirror: MirrorConfig,
}

/// Mirror server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Address the listener binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Listening port (0 = ephemeral, assigned port reported at start)
    #[serde(default = "default_port")]
    pub port: u16,

    /// JPEG quality (1-100)
    #[serde(default = "default_quality")]
    pub quality: u8,

    /// Upper bound on capture frame rate
    #[serde(default = "default_max_fps")]
    pub max_fps: u32,

    /// Audio side channel configuration
    #[serde(default)]
    pub audio: AudioConfig,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            quality: default_quality(),
            max_fps: default_max_fps(),
            audio: AudioConfig::default(),
        }
    }
}

/// Audio side channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Wire up the audio channel in the demo binary
    #[serde(default = "default_audio_enabled")]
    pub enabled: bool,

    /// Sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Number of channels (1-2)
    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Bits per sample (8 or 16)
    #[serde(default = "default_bits_per_sample")]
    pub bits_per_sample: u16,

    /// PCM block size read from the source per relay iteration
    #[serde(default = "default_block_bytes")]
    pub block_bytes: usize,
}

impl AudioConfig {
    /// PCM format these settings describe
    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            bits_per_sample: self.bits_per_sample,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: default_audio_enabled(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            bits_per_sample: default_bits_per_sample(),
            block_bytes: default_block_bytes(),
        }
    }
}

// Default value functions
fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_quality() -> u8 {
    70
}
fn default_max_fps() -> u32 {
    30
}
fn default_audio_enabled() -> bool {
    true
}
fn default_sample_rate() -> u32 {
    44_100
}
fn default_channels() -> u16 {
    2
}
fn default_bits_per_sample() -> u16 {
    16
}
fn default_block_bytes() -> usize {
    4096
}

impl Config {
    /// Loads configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.mirror.validate()?;
        Ok(config)
    }

    /// Loads the config file if it exists, otherwise falls back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.mirror.validate()?;
        Ok(config)
    }

    /// Saves configuration to TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl MirrorConfig {
    /// Validates ranges; also run by the server before binding
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_addr.is_empty() {
            return Err(ConfigError::Invalid("bind_addr must not be empty".into()));
        }

        if self.quality == 0 || self.quality > 100 {
            return Err(ConfigError::Invalid(format!(
                "quality must be between 1 and 100, got {}",
                self.quality
            )));
        }

        if self.max_fps == 0 || self.max_fps > 120 {
            return Err(ConfigError::Invalid(format!(
                "max_fps must be between 1 and 120, got {}",
                self.max_fps
            )));
        }

        if self.audio.enabled {
            self.validate_audio_format()?;
        }

        // The relay reads block_bytes-sized chunks whenever a source is
        // attached, even with the demo wiring flag off
        if self.audio.block_bytes < 256 || self.audio.block_bytes > 65_536 {
            return Err(ConfigError::Invalid(format!(
                "audio block_bytes must be between 256 and 65536, got {}",
                self.audio.block_bytes
            )));
        }

        Ok(())
    }

    fn validate_audio_format(&self) -> Result<(), ConfigError> {
        let audio = &self.audio;

        if audio.sample_rate < 8_000 || audio.sample_rate > 192_000 {
            return Err(ConfigError::Invalid(format!(
                "audio sample_rate must be between 8000 and 192000, got {}",
                audio.sample_rate
            )));
        }

        if audio.channels == 0 || audio.channels > 2 {
            return Err(ConfigError::Invalid(format!(
                "audio channels must be 1 or 2, got {}",
                audio.channels
            )));
        }

        if audio.bits_per_sample != 8 && audio.bits_per_sample != 16 {
            return Err(ConfigError::Invalid(format!(
                "audio bits_per_sample must be 8 or 16, got {}",
                audio.bits_per_sample
            )));
        }

        Ok(())
    }
}
