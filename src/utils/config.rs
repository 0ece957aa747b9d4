//! Configuration management for avfeed
//!
//! This module handles loading and managing configuration from config files
//! and environment variables. The pipeline core only ever sees the already
//! validated structures below.

use crate::utils::error::{AvFeedError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default packet queue byte cap (15 MiB per stream)
pub const DEFAULT_QUEUE_BYTES: usize = 15 * 1024 * 1024;

/// Output sample rate expected by the signal generator
pub const DEFAULT_SAMPLE_RATE: u32 = 32_000;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Fixed output geometry and cadence
    pub output: OutputConfig,

    /// Queueing and transport settings
    pub pipeline: PipelineConfig,

    /// How the source is opened
    pub source: SourceConfig,

    /// Overlays composited onto video frames
    pub overlay: OverlayConfig,

    /// Filter graph options
    pub filter: FilterConfig,

    /// General application settings
    pub general: GeneralConfig,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Active width in pixels
    pub width: u32,

    /// Active lines
    pub height: u32,

    /// Frame rate numerator
    pub frame_rate_num: u32,

    /// Frame rate denominator
    pub frame_rate_den: u32,

    /// Emit one output tick per field instead of per frame
    pub interlace: bool,

    /// Output sample rate in Hz
    pub sample_rate: u32,

    /// Output channel count (interleaved)
    pub channels: u16,

    /// Decode and emit audio at all
    pub audio: bool,
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Byte cap for each packet queue
    pub max_queue_bytes: usize,

    /// Seconds moved by one seek forward/backward command
    pub seek_step_secs: f64,
}

/// Source configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Force an input format (e.g. "mpegts")
    pub format: Option<String>,

    /// Demuxer options as "key=value:key=value"
    pub options: Option<String>,

    /// Start position in minutes
    pub position: f64,
}

/// Overlay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Logo image to composite onto every frame
    pub logo: Option<PathBuf>,

    /// Burn the source timestamp into every frame
    pub timestamp: bool,

    /// On-screen subtitles, optionally naming a preferred stream index
    pub subtitles: Option<usize>,

    /// Teletext subtitles, optionally naming a preferred stream index
    pub teletext_subtitles: Option<usize>,
}

/// Filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Pad widescreen sources to 4:3 with bars top and bottom
    pub letterbox: bool,

    /// Crop widescreen sources to 4:3
    pub pillarbox: bool,

    /// Downmix surround audio to stereo
    pub downmix: bool,

    /// Audio gain factor
    pub volume: f32,
}

/// General application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            width: 720,
            height: 576,
            frame_rate_num: 25,
            frame_rate_den: 1,
            interlace: false,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 2,
            audio: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_queue_bytes: DEFAULT_QUEUE_BYTES,
            seek_step_secs: 10.0,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            letterbox: false,
            pillarbox: false,
            downmix: false,
            volume: 1.0,
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from various sources
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. System config file (/etc/avfeed/config.toml on Linux)
    /// 3. User config file (~/.config/avfeed/config.toml on Linux)
    /// 4. Environment variables (AVFEED_* prefix)
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(system_path) = Self::system_config_path() {
            if system_path.exists() {
                config = Self::from_file(&system_path)?;
            }
        }

        if let Some(user_path) = Self::user_config_path() {
            if user_path.exists() {
                config = Self::from_file(&user_path)?;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Read a configuration file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AvFeedError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&contents)
            .map_err(|e| AvFeedError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to the given path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AvFeedError::Config(format!("Failed to create config directory: {}", e)))?;
        }

        let toml = toml::to_string_pretty(self)
            .map_err(|e| AvFeedError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml)
            .map_err(|e| AvFeedError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(width) = std::env::var("AVFEED_OUTPUT_WIDTH") {
            self.output.width = width.parse()
                .map_err(|_| AvFeedError::Config("Invalid AVFEED_OUTPUT_WIDTH".to_string()))?;
        }

        if let Ok(height) = std::env::var("AVFEED_OUTPUT_HEIGHT") {
            self.output.height = height.parse()
                .map_err(|_| AvFeedError::Config("Invalid AVFEED_OUTPUT_HEIGHT".to_string()))?;
        }

        if let Ok(bytes) = std::env::var("AVFEED_MAX_QUEUE_BYTES") {
            self.pipeline.max_queue_bytes = bytes.parse()
                .map_err(|_| AvFeedError::Config("Invalid AVFEED_MAX_QUEUE_BYTES".to_string()))?;
        }

        if let Ok(log_level) = std::env::var("AVFEED_LOG_LEVEL") {
            self.general.log_level = log_level;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.output.width == 0 || self.output.height == 0 {
            return Err(AvFeedError::Config("Output dimensions must be non-zero".to_string()));
        }

        if self.output.frame_rate_num == 0 || self.output.frame_rate_den == 0 {
            return Err(AvFeedError::Config("Frame rate must be a non-zero ratio".to_string()));
        }

        if self.output.sample_rate == 0 || self.output.channels == 0 {
            return Err(AvFeedError::Config("Audio output format must be non-zero".to_string()));
        }

        if self.pipeline.max_queue_bytes == 0 {
            return Err(AvFeedError::Config("Queue byte cap must be non-zero".to_string()));
        }

        if !self.pipeline.seek_step_secs.is_finite() || self.pipeline.seek_step_secs < 0.0 {
            return Err(AvFeedError::Config("Seek step must be a positive number of seconds".to_string()));
        }

        if self.source.position < 0.0 {
            return Err(AvFeedError::Config("Start position cannot be negative".to_string()));
        }

        if self.filter.letterbox && self.filter.pillarbox {
            return Err(AvFeedError::Config("Letterbox and pillarbox are mutually exclusive".to_string()));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.general.log_level.as_str()) {
            return Err(AvFeedError::Config(format!(
                "Invalid log level '{}', must be one of: {:?}",
                self.general.log_level,
                valid_log_levels
            )));
        }

        Ok(())
    }

    /// Get system config file path
    fn system_config_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        return Some(PathBuf::from("/etc/avfeed/config.toml"));

        #[cfg(target_os = "windows")]
        return std::env::var("PROGRAMDATA").ok()
            .map(|p| PathBuf::from(p).join("avfeed").join("config.toml"));

        #[cfg(target_os = "macos")]
        return Some(PathBuf::from("/Library/Application Support/avfeed/config.toml"));

        #[allow(unreachable_code)]
        None
    }

    /// Get user config file path
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("avfeed").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.output.width, 720);
        assert_eq!(config.output.height, 576);
        assert_eq!(config.output.sample_rate, 32_000);
        assert_eq!(config.pipeline.max_queue_bytes, 15 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.output.width = 0;
        assert!(config.validate().is_err());

        config.output.width = 720;
        config.output.frame_rate_den = 0;
        assert!(config.validate().is_err());

        config.output.frame_rate_den = 1;
        config.filter.letterbox = true;
        config.filter.pillarbox = true;
        assert!(config.validate().is_err());

        config.filter.pillarbox = false;
        config.general.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.general.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[output]\nwidth = 1052\n\n[overlay]\ntimestamp = true\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.output.width, 1052);
        assert_eq!(config.output.height, 576);
        assert!(config.overlay.timestamp);
        assert_eq!(config.filter.volume, 1.0);
    }

    #[test]
    fn test_config_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.overlay.subtitles = Some(3);
        config.pipeline.seek_step_secs = 30.0;
        config.save_to(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.overlay.subtitles, Some(3));
        assert_eq!(loaded.pipeline.seek_step_secs, 30.0);
    }
}
