//! Capture and service configuration.
//!
//! A [`CaptureConfig`] is fixed for the lifetime of one supervisor. Changing
//! any capture parameter means building a new supervisor around it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest accepted frame width or height, in pixels.
pub const MAX_DIMENSION: u32 = 8192;

/// Configuration for one capture device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Camera device index (`/dev/video<N>` on Linux).
    pub device_index: u32,
    /// Explicit device node. Takes precedence over `device_index` when set.
    pub device_path: Option<PathBuf>,
    /// Requested frame width in pixels.
    pub width: u32,
    /// Requested frame height in pixels.
    pub height: u32,
    /// Requested frames per second.
    pub fps: u32,
    /// Capacity of the frame buffer.
    pub buffer_size: usize,
    /// Quality hint (1-100) for downstream JPEG encoders.
    pub jpeg_quality: u8,
    /// Re-open the device automatically after it is lost.
    pub auto_reconnect: bool,
    /// Constant wait before each reconnect attempt.
    #[serde(with = "duration_secs")]
    pub reconnect_interval: Duration,
    /// Reconnect attempts allowed before the worker gives up.
    pub max_reconnect_attempts: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            device_path: default_device_path(),
            width: 640,
            height: 480,
            fps: 30,
            buffer_size: 2,
            jpeg_quality: 80,
            auto_reconnect: true,
            reconnect_interval: Duration::from_secs(5),
            max_reconnect_attempts: 10,
        }
    }
}

#[cfg(unix)]
fn default_device_path() -> Option<PathBuf> {
    Some(PathBuf::from("/dev/video0"))
}

#[cfg(not(unix))]
fn default_device_path() -> Option<PathBuf> {
    None
}

impl CaptureConfig {
    /// Creates a new configuration with the specified dimensions.
    pub fn with_dimensions(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// Resolves the device node to open.
    pub fn device_node(&self) -> PathBuf {
        self.device_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("/dev/video{}", self.device_index)))
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidDimensions);
        }
        if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION {
            return Err(ConfigError::DimensionsTooLarge {
                width: self.width,
                height: self.height,
            });
        }
        if self.fps == 0 || self.fps > 120 {
            return Err(ConfigError::InvalidFrameRate);
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize);
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::InvalidQuality(self.jpeg_quality));
        }
        Ok(())
    }

    /// Time budget for a single frame at the requested rate.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid frame dimensions")]
    InvalidDimensions,
    #[error("frame dimensions {width}x{height} exceed the 8192 pixel limit")]
    DimensionsTooLarge { width: u32, height: u32 },
    #[error("invalid frame rate (must be 1-120 fps)")]
    InvalidFrameRate,
    #[error("invalid buffer size (must be at least 1 frame)")]
    InvalidBufferSize,
    #[error("invalid jpeg quality {0} (must be 1-100)")]
    InvalidQuality(u8),
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
    #[error("failed to write config file: {0}")]
    FileWriteError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Service-level settings used by the binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP control surface binds to.
    pub host: String,
    /// Port for the HTTP control surface.
    pub port: u16,
    /// Default log filter when `RUST_LOG` is not set.
    pub log_level: String,
    /// Frames older than this many seconds are considered stale by consumers.
    pub max_frame_age: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8000,
            log_level: "info".to_owned(),
            max_frame_age: 5,
        }
    }
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.capture.validate()?;
        Ok(config)
    }

    /// Loads the file if it exists, otherwise writes and returns the defaults.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::from_file(path);
        }

        let config = Self::default();
        config.save(path)?;
        tracing::info!(path = %path.display(), "Wrote default configuration");
        Ok(config)
    }

    /// Writes the configuration as TOML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;
        std::fs::write(path.as_ref(), content)
            .map_err(|e| ConfigError::FileWriteError(e.to_string()))
    }
}

/// Serializes a `Duration` as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
