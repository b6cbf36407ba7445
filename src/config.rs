//! Configuration management for CrabCapture
//!
//! Loads and saves the runtime options: default camera, capture deadline,
//! recording bitrate, output file naming and which capabilities are on.

use crate::errors::CameraError;
use crate::types::LensFacing;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrabCaptureConfig {
    pub camera: CameraConfig,
    pub recording: RecordingConfig,
    pub storage: StorageConfig,
    pub features: FeaturesConfig,
}

/// Camera selection and still-capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Lens facing picked when the caller does not name a camera
    pub default_facing: LensFacing,
    /// Deadline between capture completion and a matching image
    pub capture_timeout_ms: u64,
}

/// Video encoder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Encoding bitrate in bits per second
    pub bitrate: u32,
}

/// Output file configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory captures and recordings are written to
    pub output_directory: String,
    pub photo_prefix: String,
    pub video_prefix: String,
    /// chrono format string for the timestamp part of file names
    pub file_date_format: String,
}

/// Capability switches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    pub still_capture: bool,
    pub video_recording: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            default_facing: LensFacing::Back,
            capture_timeout_ms: 5000,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            bitrate: 10_000_000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_directory: "./captures".to_string(),
            photo_prefix: "IMG".to_string(),
            video_prefix: "VID".to_string(),
            file_date_format: "%Y_%m_%d_%H_%M_%S_%3f".to_string(),
        }
    }
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            still_capture: true,
            video_recording: true,
        }
    }
}

impl CameraConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}

impl CrabCaptureConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| CameraError::Config(format!("Failed to read config file: {}", e)))?;

        let config: CrabCaptureConfig = toml::from_str(&contents)
            .map_err(|e| CameraError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate().map_err(CameraError::Config)?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CameraError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CameraError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| CameraError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| CameraError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("crabcapture.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.camera.capture_timeout_ms == 0 {
            return Err("Capture timeout must be positive".to_string());
        }
        if self.recording.bitrate == 0 {
            return Err("Recording bitrate must be positive".to_string());
        }
        if self.storage.output_directory.is_empty() {
            return Err("Output directory must not be empty".to_string());
        }
        if self.storage.file_date_format.is_empty() {
            return Err("File date format must not be empty".to_string());
        }
        if !self.features.still_capture && !self.features.video_recording {
            return Err("At least one of still capture or video recording must be enabled".to_string());
        }
        Ok(())
    }
}
