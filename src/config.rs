// SPDX-License-Identifier: GPL-3.0-only

use crate::constants::BitratePreset;
use crate::errors::{AppError, AppResult};
use crate::pipelines::filter::FilterSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Which side of the device the camera faces
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePosition {
    /// User-facing camera (frames are mirrored)
    Front,
    /// World-facing camera
    #[default]
    Back,
}

impl DevicePosition {
    /// Whether frames from this position need the vertical sensor flip
    pub fn mirrors(&self) -> bool {
        matches!(self, DevicePosition::Front)
    }
}

impl fmt::Display for DevicePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevicePosition::Front => write!(f, "front"),
            DevicePosition::Back => write!(f, "back"),
        }
    }
}

impl std::str::FromStr for DevicePosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "front" => Ok(DevicePosition::Front),
            "back" => Ok(DevicePosition::Back),
            other => Err(format!("unknown device position '{}'", other)),
        }
    }
}

/// Audio/video capture quality profile
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    Low,
    Medium,
    #[default]
    High,
    Hd1080,
    Uhd2160,
}

impl QualityPreset {
    pub const ALL: [QualityPreset; 5] = [
        QualityPreset::Low,
        QualityPreset::Medium,
        QualityPreset::High,
        QualityPreset::Hd1080,
        QualityPreset::Uhd2160,
    ];

    /// Landscape pixel size delivered by a device running this preset
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            QualityPreset::Low => (320, 240),
            QualityPreset::Medium => (640, 480),
            QualityPreset::High => (1280, 720),
            QualityPreset::Hd1080 => (1920, 1080),
            QualityPreset::Uhd2160 => (3840, 2160),
        }
    }

    /// Nominal capture frame rate
    pub fn frame_rate(&self) -> u32 {
        30
    }
}

impl fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.dimensions();
        write!(f, "{}x{}@{}", w, h, self.frame_rate())
    }
}

impl std::str::FromStr for QualityPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(QualityPreset::Low),
            "medium" => Ok(QualityPreset::Medium),
            "high" | "720p" => Ok(QualityPreset::High),
            "hd1080" | "1080p" => Ok(QualityPreset::Hd1080),
            "uhd2160" | "2160p" | "4k" => Ok(QualityPreset::Uhd2160),
            other => Err(format!("unknown quality preset '{}'", other)),
        }
    }
}

/// Device selection for one pipeline instance, fixed once the pipeline is built
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfiguration {
    pub device_position: DevicePosition,
    pub preset: QualityPreset,
}

impl CaptureConfiguration {
    pub fn new(device_position: DevicePosition, preset: QualityPreset) -> Self {
        Self {
            device_position,
            preset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera position and quality preset
    pub capture: CaptureConfiguration,
    /// Filter chain applied from the first frame
    pub filters: Vec<FilterSpec>,
    /// Directory for the temporary recording and transcode files
    pub temp_dir: Option<PathBuf>,
    /// Video encoder bitrate preset (GStreamer writer)
    pub bitrate_preset: BitratePreset,
    /// Rotate and re-encode each finished take
    pub transcode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfiguration::default(),
            filters: Vec::new(),
            temp_dir: None,
            bitrate_preset: BitratePreset::default(),
            transcode: true,
        }
    }
}

impl Config {
    /// Read a JSON configuration file. Absent fields keep their defaults.
    pub fn load(path: &Path) -> AppResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&text)?;
        Ok(config)
    }

    /// Directory used for temporary files
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
