// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Video encoder bitrate presets
///
/// The target bitrate scales with the frame width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitratePreset {
    /// Smaller files, reduced quality
    Low,
    /// Balanced quality and file size (default)
    #[default]
    Medium,
    /// Larger files, better quality
    High,
}

impl BitratePreset {
    /// Bitrate in kbps for a given frame width
    pub fn bitrate_kbps(&self, width: u32) -> u32 {
        let base = match width {
            w if w >= 3840 => 30_000,
            w if w >= 1920 => 8_000,
            w if w >= 1280 => 5_000,
            _ => 2_000,
        };
        match self {
            BitratePreset::Low => base / 2,
            BitratePreset::Medium => base,
            BitratePreset::High => base * 2,
        }
    }
}

/// Recording timing and sizing constants
pub mod recording {
    use super::Duration;

    /// Interval of the frame-rate / elapsed-time status reports
    pub const STATUS_INTERVAL: Duration = Duration::from_millis(250);

    /// Length of the frame-rate estimation window
    pub const FRAME_RATE_WINDOW: Duration = Duration::from_secs(1);

    /// Stem of the temporary recording file, overwritten by every take
    pub const TEMP_FILE_STEM: &str = "recording";

    /// Audio encoder bitrate in bits per second
    pub const AUDIO_BITRATE: u32 = 64_000;

    /// Number of pixel buffers in the render pool of one recording
    pub const PIXEL_BUFFER_POOL_CAPACITY: usize = 6;

    /// Frame counter modulo for periodic logging
    pub const FRAME_LOG_INTERVAL: u64 = 30;
}

/// Device control constants
pub mod device {
    /// Torch levels at or below this value switch the torch off
    pub const TORCH_ON_THRESHOLD: f32 = 0.1;
}

/// Transcode constants
pub mod transcode {
    use super::Duration;

    /// Upper bound for a GStreamer export to reach EOS
    pub const EXPORT_TIMEOUT: Duration = Duration::from_secs(300);
}

/// GStreamer pipeline constants
pub mod pipeline {
    /// Maximum buffer queue size (keep small for low latency)
    pub const MAX_BUFFERS: u32 = 2;

    /// Pixel format delivered by capture appsinks and accepted by writer appsrcs
    pub const OUTPUT_FORMAT: &str = "RGBA";

    /// Pipeline playing state timeout on start
    pub const START_TIMEOUT_SECS: u64 = 5;

    /// Time to wait for EOS while finalizing a recording
    pub const FINALIZE_TIMEOUT_SECS: u64 = 10;
}
