// SPDX-License-Identifier: GPL-3.0-only

//! Audio sample types shared by capture devices and writers

use crate::backends::camera::types::Timestamp;
use std::sync::Arc;
use std::time::Duration;

/// Format descriptor carried by every audio chunk
///
/// Samples are always signed 16-bit, interleaved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// A format with no channels or a zero rate cannot configure an encoder
    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && self.channels > 0
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * std::mem::size_of::<i16>()
    }
}

/// Immutable buffer of interleaved S16 samples
#[derive(Debug, Clone)]
pub struct AudioChunk {
    format: AudioFormat,
    samples: Arc<[i16]>,
    timestamp: Timestamp,
}

impl AudioChunk {
    pub fn new(format: AudioFormat, samples: impl Into<Arc<[i16]>>, timestamp: Timestamp) -> Self {
        Self {
            format,
            samples: samples.into(),
            timestamp,
        }
    }

    /// Chunk of silence covering `frames` sample frames
    pub fn silence(format: AudioFormat, frames: usize, timestamp: Timestamp) -> Self {
        let len = frames * format.channels as usize;
        Self::new(format, vec![0i16; len], timestamp)
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Raw little-endian bytes, as written to WAV files and GStreamer buffers
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.samples)
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Number of sample frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        if self.format.channels == 0 {
            return 0;
        }
        self.samples.len() / self.format.channels as usize
    }

    pub fn duration(&self) -> Duration {
        if self.format.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(
            self.frame_count() as u64 * 1_000_000_000 / self.format.sample_rate as u64,
        )
    }
}
