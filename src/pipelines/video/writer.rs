// SPDX-License-Identifier: GPL-3.0-only

//! Encoder handle abstraction used by the recorder
//!
//! A [`MediaWriter`] is one open output file. The recorder attaches tracks,
//! opens the write session on the first frame, appends samples and finally
//! either finishes or cancels it. Backend failures come back as plain
//! strings; the recorder maps them to typed errors.

use crate::backends::audio::{AudioChunk, AudioFormat};
use crate::backends::camera::types::{Dimensions, Frame, Framerate, Timestamp};
use crate::constants::BitratePreset;
use crate::constants::recording::AUDIO_BITRATE;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    /// Uncompressed planar 4:2:0
    RawI420,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Aac,
    /// Uncompressed signed 16-bit PCM
    PcmS16,
}

/// Video track parameters, sized from the last observed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoTrackSettings {
    pub codec: VideoCodec,
    pub dimensions: Dimensions,
    pub frame_rate: Framerate,
    pub bitrate: BitratePreset,
}

/// Audio track parameters, derived from the first observed chunk's format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioTrackSettings {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: u32,
}

impl AudioTrackSettings {
    /// AAC at the standard bitrate with the source's rate and channel count
    pub fn from_format(format: AudioFormat) -> Result<Self, String> {
        if !format.is_valid() {
            return Err(format!(
                "{} Hz with {} channels cannot be encoded",
                format.sample_rate, format.channels
            ));
        }
        Ok(Self {
            codec: AudioCodec::Aac,
            sample_rate: format.sample_rate,
            channels: format.channels,
            bitrate: AUDIO_BITRATE,
        })
    }
}

/// Terminal state of a finalized writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterStatus {
    Completed(PathBuf),
    Failed(String),
    Cancelled,
}

/// One open output file
pub trait MediaWriter: Send {
    fn output_path(&self) -> &Path;

    fn add_video_track(&mut self, settings: &VideoTrackSettings) -> Result<(), String>;

    fn add_audio_track(&mut self, settings: &AudioTrackSettings) -> Result<(), String>;

    /// Open the file for writing; called once, on the first frame
    fn start_writing(&mut self) -> Result<(), String>;

    /// Anchor the output timeline at `at` (t = 0)
    fn start_session(&mut self, at: Timestamp);

    fn is_ready_for_video(&self) -> bool;

    fn is_ready_for_audio(&self) -> bool;

    fn append_video(&mut self, frame: &Frame) -> Result<(), String>;

    fn append_audio(&mut self, chunk: &AudioChunk) -> Result<(), String>;

    /// Close the timeline at `at`, the last observed video timestamp
    fn end_session(&mut self, at: Timestamp);

    /// Flush and close the file. Blocking; runs off the capture context.
    fn finish(self: Box<Self>) -> WriterStatus;

    /// Abandon the file without finalizing it
    fn cancel(self: Box<Self>);
}

/// Creates writers bound to a path
pub trait WriterFactory: Send + Sync {
    /// File extension of the container this factory produces
    fn extension(&self) -> &'static str;

    /// Nominal video codec of created writers
    fn video_codec(&self) -> VideoCodec;

    fn create(&self, path: &Path) -> Result<Box<dyn MediaWriter>, String>;

    /// Every file a writer created at `path` may leave behind
    fn artifacts(&self, path: &Path) -> Vec<PathBuf> {
        vec![path.to_path_buf()]
    }
}

/// Delete a writer's files, ignoring the ones that do not exist
pub fn remove_artifacts(factory: &dyn WriterFactory, path: &Path) {
    for artifact in factory.artifacts(path) {
        match std::fs::remove_file(&artifact) {
            Ok(()) => debug!(path = %artifact.display(), "Removed recording file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %artifact.display(), error = %e, "Failed to remove recording file"),
        }
    }
}

/// Writer factory used when none is configured explicitly
pub fn default_writer_factory(bitrate: BitratePreset) -> Arc<dyn WriterFactory> {
    #[cfg(feature = "gst")]
    {
        Arc::new(super::gst_writer::GstWriterFactory::new(bitrate))
    }
    #[cfg(not(feature = "gst"))]
    {
        let _ = bitrate;
        Arc::new(super::software::Y4mWriterFactory)
    }
}
