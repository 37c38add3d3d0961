// SPDX-License-Identifier: GPL-3.0-only

//! Dependency-free writer: raw I420 video in a Y4M file plus a PCM sidecar
//!
//! The video track is written at a constant frame rate. Each appended
//! frame is placed in the slot nearest to its timestamp; repeated slots are
//! dropped and gaps are filled by repeating the previous frame. Audio goes
//! to `<name>.wav` next to the video file. The requested AAC settings only
//! fix the rate and channel count since samples are stored uncompressed.

use super::writer::{
    AudioTrackSettings, MediaWriter, VideoCodec, VideoTrackSettings, WriterFactory, WriterStatus,
};
use crate::backends::audio::{AudioChunk, AudioFormat};
use crate::backends::camera::types::{Frame, Timestamp};
use crate::media::wav::WavWriter;
use crate::media::y4m::{self, Y4mHeader};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Creates [`Y4mMediaWriter`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct Y4mWriterFactory;

impl WriterFactory for Y4mWriterFactory {
    fn extension(&self) -> &'static str {
        "y4m"
    }

    fn video_codec(&self) -> VideoCodec {
        VideoCodec::RawI420
    }

    fn create(&self, path: &Path) -> Result<Box<dyn MediaWriter>, String> {
        Ok(Box::new(Y4mMediaWriter::new(path)?))
    }

    fn artifacts(&self, path: &Path) -> Vec<PathBuf> {
        vec![path.to_path_buf(), sidecar_path(path)]
    }
}

/// Path of the PCM sidecar belonging to a Y4M file
pub fn sidecar_path(path: &Path) -> PathBuf {
    path.with_extension("wav")
}

struct OpenFiles {
    video: y4m::Y4mWriter<BufWriter<File>>,
    audio: Option<WavWriter<BufWriter<File>>>,
}

pub struct Y4mMediaWriter {
    path: PathBuf,
    video_track: Option<VideoTrackSettings>,
    audio_track: Option<AudioTrackSettings>,
    files: Option<OpenFiles>,
    frame_interval: Duration,
    session_start: Option<Timestamp>,
    session_end: Option<Timestamp>,
    /// Slot the next written frame occupies
    next_slot: u64,
    last_planes: Option<Vec<u8>>,
}

impl Y4mMediaWriter {
    pub fn new(path: &Path) -> Result<Self, String> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        if !parent.is_dir() {
            return Err(format!("directory {} does not exist", parent.display()));
        }
        if path.exists() {
            return Err(format!("{} already exists", path.display()));
        }
        Ok(Self {
            path: path.to_path_buf(),
            video_track: None,
            audio_track: None,
            files: None,
            frame_interval: Duration::ZERO,
            session_start: None,
            session_end: None,
            next_slot: 0,
            last_planes: None,
        })
    }

    fn slot_for(&self, start: Timestamp, at: Timestamp) -> u64 {
        let elapsed = at.saturating_since(start);
        (elapsed.as_secs_f64() / self.frame_interval.as_secs_f64()).round() as u64
    }

    /// Repeat the previous frame until `slot` is the next free slot
    fn fill_to(&mut self, slot: u64) -> Result<(), String> {
        let (Some(files), Some(planes)) = (self.files.as_mut(), self.last_planes.as_ref()) else {
            return Ok(());
        };
        while self.next_slot < slot {
            files
                .video
                .write_frame(planes)
                .map_err(|e| format!("failed to write frame: {}", e))?;
            self.next_slot += 1;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), String> {
        if let (Some(start), Some(end)) = (self.session_start, self.session_end) {
            let last = self.slot_for(start, end);
            self.fill_to(last + 1)?;
        }
        let files = self
            .files
            .take()
            .ok_or_else(|| "writing was never started".to_string())?;
        let mut video = files.video;
        video
            .flush()
            .map_err(|e| format!("failed to flush video: {}", e))?;
        let frames = video.frames_written();
        if let Some(audio) = files.audio {
            audio
                .finish()
                .map_err(|e| format!("failed to finish audio: {}", e))?;
        }
        info!(path = %self.path.display(), frames, "Y4M recording finalized");
        Ok(())
    }
}

impl MediaWriter for Y4mMediaWriter {
    fn output_path(&self) -> &Path {
        &self.path
    }

    fn add_video_track(&mut self, settings: &VideoTrackSettings) -> Result<(), String> {
        if self.files.is_some() {
            return Err("tracks cannot be added after writing started".to_string());
        }
        if self.video_track.is_some() {
            return Err("video track already attached".to_string());
        }
        if settings.dimensions.is_empty() {
            return Err(format!("invalid video size {}", settings.dimensions));
        }
        self.frame_interval = settings
            .frame_rate
            .frame_interval()
            .ok_or_else(|| format!("invalid frame rate {}", settings.frame_rate))?;
        debug!(dimensions = %settings.dimensions, frame_rate = %settings.frame_rate, "Video track attached");
        self.video_track = Some(*settings);
        Ok(())
    }

    fn add_audio_track(&mut self, settings: &AudioTrackSettings) -> Result<(), String> {
        if self.files.is_some() {
            return Err("tracks cannot be added after writing started".to_string());
        }
        if self.audio_track.is_some() {
            return Err("audio track already attached".to_string());
        }
        if settings.sample_rate == 0 || settings.channels == 0 {
            return Err("audio track needs a sample rate and channels".to_string());
        }
        debug!(
            sample_rate = settings.sample_rate,
            channels = settings.channels,
            "Audio track attached"
        );
        self.audio_track = Some(*settings);
        Ok(())
    }

    fn start_writing(&mut self) -> Result<(), String> {
        if self.files.is_some() {
            return Err("writing already started".to_string());
        }
        let track = self
            .video_track
            .ok_or_else(|| "no video track attached".to_string())?;
        let file = File::create(&self.path)
            .map_err(|e| format!("failed to create {}: {}", self.path.display(), e))?;
        let video = y4m::Y4mWriter::new(
            BufWriter::new(file),
            Y4mHeader::new(track.dimensions, track.frame_rate),
        )
        .map_err(|e| format!("failed to write header: {}", e))?;

        let audio = match self.audio_track {
            Some(settings) => {
                let sidecar = sidecar_path(&self.path);
                let file = File::create(&sidecar)
                    .map_err(|e| format!("failed to create {}: {}", sidecar.display(), e))?;
                let format = AudioFormat::new(settings.sample_rate, settings.channels);
                Some(
                    WavWriter::new(BufWriter::new(file), format)
                        .map_err(|e| format!("failed to write WAV header: {}", e))?,
                )
            }
            None => None,
        };
        self.files = Some(OpenFiles { video, audio });
        Ok(())
    }

    fn start_session(&mut self, at: Timestamp) {
        self.session_start = Some(at);
    }

    fn is_ready_for_video(&self) -> bool {
        self.files.is_some() && self.session_start.is_some()
    }

    fn is_ready_for_audio(&self) -> bool {
        self.session_start.is_some() && self.files.as_ref().is_some_and(|f| f.audio.is_some())
    }

    fn append_video(&mut self, frame: &Frame) -> Result<(), String> {
        let (Some(track), Some(start)) = (self.video_track, self.session_start) else {
            return Err("session not started".to_string());
        };
        if frame.dimensions() != track.dimensions {
            return Err(format!(
                "frame is {} but the track is {}",
                frame.dimensions(),
                track.dimensions
            ));
        }
        if frame.timestamp() < start {
            debug!(timestamp = %frame.timestamp(), "Dropping frame before session start");
            return Ok(());
        }
        let slot = self.slot_for(start, frame.timestamp());
        if slot < self.next_slot {
            return Ok(());
        }
        self.fill_to(slot)?;

        let planes = y4m::rgba_to_i420(frame.pixels(), track.dimensions);
        let files = self
            .files
            .as_mut()
            .ok_or_else(|| "writing not started".to_string())?;
        files
            .video
            .write_frame(&planes)
            .map_err(|e| format!("failed to write frame: {}", e))?;
        self.next_slot = slot + 1;
        self.last_planes = Some(planes);
        Ok(())
    }

    fn append_audio(&mut self, chunk: &AudioChunk) -> Result<(), String> {
        let Some(start) = self.session_start else {
            return Err("session not started".to_string());
        };
        let audio = self
            .files
            .as_mut()
            .and_then(|f| f.audio.as_mut())
            .ok_or_else(|| "no audio track".to_string())?;
        if chunk.format() != audio.format() {
            return Err(format!(
                "audio format changed to {} Hz x{}",
                chunk.format().sample_rate,
                chunk.format().channels
            ));
        }
        if chunk.timestamp().saturating_add(chunk.duration()) <= start {
            return Ok(());
        }
        audio
            .write_samples(chunk.as_bytes())
            .map_err(|e| format!("failed to write audio: {}", e))
    }

    fn end_session(&mut self, at: Timestamp) {
        self.session_end = Some(at);
    }

    fn finish(mut self: Box<Self>) -> WriterStatus {
        match self.finalize() {
            Ok(()) => WriterStatus::Completed(self.path.clone()),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Y4M recording failed");
                WriterStatus::Failed(e)
            }
        }
    }

    fn cancel(mut self: Box<Self>) {
        let started = self.files.take().is_some();
        if started {
            for path in [self.path.clone(), sidecar_path(&self.path)] {
                if let Err(e) = std::fs::remove_file(&path)
                    && e.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(path = %path.display(), error = %e, "Failed to remove cancelled recording");
                }
            }
        }
        debug!(path = %self.path.display(), "Y4M writer cancelled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::{Dimensions, Framerate};
    use crate::constants::BitratePreset;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("filtercam-sw-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn track(dims: Dimensions) -> VideoTrackSettings {
        VideoTrackSettings {
            codec: VideoCodec::RawI420,
            dimensions: dims,
            frame_rate: Framerate::from_int(10),
            bitrate: BitratePreset::Medium,
        }
    }

    fn frame_at(dims: Dimensions, millis: u64) -> Frame {
        Frame::filled(dims, [10, 20, 30, 255], Timestamp::from_millis(millis))
    }

    #[test]
    fn test_constant_rate_with_gaps_and_duplicates() {
        let path = temp_path("clip.y4m");
        let dims = Dimensions::new(4, 2);
        let mut writer: Box<dyn MediaWriter> = Y4mWriterFactory.create(&path).unwrap();
        writer.add_video_track(&track(dims)).unwrap();
        writer.start_writing().unwrap();
        writer.start_session(Timestamp::from_millis(1_000));
        assert!(writer.is_ready_for_video());
        assert!(!writer.is_ready_for_audio());

        writer.append_video(&frame_at(dims, 1_000)).unwrap();
        writer.append_video(&frame_at(dims, 1_020)).unwrap(); // same slot
        writer.append_video(&frame_at(dims, 1_300)).unwrap(); // gap of two slots
        writer.end_session(Timestamp::from_millis(1_500));
        assert_eq!(writer.finish(), WriterStatus::Completed(path.clone()));

        let info = y4m::probe(&path).unwrap();
        assert_eq!(info.header.dimensions, dims);
        assert_eq!(info.frame_count, 6);
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_audio_sidecar() {
        let path = temp_path("clip.y4m");
        let dims = Dimensions::new(2, 2);
        let format = AudioFormat::new(8_000, 1);
        let mut writer = Y4mWriterFactory.create(&path).unwrap();
        writer.add_video_track(&track(dims)).unwrap();
        writer
            .add_audio_track(&AudioTrackSettings::from_format(format).unwrap())
            .unwrap();
        writer.start_writing().unwrap();
        writer.start_session(Timestamp::ZERO);
        assert!(writer.is_ready_for_audio());
        writer.append_video(&frame_at(dims, 0)).unwrap();
        writer
            .append_audio(&AudioChunk::silence(format, 800, Timestamp::ZERO))
            .unwrap();
        assert!(
            writer
                .append_audio(&AudioChunk::silence(AudioFormat::new(16_000, 1), 10, Timestamp::ZERO))
                .is_err()
        );
        writer.end_session(Timestamp::ZERO);
        assert!(matches!(writer.finish(), WriterStatus::Completed(_)));

        let file = File::open(sidecar_path(&path)).unwrap();
        let (read_format, frames) = crate::media::wav::read_info(file).unwrap();
        assert_eq!(read_format, format);
        assert_eq!(frames, 800);
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_mismatched_frame_is_rejected() {
        let path = temp_path("clip.y4m");
        let mut writer = Y4mWriterFactory.create(&path).unwrap();
        writer.add_video_track(&track(Dimensions::new(4, 4))).unwrap();
        writer.start_writing().unwrap();
        writer.start_session(Timestamp::ZERO);
        assert!(writer.append_video(&frame_at(Dimensions::new(2, 2), 0)).is_err());
        writer.cancel();
        assert!(!path.exists());
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_create_fails_for_missing_directory() {
        let path = std::env::temp_dir()
            .join(format!("filtercam-missing-{}", uuid::Uuid::new_v4()))
            .join("clip.y4m");
        assert!(Y4mWriterFactory.create(&path).is_err());
    }

    #[test]
    fn test_finish_without_writing_fails() {
        let path = temp_path("clip.y4m");
        let mut writer = Y4mWriterFactory.create(&path).unwrap();
        writer.add_video_track(&track(Dimensions::new(2, 2))).unwrap();
        assert!(matches!(writer.finish(), WriterStatus::Failed(_)));
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }
}
