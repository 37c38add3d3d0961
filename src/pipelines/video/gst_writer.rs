// SPDX-License-Identifier: GPL-3.0-only

//! H.264 + AAC mp4 writer on a GStreamer `appsrc` pipeline
//!
//! ```text
//! appsrc(RGBA) ! videoconvert ! <h264 enc> ! h264parse ─┐
//!                                                      mp4mux ! filesink
//! appsrc(S16LE) ! audioconvert ! audioresample ! <aac> ─┘
//! ```
//!
//! Buffers are stamped relative to the session start, so the first
//! recorded frame is t = 0. Each video frame is held back until the next
//! one arrives and lasts until it; the last frame lasts until the session
//! end timestamp.

use super::muxer::{MuxerConfig, create_mp4_muxer, link_to_muxer, wait_for_eos};
use super::writer::{
    AudioTrackSettings, MediaWriter, VideoCodec, VideoTrackSettings, WriterFactory, WriterStatus,
};
use crate::backends::audio::AudioChunk;
use crate::backends::camera::types::{Frame, Timestamp};
use crate::constants::BitratePreset;
use crate::constants::pipeline::{FINALIZE_TIMEOUT_SECS, OUTPUT_FORMAT};
use crate::media::encoders::{audio as audio_encoders, video as video_encoders};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct GstWriterFactory {
    bitrate: BitratePreset,
}

impl GstWriterFactory {
    pub fn new(bitrate: BitratePreset) -> Self {
        Self { bitrate }
    }
}

impl WriterFactory for GstWriterFactory {
    fn extension(&self) -> &'static str {
        "mp4"
    }

    fn video_codec(&self) -> VideoCodec {
        VideoCodec::H264
    }

    fn create(&self, path: &Path) -> Result<Box<dyn MediaWriter>, String> {
        crate::media::encoders::init()?;
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        if !parent.is_dir() {
            return Err(format!("directory {} does not exist", parent.display()));
        }
        Ok(Box::new(GstMediaWriter {
            path: path.to_path_buf(),
            bitrate: self.bitrate,
            video_track: None,
            audio_track: None,
            running: None,
            session_start: None,
            pending: None,
        }))
    }
}

struct RunningPipeline {
    pipeline: gst::Pipeline,
    video_src: gst_app::AppSrc,
    audio_src: Option<gst_app::AppSrc>,
    _muxer: MuxerConfig,
}

pub struct GstMediaWriter {
    path: PathBuf,
    bitrate: BitratePreset,
    video_track: Option<VideoTrackSettings>,
    audio_track: Option<AudioTrackSettings>,
    running: Option<RunningPipeline>,
    session_start: Option<Timestamp>,
    /// Latest frame, pushed once its duration is known
    pending: Option<(Vec<u8>, gst::ClockTime)>,
}

fn make(name: &str) -> Result<gst::Element, String> {
    gst::ElementFactory::make(name)
        .build()
        .map_err(|e| format!("Failed to create {}: {}", name, e))
}

impl GstMediaWriter {
    fn build_pipeline(&self, video: &VideoTrackSettings) -> Result<RunningPipeline, String> {
        let pipeline = gst::Pipeline::new();
        let muxer = create_mp4_muxer(&pipeline, &self.path)?;

        let video_caps = gst::Caps::builder("video/x-raw")
            .field("format", OUTPUT_FORMAT)
            .field("width", video.dimensions.width as i32)
            .field("height", video.dimensions.height as i32)
            .field(
                "framerate",
                gst::Fraction::new(video.frame_rate.num as i32, video.frame_rate.denom as i32),
            )
            .build();
        let video_src = gst_app::AppSrc::builder()
            .name("video")
            .caps(&video_caps)
            .format(gst::Format::Time)
            .is_live(true)
            .build();
        let convert = make("videoconvert")?;
        let selected = video_encoders::select_h264_encoder(self.bitrate, video.dimensions.width)?;
        pipeline
            .add_many([
                video_src.upcast_ref::<gst::Element>(),
                &convert,
                &selected.encoder,
                &selected.parser,
            ])
            .map_err(|e| format!("Failed to add video elements: {}", e))?;
        gst::Element::link_many([
            video_src.upcast_ref::<gst::Element>(),
            &convert,
            &selected.encoder,
            &selected.parser,
        ])
        .map_err(|_| "Failed to link video elements".to_string())?;
        link_to_muxer(&selected.parser, &muxer.muxer, "video")?;

        let audio_src = match self.audio_track {
            Some(audio) => {
                let caps = gst::Caps::builder("audio/x-raw")
                    .field("format", "S16LE")
                    .field("layout", "interleaved")
                    .field("rate", audio.sample_rate as i32)
                    .field("channels", audio.channels as i32)
                    .build();
                let src = gst_app::AppSrc::builder()
                    .name("audio")
                    .caps(&caps)
                    .format(gst::Format::Time)
                    .is_live(true)
                    .build();
                let convert = make("audioconvert")?;
                let resample = make("audioresample")?;
                let encoder = audio_encoders::select_aac_encoder(audio.bitrate)?;
                pipeline
                    .add_many([src.upcast_ref::<gst::Element>(), &convert, &resample, &encoder])
                    .map_err(|e| format!("Failed to add audio elements: {}", e))?;
                gst::Element::link_many([
                    src.upcast_ref::<gst::Element>(),
                    &convert,
                    &resample,
                    &encoder,
                ])
                .map_err(|_| "Failed to link audio elements".to_string())?;
                link_to_muxer(&encoder, &muxer.muxer, "audio")?;
                Some(src)
            }
            None => None,
        };

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| format!("Failed to start writer pipeline: {}", e))?;

        Ok(RunningPipeline {
            pipeline,
            video_src,
            audio_src,
            _muxer: muxer,
        })
    }

    fn pts(&self, at: Timestamp) -> Option<gst::ClockTime> {
        let start = self.session_start?;
        (at >= start).then(|| gst::ClockTime::from_nseconds(at.saturating_since(start).as_nanos() as u64))
    }

    /// Push the held frame so that it lasts until `until`
    fn flush_pending(&mut self, until: gst::ClockTime) -> Result<(), String> {
        let Some((data, pts)) = self.pending.take() else {
            return Ok(());
        };
        let fallback = self.video_track.and_then(|t| t.frame_rate.frame_interval());
        let running = self
            .running
            .as_ref()
            .ok_or_else(|| "writing not started".to_string())?;
        push(&running.video_src, data, pts, held_duration(pts, until, fallback))
    }

    fn shutdown(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.pipeline.set_state(gst::State::Null);
        }
    }
}

/// Display time of a frame at `pts` followed by one at `until`
///
/// Frames without a successor in time fall back to one frame interval.
fn held_duration(
    pts: gst::ClockTime,
    until: gst::ClockTime,
    fallback: Option<Duration>,
) -> Option<Duration> {
    match until.checked_sub(pts) {
        Some(gap) if gap > gst::ClockTime::ZERO => Some(Duration::from_nanos(gap.nseconds())),
        _ => fallback,
    }
}

fn push(src: &gst_app::AppSrc, data: Vec<u8>, pts: gst::ClockTime, duration: Option<Duration>) -> Result<(), String> {
    let mut buffer = gst::Buffer::from_mut_slice(data);
    {
        let buffer = buffer
            .get_mut()
            .ok_or_else(|| "buffer not writable".to_string())?;
        buffer.set_pts(pts);
        if let Some(duration) = duration {
            buffer.set_duration(gst::ClockTime::from_nseconds(duration.as_nanos() as u64));
        }
    }
    src.push_buffer(buffer)
        .map(|_| ())
        .map_err(|e| format!("push failed: {:?}", e))
}

impl MediaWriter for GstMediaWriter {
    fn output_path(&self) -> &Path {
        &self.path
    }

    fn add_video_track(&mut self, settings: &VideoTrackSettings) -> Result<(), String> {
        if self.running.is_some() || self.video_track.is_some() {
            return Err("video track cannot be attached now".to_string());
        }
        if settings.dimensions.is_empty() || settings.frame_rate.frame_interval().is_none() {
            return Err(format!(
                "invalid video format {} @ {}",
                settings.dimensions, settings.frame_rate
            ));
        }
        self.video_track = Some(*settings);
        Ok(())
    }

    fn add_audio_track(&mut self, settings: &AudioTrackSettings) -> Result<(), String> {
        if self.running.is_some() || self.audio_track.is_some() {
            return Err("audio track cannot be attached now".to_string());
        }
        if settings.sample_rate == 0 || settings.channels == 0 {
            return Err("audio track needs a sample rate and channels".to_string());
        }
        self.audio_track = Some(*settings);
        Ok(())
    }

    fn start_writing(&mut self) -> Result<(), String> {
        if self.running.is_some() {
            return Err("writing already started".to_string());
        }
        let video = self
            .video_track
            .ok_or_else(|| "no video track attached".to_string())?;
        let running = self.build_pipeline(&video).inspect_err(|_| {
            warn!(path = %self.path.display(), "Writer pipeline failed to start");
        })?;
        info!(path = %self.path.display(), dimensions = %video.dimensions, "Writer pipeline running");
        self.running = Some(running);
        Ok(())
    }

    fn start_session(&mut self, at: Timestamp) {
        self.session_start = Some(at);
    }

    fn is_ready_for_video(&self) -> bool {
        self.running.is_some() && self.session_start.is_some()
    }

    fn is_ready_for_audio(&self) -> bool {
        self.session_start.is_some()
            && self.running.as_ref().is_some_and(|r| r.audio_src.is_some())
    }

    fn append_video(&mut self, frame: &Frame) -> Result<(), String> {
        let Some(pts) = self.pts(frame.timestamp()) else {
            return Ok(());
        };
        if self.running.is_none() {
            return Err("writing not started".to_string());
        }
        let previous = self.flush_pending(pts);
        self.pending = Some((frame.pixels().to_vec(), pts));
        previous
    }

    fn append_audio(&mut self, chunk: &AudioChunk) -> Result<(), String> {
        let Some(pts) = self.pts(chunk.timestamp()) else {
            return Ok(());
        };
        let src = self
            .running
            .as_ref()
            .and_then(|r| r.audio_src.as_ref())
            .ok_or_else(|| "no audio track".to_string())?;
        push(src, chunk.as_bytes().to_vec(), pts, Some(chunk.duration()))
    }

    fn end_session(&mut self, at: Timestamp) {
        debug!(%at, "Ending write session");
        if let Some(end) = self.pts(at)
            && let Err(e) = self.flush_pending(end)
        {
            warn!(error = %e, "Last frame not written");
        }
        if let Some(running) = &self.running {
            let _ = running.video_src.end_of_stream();
            if let Some(audio) = &running.audio_src {
                let _ = audio.end_of_stream();
            }
        }
    }

    fn finish(mut self: Box<Self>) -> WriterStatus {
        let Some(running) = self.running.take() else {
            return WriterStatus::Failed("writing was never started".to_string());
        };
        // end_session normally sent EOS already; a second one is harmless
        let _ = running.video_src.end_of_stream();
        if let Some(audio) = &running.audio_src {
            let _ = audio.end_of_stream();
        }
        let result = wait_for_eos(
            &running.pipeline,
            Duration::from_secs(FINALIZE_TIMEOUT_SECS),
        );
        let _ = running.pipeline.set_state(gst::State::Null);
        match result {
            Ok(()) => {
                info!(path = %self.path.display(), "mp4 recording finalized");
                WriterStatus::Completed(self.path.clone())
            }
            Err(e) => WriterStatus::Failed(e),
        }
    }

    fn cancel(mut self: Box<Self>) {
        let started = self.running.is_some();
        self.shutdown();
        if started && let Err(e) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "Cancelled recording not removed");
        }
    }
}

impl Drop for GstMediaWriter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
