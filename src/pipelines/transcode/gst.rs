// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer rotate-and-re-encode
//!
//! ```text
//! filesrc ! decodebin ─ video ─ videoconvert ! videoflip(clockwise) ! videoconvert ! <h264> ! h264parse ─┐
//!                     └ audio ─ audioconvert ! audioresample ! <aac> ──────────────────────────────────┴ mp4mux ! filesink
//! ```

use super::Transcoder;
use crate::constants::BitratePreset;
use crate::constants::recording::AUDIO_BITRATE;
use crate::constants::transcode::EXPORT_TIMEOUT;
use crate::errors::TranscodeError;
use crate::media::encoders::{self, audio as audio_encoders, video as video_encoders};
use crate::pipelines::video::muxer::{create_mp4_muxer, link_to_muxer, wait_for_eos};
use gstreamer as gst;
use gstreamer::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

/// Rotating transcoder to H.264/AAC mp4 at the highest bitrate preset
#[derive(Debug, Default, Clone, Copy)]
pub struct GstTranscoder;

fn make(name: &str) -> Result<gst::Element, String> {
    gst::ElementFactory::make(name)
        .build()
        .map_err(|e| format!("Failed to create {}: {}", name, e))
}

/// Build and link a branch after `pad`, ending in the muxer
fn attach_branch(
    pipeline: &gst::Pipeline,
    pad: &gst::Pad,
    elements: &[gst::Element],
    muxer: &gst::Element,
    stream: &str,
) -> Result<(), String> {
    pipeline
        .add_many(elements)
        .map_err(|e| format!("Failed to add {} branch: {}", stream, e))?;
    gst::Element::link_many(elements).map_err(|_| format!("Failed to link {} branch", stream))?;
    let (Some(first), Some(last)) = (elements.first(), elements.last()) else {
        return Err(format!("Empty {} branch", stream));
    };
    link_to_muxer(last, muxer, stream)?;
    for element in elements {
        element
            .sync_state_with_parent()
            .map_err(|e| format!("Failed to start {} branch: {}", stream, e))?;
    }
    let sink = first
        .static_pad("sink")
        .ok_or_else(|| format!("{} branch has no sink pad", stream))?;
    pad.link(&sink)
        .map_err(|e| format!("Failed to link decoder to {} branch: {:?}", stream, e))?;
    Ok(())
}

fn video_branch(width_hint: u32) -> Result<Vec<gst::Element>, String> {
    let flip = gst::ElementFactory::make("videoflip")
        .build()
        .map_err(|e| format!("Failed to create videoflip: {}", e))?;
    flip.set_property_from_str("method", "clockwise");
    let encoder = video_encoders::select_h264_encoder(BitratePreset::High, width_hint)?;
    Ok(vec![
        make("videoconvert")?,
        flip,
        make("videoconvert")?,
        encoder.encoder,
        encoder.parser,
    ])
}

fn audio_branch() -> Result<Vec<gst::Element>, String> {
    Ok(vec![
        make("audioconvert")?,
        make("audioresample")?,
        audio_encoders::select_aac_encoder(AUDIO_BITRATE)?,
    ])
}

impl Transcoder for GstTranscoder {
    fn extension(&self) -> &'static str {
        "mp4"
    }

    fn transcode(&self, source: &Path, destination: &Path) -> Result<PathBuf, TranscodeError> {
        if !source.is_file() {
            return Err(TranscodeError::SourceUnreadable(format!(
                "{} does not exist",
                source.display()
            )));
        }
        encoders::init().map_err(TranscodeError::EncoderUnavailable)?;
        info!(source = %source.display(), destination = %destination.display(), "Transcoding recording");

        let pipeline = gst::Pipeline::new();
        let filesrc = gst::ElementFactory::make("filesrc")
            .property("location", source.to_string_lossy().to_string())
            .build()
            .map_err(|e| TranscodeError::EncoderUnavailable(e.to_string()))?;
        let decodebin =
            make("decodebin").map_err(TranscodeError::EncoderUnavailable)?;
        pipeline
            .add_many([&filesrc, &decodebin])
            .map_err(|e| TranscodeError::ExportFailed(e.to_string()))?;
        filesrc
            .link(&decodebin)
            .map_err(|_| TranscodeError::ExportFailed("Failed to link filesrc".to_string()))?;
        let muxer = create_mp4_muxer(&pipeline, destination).map_err(TranscodeError::EncoderUnavailable)?;

        let saw_video = Arc::new(AtomicBool::new(false));
        let pipeline_weak = pipeline.downgrade();
        let mux = muxer.muxer.clone();
        let video_seen = Arc::clone(&saw_video);
        decodebin.connect_pad_added(move |_, pad| {
            let Some(pipeline) = pipeline_weak.upgrade() else {
                return;
            };
            let caps = pad.current_caps().or_else(|| Some(pad.query_caps(None)));
            let Some(structure_name) = caps
                .as_ref()
                .and_then(|c| c.structure(0))
                .map(|s| s.name().to_string())
            else {
                return;
            };
            let width_hint = caps
                .as_ref()
                .and_then(|c| c.structure(0))
                .and_then(|s| s.get::<i32>("width").ok())
                .unwrap_or(1920) as u32;

            let result = if structure_name.starts_with("video/") {
                if video_seen.swap(true, Ordering::SeqCst) {
                    debug!("Ignoring additional video stream");
                    return;
                }
                video_branch(width_hint)
                    .and_then(|elements| attach_branch(&pipeline, pad, &elements, &mux, "video"))
            } else if structure_name.starts_with("audio/") {
                audio_branch()
                    .and_then(|elements| attach_branch(&pipeline, pad, &elements, &mux, "audio"))
            } else {
                debug!(caps = %structure_name, "Ignoring decoded stream");
                return;
            };
            if let Err(e) = result {
                error!(error = %e, "Failed to build transcode branch");
                let _ = pipeline.post_message(
                    gst::message::Error::builder(gst::CoreError::Negotiation, &e).build(),
                );
            }
        });

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| TranscodeError::ExportFailed(format!("Failed to start: {}", e)))?;
        let result = wait_for_eos(&pipeline, EXPORT_TIMEOUT);
        let _ = pipeline.set_state(gst::State::Null);

        match result {
            Ok(()) if saw_video.load(Ordering::SeqCst) => {
                info!(path = %destination.display(), "Transcode complete");
                Ok(destination.to_path_buf())
            }
            outcome => {
                let _ = std::fs::remove_file(destination);
                if !saw_video.load(Ordering::SeqCst) {
                    warn!(source = %source.display(), "Source has no video track");
                    return Err(TranscodeError::NoVideoTrack);
                }
                let reason = outcome.err().unwrap_or_else(|| "unknown failure".to_string());
                error!(reason = %reason, "Transcode failed");
                Err(TranscodeError::ExportFailed(reason))
            }
        }
    }
}
