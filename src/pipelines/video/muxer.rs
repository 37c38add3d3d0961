// SPDX-License-Identifier: GPL-3.0-only

//! mp4 muxing tail shared by the GStreamer writer and transcoder

use gstreamer as gst;
use gstreamer::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Muxer and file sink, already added to a pipeline and linked
pub struct MuxerConfig {
    pub muxer: gst::Element,
    pub filesink: gst::Element,
    pub output_path: PathBuf,
}

/// Add `mp4mux ! filesink location=<output_path>` to `pipeline`
pub fn create_mp4_muxer(pipeline: &gst::Pipeline, output_path: &Path) -> Result<MuxerConfig, String> {
    info!(path = %output_path.display(), "Creating mp4 muxer");

    let muxer = gst::ElementFactory::make("mp4mux")
        .build()
        .map_err(|e| format!("Failed to create mp4mux: {}", e))?;
    // Seekable output with duration and index written at EOS
    if muxer.has_property("streamable") {
        muxer.set_property("streamable", false);
    }

    let filesink = gst::ElementFactory::make("filesink")
        .property("location", output_path.to_string_lossy().to_string())
        .build()
        .map_err(|e| format!("Failed to create filesink: {}", e))?;

    pipeline
        .add_many([&muxer, &filesink])
        .map_err(|e| format!("Failed to add muxer: {}", e))?;
    muxer
        .link(&filesink)
        .map_err(|_| "Failed to link muxer to filesink".to_string())?;
    debug!("Muxer linked to filesink");

    Ok(MuxerConfig {
        muxer,
        filesink,
        output_path: output_path.to_path_buf(),
    })
}

/// Link the last element of an encoded stream to the muxer
pub fn link_to_muxer(tail: &gst::Element, muxer: &gst::Element, stream: &str) -> Result<(), String> {
    tail.link(muxer)
        .map_err(|_| format!("Failed to link {} stream to muxer", stream))?;
    debug!(stream, "Stream linked to muxer");
    Ok(())
}

/// Block until the pipeline reports EOS, an error, or `timeout` elapses
pub fn wait_for_eos(pipeline: &gst::Pipeline, timeout: std::time::Duration) -> Result<(), String> {
    let bus = pipeline.bus().ok_or_else(|| "Pipeline has no bus".to_string())?;
    let timeout = gst::ClockTime::from_nseconds(timeout.as_nanos() as u64);
    for message in bus.iter_timed(timeout) {
        match message.view() {
            gst::MessageView::Eos(..) => return Ok(()),
            gst::MessageView::Error(err) => {
                return Err(format!(
                    "{} ({})",
                    err.error(),
                    err.debug().map(|d| d.to_string()).unwrap_or_default()
                ));
            }
            _ => {}
        }
    }
    Err("timed out waiting for end of stream".to_string())
}
