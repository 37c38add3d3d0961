// SPDX-License-Identifier: GPL-3.0-only

//! AAC encoder selection

use super::set_if_present;
use gstreamer as gst;
use tracing::{debug, info};

/// AAC encoders in priority order
pub const AAC_ENCODERS: &[&str] = &["avenc_aac", "fdkaacenc", "voaacenc", "faac"];

/// Create the first available AAC encoder at `bitrate` bits per second
pub fn select_aac_encoder(bitrate: u32) -> Result<gst::Element, String> {
    super::init()?;
    for name in AAC_ENCODERS {
        let Ok(encoder) = gst::ElementFactory::make(name).build() else {
            continue;
        };
        configure_encoder(&encoder, name, bitrate);
        info!(encoder = %name, bitrate, "Selected audio encoder");
        return Ok(encoder);
    }
    Err("No AAC encoder available. Install avenc_aac (gst-libav) or fdkaacenc".to_string())
}

fn configure_encoder(encoder: &gst::Element, name: &str, bitrate: u32) {
    let value = match name {
        // kbps
        "faac" => bitrate / 1000,
        _ => bitrate,
    };
    set_if_present(encoder, "bitrate", &value.to_string());
    debug!(encoder = name, bitrate, "Configured AAC encoder");
}
