// SPDX-License-Identifier: GPL-3.0-only

//! H.264 encoder selection with hardware acceleration priority

use super::{is_element_available, set_if_present};
use crate::constants::BitratePreset;
use gstreamer as gst;
use tracing::{debug, info};

/// An H.264 encoder element candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderCandidate {
    pub element: &'static str,
    pub hardware: bool,
}

/// Candidates in priority order
pub const H264_ENCODERS: &[EncoderCandidate] = &[
    EncoderCandidate { element: "vah264enc", hardware: true },
    EncoderCandidate { element: "vaapih264enc", hardware: true },
    EncoderCandidate { element: "nvh264enc", hardware: true },
    EncoderCandidate { element: "qsvh264enc", hardware: true },
    EncoderCandidate { element: "v4l2h264enc", hardware: true },
    EncoderCandidate { element: "x264enc", hardware: false },
    EncoderCandidate { element: "openh264enc", hardware: false },
];

/// Encoder, parser and muxer for one H.264 mp4 stream
pub struct SelectedVideoEncoder {
    pub encoder: gst::Element,
    pub parser: gst::Element,
    pub element_name: &'static str,
}

/// Installed candidates, best first
pub fn available_encoders() -> Vec<EncoderCandidate> {
    H264_ENCODERS
        .iter()
        .copied()
        .filter(|c| is_element_available(c.element))
        .collect()
}

/// Create the best available H.264 encoder configured for `width`
pub fn select_h264_encoder(
    preset: BitratePreset,
    width: u32,
) -> Result<SelectedVideoEncoder, String> {
    super::init()?;
    let bitrate = preset.bitrate_kbps(width);

    for candidate in H264_ENCODERS {
        let Ok(encoder) = gst::ElementFactory::make(candidate.element).build() else {
            continue;
        };
        configure_encoder(&encoder, candidate.element, bitrate);
        let parser = gst::ElementFactory::make("h264parse")
            .build()
            .map_err(|e| format!("Failed to create h264parse: {}", e))?;
        info!(
            encoder = candidate.element,
            hardware = candidate.hardware,
            bitrate_kbps = bitrate,
            "Selected video encoder"
        );
        return Ok(SelectedVideoEncoder {
            encoder,
            parser,
            element_name: candidate.element,
        });
    }

    Err("No H.264 encoder available. Install x264enc (gst-plugins-ugly) or openh264enc".to_string())
}

fn configure_encoder(encoder: &gst::Element, name: &str, bitrate_kbps: u32) {
    let kbps = bitrate_kbps.to_string();
    match name {
        "x264enc" => {
            set_if_present(encoder, "speed-preset", "veryfast");
            set_if_present(encoder, "tune", "zerolatency");
            set_if_present(encoder, "bitrate", &kbps);
        }
        "vah264enc" | "vaapih264enc" => {
            set_if_present(encoder, "rate-control", "cbr");
            set_if_present(encoder, "bitrate", &kbps);
        }
        "nvh264enc" | "qsvh264enc" => set_if_present(encoder, "bitrate", &kbps),
        "openh264enc" => {
            set_if_present(encoder, "rate-control", "bitrate");
            // bits per second
            set_if_present(encoder, "bitrate", &(bitrate_kbps * 1000).to_string());
            set_if_present(encoder, "usage-type", "camera");
        }
        _ => debug!(encoder = name, "Using default encoder configuration"),
    }
    debug!(encoder = name, bitrate_kbps, "Configured video encoder");
}
