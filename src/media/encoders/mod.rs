// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer encoder selection for the mp4 writer and transcoder
//!
//! Recordings are H.264 + AAC in an mp4 container. Hardware encoders are
//! tried first, software encoders are the fallback.

pub mod audio;
pub mod video;

use gstreamer as gst;

/// Initialise GStreamer, reporting failure as a message
pub fn init() -> Result<(), String> {
    gst::init().map_err(|e| format!("Failed to initialize GStreamer: {}", e))
}

/// Whether the named element factory is installed
pub fn is_element_available(name: &str) -> bool {
    init().is_ok() && gst::ElementFactory::find(name).is_some()
}

/// Set a property from its string form when the element has it
///
/// Encoder plugins differ in property types across versions; parsing from
/// a string lets GStreamer pick the right one.
pub fn set_if_present(element: &gst::Element, property: &str, value: &str) {
    use gstreamer::prelude::*;
    if element.has_property(property) {
        element.set_property_from_str(property, value);
    } else {
        tracing::debug!(property, "Encoder has no such property");
    }
}
