// SPDX-License-Identifier: GPL-3.0-only

//! Container formats and encoder selection
//!
//! - [`y4m`]: YUV4MPEG2 reader/writer and RGBA to I420 conversion
//! - [`wav`]: PCM WAV reader/writer
//! - `encoders`: hardware-first H.264 and AAC selection (feature `gst`)

#[cfg(feature = "gst")]
pub mod encoders;
pub mod wav;
pub mod y4m;
