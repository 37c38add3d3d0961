// SPDX-License-Identifier: GPL-3.0-only

//! Video recording pipeline
//!
//! - [`recorder`]: the recording state machine and sample sink
//! - [`frame_rate`]: smoothed frames-per-second estimate
//! - [`pool`]: pixel buffers for recorded frames
//! - [`writer`]: encoder handle traits
//! - [`software`]: Y4M + WAV writer, always available
//! - `gst_writer`: H.264/AAC mp4 writer (feature `gst`)

pub mod frame_rate;
#[cfg(feature = "gst")]
pub mod gst_writer;
#[cfg(feature = "gst")]
pub mod muxer;
pub mod pool;
pub mod recorder;
pub mod software;
pub mod writer;

pub use frame_rate::FrameRateEstimator;
pub use recorder::{Recorder, RecorderOptions, RecorderPhase};
pub use writer::{MediaWriter, WriterFactory, WriterStatus, default_writer_factory};
