// SPDX-License-Identifier: GPL-3.0-only

//! filtercam - live filtered camera capture and recording
//!
//! Samples flow from a camera and a microphone through an ordered chain
//! of image filters to a preview sink and, while recording, into a
//! container file. Every finished take is rotated into portrait
//! orientation by a separate transcode step.
//!
//! - [`backends`]: device traits, capture session and device providers
//! - [`pipelines`]: filters, the recording state machine, writers and transcoders
//! - [`media`]: container formats and encoder selection
//! - [`filter_cam`]: the controller tying the stages together
//! - [`events`]: observer and sink interfaces
//! - [`config`]: user configuration
//!
//! # Example
//!
//! ```no_run
//! use filtercam::{ChannelObserver, Config, FilterCam};
//!
//! let (observer, _events) = ChannelObserver::new();
//! let cam = FilterCam::builder(Config::default())
//!     .observer(observer)
//!     .build()?;
//! cam.start_capture();
//! # Ok::<(), filtercam::AppError>(())
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod events;
pub mod filter_cam;
pub mod flash;
pub mod media;
pub mod pipelines;

// Re-export commonly used types
pub use backends::camera::types::{Dimensions, Frame, NormalizedPoint, Timestamp};
pub use config::{CaptureConfiguration, Config, DevicePosition, QualityPreset};
pub use constants::BitratePreset;
pub use errors::{AppError, AppResult, CaptureError, RecorderError, TranscodeError};
pub use events::{
    CaptureObserver, ChannelObserver, InterruptionSource, OutputObserver, PipelineEvent,
    RecorderObserver, RenderSink,
};
pub use filter_cam::{FilterCam, FilterCamBuilder};
pub use pipelines::filter::{FilterChain, FilterSpec};
pub use pipelines::video::{FrameRateEstimator, RecorderPhase};
