// SPDX-License-Identifier: GPL-3.0-only

//! Camera backend abstraction
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │   FilterCam         │
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │   CaptureSession    │  ← Lifecycle, capture context, torch/focus
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │  DeviceProvider     │  ← VideoDevice / AudioDevice / MediaInput
//! └──────────┬──────────┘
//!            │
//!      ┌─────┴──────┐
//!      ▼            ▼
//! ┌─────────┐ ┌───────────┐
//! │Synthetic│ │ GStreamer │
//! └─────────┘ └───────────┘
//! ```

pub mod frame_loop;
#[cfg(feature = "gst")]
pub mod gst_device;
pub mod session;
pub mod synthetic;
pub mod types;

pub use session::CaptureSession;
pub use types::*;

use crate::backends::audio::AudioChunk;
use crate::config::{DevicePosition, QualityPreset};
use std::sync::Arc;

/// Callback receiving captured video frames
pub type VideoCallback = Arc<dyn Fn(Frame) + Send + Sync>;

/// Callback receiving captured audio chunks
pub type AudioCallback = Arc<dyn Fn(AudioChunk) + Send + Sync>;

/// Sample output bound to a device input
#[derive(Clone)]
pub enum SampleOutput {
    Video(VideoCallback),
    Audio(AudioCallback),
}

impl SampleOutput {
    pub fn kind(&self) -> MediaKind {
        match self {
            SampleOutput::Video(_) => MediaKind::Video,
            SampleOutput::Audio(_) => MediaKind::Audio,
        }
    }
}

/// An opened device stream
///
/// Samples are delivered on a thread owned by the input; the capture
/// session re-dispatches them onto its capture context.
pub trait MediaInput: Send {
    fn kind(&self) -> MediaKind;

    /// Bind the output samples are delivered to
    fn attach_output(&mut self, output: SampleOutput) -> Result<(), String>;

    /// Begin delivering samples
    fn start(&mut self) -> Result<(), String>;

    /// Halt delivery. Idempotent.
    fn stop(&mut self);
}

/// A camera
///
/// Torch and focus setters lock the device for configuration for the
/// duration of the call and report lock or capability failures as `Err`.
pub trait VideoDevice: Send + Sync {
    fn name(&self) -> String;

    fn position(&self) -> DevicePosition;

    fn supports_preset(&self, preset: QualityPreset) -> bool;

    fn open_input(&self, preset: QualityPreset) -> Result<Box<dyn MediaInput>, String>;

    fn has_torch(&self) -> bool {
        false
    }

    /// Torch present but temporarily unusable (e.g. overheated) reports false
    fn is_torch_available(&self) -> bool {
        self.has_torch()
    }

    fn set_torch(&self, _mode: TorchMode) -> Result<(), String> {
        Err("device has no torch".to_string())
    }

    fn supports_focus_point(&self) -> bool {
        false
    }

    /// Set the focus point of interest and trigger a single auto-focus
    fn set_focus_point(&self, _point: NormalizedPoint) -> Result<(), String> {
        Err("focus point of interest not supported".to_string())
    }

    /// Set the exposure point of interest with continuous auto-exposure
    fn set_exposure_point(&self, _point: NormalizedPoint) -> Result<(), String> {
        Err("exposure point of interest not supported".to_string())
    }
}

/// A microphone
pub trait AudioDevice: Send + Sync {
    fn name(&self) -> String;

    fn open_input(&self) -> Result<Box<dyn MediaInput>, String>;
}

/// Short description of a device for listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub kind: MediaKind,
    pub name: String,
    pub position: Option<DevicePosition>,
    pub presets: Vec<QualityPreset>,
}

/// Device discovery
pub trait DeviceProvider: Send + Sync {
    fn name(&self) -> &str;

    fn video_device(&self, position: DevicePosition) -> Option<Arc<dyn VideoDevice>>;

    fn audio_device(&self) -> Option<Arc<dyn AudioDevice>>;

    fn list_devices(&self) -> Vec<DeviceSummary> {
        let mut devices = Vec::new();
        for position in [DevicePosition::Back, DevicePosition::Front] {
            if let Some(device) = self.video_device(position) {
                devices.push(DeviceSummary {
                    kind: MediaKind::Video,
                    name: device.name(),
                    position: Some(position),
                    presets: QualityPreset::ALL
                        .into_iter()
                        .filter(|p| device.supports_preset(*p))
                        .collect(),
                });
            }
        }
        if let Some(device) = self.audio_device() {
            devices.push(DeviceSummary {
                kind: MediaKind::Audio,
                name: device.name(),
                position: None,
                presets: Vec::new(),
            });
        }
        devices
    }
}

/// Provider used when none is configured explicitly
pub fn default_provider() -> Arc<dyn DeviceProvider> {
    #[cfg(feature = "gst")]
    {
        Arc::new(gst_device::GstDeviceProvider::new())
    }
    #[cfg(not(feature = "gst"))]
    {
        Arc::new(synthetic::SyntheticProvider::default())
    }
}
