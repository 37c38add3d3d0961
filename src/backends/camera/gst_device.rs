// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer device provider
//!
//! Cameras and microphones are discovered with a `DeviceMonitor`. Each
//! opened input is its own pipeline ending in an `appsink`:
//!
//! ```text
//! <device> ! videoconvert ! videoscale ! video/x-raw,format=RGBA,WxH ! appsink
//! <device> ! audioconvert ! audioresample ! audio/x-raw,format=S16LE ! appsink
//! ```
//!
//! Sample timestamps come from one monotonic epoch shared by every input
//! of the provider, so audio and video stay comparable.

use super::types::{Dimensions, Frame, FrameData, MediaKind, Timestamp, TorchMode};
use super::{AudioDevice, DeviceProvider, MediaInput, SampleOutput, VideoDevice};
use crate::backends::audio::{AudioChunk, AudioFormat};
use crate::config::{DevicePosition, QualityPreset};
use crate::constants::pipeline::{MAX_BUFFERS, START_TIMEOUT_SECS};
use crate::constants::recording::FRAME_LOG_INTERVAL;
use crate::flash::TorchBank;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::{AppSink, AppSinkCallbacks};
use gstreamer_video::{VideoCapsBuilder, VideoFormat, VideoInfo};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub struct GstDeviceProvider {
    epoch: Instant,
    torch: Arc<TorchBank>,
}

impl GstDeviceProvider {
    pub fn new() -> Self {
        if let Err(e) = gst::init() {
            error!(error = %e, "Failed to initialize GStreamer");
        }
        Self {
            epoch: Instant::now(),
            torch: Arc::new(TorchBank::detect()),
        }
    }

    fn devices(&self, class: &str) -> Vec<gst::Device> {
        let monitor = gst::DeviceMonitor::new();
        if monitor.add_filter(Some(class), None).is_none() {
            warn!(class, "Device monitor rejected filter");
            return Vec::new();
        }
        if let Err(e) = monitor.start() {
            warn!(class, error = %e, "Device monitor failed to start");
            return Vec::new();
        }
        let devices: Vec<gst::Device> = monitor.devices().into_iter().collect();
        monitor.stop();
        debug!(class, count = devices.len(), "Enumerated devices");
        devices
    }
}

impl Default for GstDeviceProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Location reported by the device, if any
fn device_location(device: &gst::Device) -> Option<DevicePosition> {
    let properties = device.properties()?;
    let location = properties
        .get::<String>("api.libcamera.location")
        .ok()?
        .to_ascii_lowercase();
    match location.as_str() {
        "front" => Some(DevicePosition::Front),
        "back" => Some(DevicePosition::Back),
        _ => None,
    }
}

impl DeviceProvider for GstDeviceProvider {
    fn name(&self) -> &str {
        "gstreamer"
    }

    fn video_device(&self, position: DevicePosition) -> Option<Arc<dyn VideoDevice>> {
        let devices = self.devices("Video/Source");
        // Devices without a location count as back cameras in discovery order,
        // with the second one standing in for the front camera.
        let device = devices
            .iter()
            .find(|d| device_location(d) == Some(position))
            .or_else(|| {
                let unplaced: Vec<&gst::Device> =
                    devices.iter().filter(|d| device_location(d).is_none()).collect();
                match position {
                    DevicePosition::Back => unplaced.first().copied(),
                    DevicePosition::Front => unplaced.get(1).copied(),
                }
            })?
            .clone();
        Some(Arc::new(GstCamera {
            device,
            position,
            epoch: self.epoch,
            torch: Arc::clone(&self.torch),
        }))
    }

    fn audio_device(&self) -> Option<Arc<dyn AudioDevice>> {
        let device = self.devices("Audio/Source").into_iter().next()?;
        Some(Arc::new(GstMicrophone {
            device,
            epoch: self.epoch,
        }))
    }
}

struct GstCamera {
    device: gst::Device,
    position: DevicePosition,
    epoch: Instant,
    torch: Arc<TorchBank>,
}

impl VideoDevice for GstCamera {
    fn name(&self) -> String {
        self.device.display_name().to_string()
    }

    fn position(&self) -> DevicePosition {
        self.position
    }

    fn supports_preset(&self, preset: QualityPreset) -> bool {
        let Some(caps) = self.device.caps() else {
            return true;
        };
        let (wanted_width, wanted_height) = preset.dimensions();
        let mut saw_fixed = false;
        for structure in caps.iter() {
            let (Ok(width), Ok(height)) = (structure.get::<i32>("width"), structure.get::<i32>("height"))
            else {
                continue;
            };
            saw_fixed = true;
            if width as u32 >= wanted_width && height as u32 >= wanted_height {
                return true;
            }
        }
        // Only ranges advertised; let negotiation decide
        !saw_fixed
    }

    fn open_input(&self, preset: QualityPreset) -> Result<Box<dyn MediaInput>, String> {
        let (width, height) = preset.dimensions();
        let source = self
            .device
            .create_element(None)
            .map_err(|e| format!("Failed to create camera source: {}", e))?;
        let caps = VideoCapsBuilder::new()
            .format(VideoFormat::Rgba)
            .width(width as i32)
            .height(height as i32)
            .framerate(gst::Fraction::new(preset.frame_rate() as i32, 1))
            .build();
        let chain = [
            source,
            make("videoconvert")?,
            make("videoscale")?,
            make("videorate")?,
            capsfilter(&caps)?,
        ];
        GstInput::new(MediaKind::Video, &chain, self.epoch)
    }

    fn has_torch(&self) -> bool {
        !self.torch.leds().is_empty() || self.torch.permission_error().is_some()
    }

    fn is_torch_available(&self) -> bool {
        self.torch.is_available()
    }

    fn set_torch(&self, mode: TorchMode) -> Result<(), String> {
        self.torch.apply(mode)
    }
}

struct GstMicrophone {
    device: gst::Device,
    epoch: Instant,
}

impl AudioDevice for GstMicrophone {
    fn name(&self) -> String {
        self.device.display_name().to_string()
    }

    fn open_input(&self) -> Result<Box<dyn MediaInput>, String> {
        let source = self
            .device
            .create_element(None)
            .map_err(|e| format!("Failed to create microphone source: {}", e))?;
        let caps = gst::Caps::builder("audio/x-raw")
            .field("format", "S16LE")
            .field("layout", "interleaved")
            .build();
        let chain = [
            source,
            make("audioconvert")?,
            make("audioresample")?,
            capsfilter(&caps)?,
        ];
        GstInput::new(MediaKind::Audio, &chain, self.epoch)
    }
}

fn make(name: &str) -> Result<gst::Element, String> {
    gst::ElementFactory::make(name)
        .build()
        .map_err(|e| format!("Failed to create {}: {}", name, e))
}

fn capsfilter(caps: &gst::Caps) -> Result<gst::Element, String> {
    gst::ElementFactory::make("capsfilter")
        .property("caps", caps)
        .build()
        .map_err(|e| format!("Failed to create capsfilter: {}", e))
}

/// One capture pipeline ending in an appsink
struct GstInput {
    kind: MediaKind,
    pipeline: gst::Pipeline,
    appsink: AppSink,
    output: Option<SampleOutput>,
    epoch: Instant,
    running: bool,
}

impl GstInput {
    fn new(kind: MediaKind, chain: &[gst::Element], epoch: Instant) -> Result<Box<dyn MediaInput>, String> {
        let pipeline = gst::Pipeline::new();
        let appsink = AppSink::builder()
            .sync(false)
            .max_buffers(MAX_BUFFERS)
            .drop(true)
            .build();
        pipeline
            .add_many(chain)
            .map_err(|e| format!("Failed to add {} elements: {}", kind, e))?;
        pipeline
            .add(&appsink)
            .map_err(|e| format!("Failed to add appsink: {}", e))?;
        gst::Element::link_many(chain).map_err(|_| format!("Failed to link {} pipeline", kind))?;
        if let Some(last) = chain.last() {
            last.link(&appsink)
                .map_err(|_| "Failed to link appsink".to_string())?;
        }
        debug!(%kind, "Capture pipeline built");
        Ok(Box::new(Self {
            kind,
            pipeline,
            appsink,
            output: None,
            epoch,
            running: false,
        }))
    }

    fn video_callbacks(callback: super::VideoCallback, epoch: Instant) -> AppSinkCallbacks {
        let counter = AtomicU64::new(0);
        AppSinkCallbacks::builder()
            .new_sample(move |sink| {
                let timestamp = Timestamp::from_duration(epoch.elapsed());
                let frame_num = counter.fetch_add(1, Ordering::Relaxed);
                let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                let caps = sample.caps().ok_or(gst::FlowError::NotNegotiated)?;
                let info = VideoInfo::from_caps(caps).map_err(|e| {
                    if frame_num % FRAME_LOG_INTERVAL == 0 {
                        error!(frame = frame_num, error = ?e, "Failed to get video info");
                    }
                    gst::FlowError::NotNegotiated
                })?;
                if info.stride()[0] as u32 != info.width() * 4 {
                    if frame_num % FRAME_LOG_INTERVAL == 0 {
                        warn!(frame = frame_num, stride = info.stride()[0], "Padded RGBA rows are not supported");
                    }
                    return Ok(gst::FlowSuccess::Ok);
                }
                let buffer = sample.buffer_owned().ok_or(gst::FlowError::Error)?;
                let mapped = buffer
                    .into_mapped_buffer_readable()
                    .map_err(|_| gst::FlowError::Error)?;
                let dimensions = Dimensions::new(info.width(), info.height());
                match Frame::new(dimensions, FrameData::from_mapped_buffer(mapped), timestamp) {
                    Ok(frame) => callback(frame),
                    Err(e) => {
                        if frame_num % FRAME_LOG_INTERVAL == 0 {
                            warn!(frame = frame_num, error = %e, "Dropping malformed frame");
                        }
                    }
                }
                Ok(gst::FlowSuccess::Ok)
            })
            .build()
    }

    fn audio_callbacks(callback: super::AudioCallback, epoch: Instant) -> AppSinkCallbacks {
        AppSinkCallbacks::builder()
            .new_sample(move |sink| {
                let arrived = epoch.elapsed();
                let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                let format = sample
                    .caps()
                    .and_then(|caps| caps.structure(0))
                    .and_then(|s| {
                        Some(AudioFormat::new(
                            s.get::<i32>("rate").ok()? as u32,
                            s.get::<i32>("channels").ok()? as u16,
                        ))
                    })
                    .ok_or(gst::FlowError::NotNegotiated)?;
                let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                let samples: Vec<i16> = bytemuck::pod_collect_to_vec(map.as_slice());
                let frames = samples.len() / format.channels.max(1) as usize;
                // Arrival marks the end of the chunk
                let duration = Duration::from_secs_f64(frames as f64 / format.sample_rate.max(1) as f64);
                let timestamp = Timestamp::from_duration(arrived.saturating_sub(duration));
                callback(AudioChunk::new(format, samples, timestamp));
                Ok(gst::FlowSuccess::Ok)
            })
            .build()
    }
}

impl MediaInput for GstInput {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn attach_output(&mut self, output: SampleOutput) -> Result<(), String> {
        if output.kind() != self.kind {
            return Err(format!("{} output cannot attach to a {} input", output.kind(), self.kind));
        }
        if self.output.is_some() {
            return Err("output already attached".to_string());
        }
        self.output = Some(output);
        Ok(())
    }

    fn start(&mut self) -> Result<(), String> {
        let output = self
            .output
            .clone()
            .ok_or_else(|| "no output attached".to_string())?;
        let callbacks = match output {
            SampleOutput::Video(callback) => Self::video_callbacks(callback, self.epoch),
            SampleOutput::Audio(callback) => Self::audio_callbacks(callback, self.epoch),
        };
        self.appsink.set_callbacks(callbacks);

        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| format!("Failed to start {} pipeline: {}", self.kind, e))?;
        let (result, state, _) = self
            .pipeline
            .state(gst::ClockTime::from_seconds(START_TIMEOUT_SECS));
        if result.is_err() {
            let _ = self.pipeline.set_state(gst::State::Null);
            return Err(format!("{} pipeline failed to reach PLAYING", self.kind));
        }
        debug!(kind = %self.kind, ?state, "Capture pipeline state");
        self.running = true;
        info!(kind = %self.kind, "Capture pipeline started");
        Ok(())
    }

    fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.appsink.set_callbacks(AppSinkCallbacks::builder().build());
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            debug!(kind = %self.kind, error = %e, "Pipeline state change had issues");
        }
        info!(kind = %self.kind, "Capture pipeline stopped");
    }
}

impl Drop for GstInput {
    fn drop(&mut self) {
        self.appsink.set_callbacks(AppSinkCallbacks::builder().build());
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
