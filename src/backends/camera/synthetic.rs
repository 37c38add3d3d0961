// SPDX-License-Identifier: GPL-3.0-only

//! Built-in test-pattern camera and sine-tone microphone
//!
//! Frames are moving colour bars at the preset's size and rate, audio is a
//! 440 Hz tone. Both are paced in real time on their own loop threads and
//! stamped from a shared monotonic clock so the two streams line up.

use super::frame_loop::{CaptureLoopController, LoopAction};
use super::types::{Dimensions, Frame, MediaKind, NormalizedPoint, Timestamp, TorchMode};
use super::{AudioDevice, DeviceProvider, MediaInput, SampleOutput, VideoDevice};
use crate::backends::audio::{AudioChunk, AudioFormat};
use crate::config::{DevicePosition, QualityPreset};
use image::{Rgba, RgbaImage};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const BAR_COLOURS: [[u8; 4]; 8] = [
    [235, 235, 235, 255],
    [235, 235, 16, 255],
    [16, 235, 235, 255],
    [16, 235, 16, 255],
    [235, 16, 235, 255],
    [235, 16, 16, 255],
    [16, 16, 235, 255],
    [16, 16, 16, 255],
];

const TONE_HZ: f32 = 440.0;
const AUDIO_CHUNK_FRAMES: usize = 1024;

/// Options of the synthetic devices
#[derive(Debug, Clone)]
pub struct SyntheticOptions {
    pub front_camera: bool,
    pub back_camera: bool,
    pub microphone: bool,
    pub presets: Vec<QualityPreset>,
    pub torch: bool,
    pub focus_point: bool,
    pub audio_format: AudioFormat,
}

impl Default for SyntheticOptions {
    fn default() -> Self {
        Self {
            front_camera: true,
            back_camera: true,
            microphone: true,
            presets: vec![
                QualityPreset::Low,
                QualityPreset::Medium,
                QualityPreset::High,
                QualityPreset::Hd1080,
            ],
            torch: true,
            focus_point: true,
            audio_format: AudioFormat::new(48_000, 1),
        }
    }
}

/// Record of device control calls, shared with tests
#[derive(Debug, Default)]
pub struct ControlLog {
    pub torch: Vec<TorchMode>,
    pub focus: Vec<NormalizedPoint>,
    pub exposure: Vec<NormalizedPoint>,
}

/// Provider of synthetic devices
pub struct SyntheticProvider {
    options: SyntheticOptions,
    clock: Instant,
    controls: Arc<Mutex<ControlLog>>,
}

impl Default for SyntheticProvider {
    fn default() -> Self {
        Self::new(SyntheticOptions::default())
    }
}

impl SyntheticProvider {
    pub fn new(options: SyntheticOptions) -> Self {
        Self {
            options,
            clock: Instant::now(),
            controls: Arc::new(Mutex::new(ControlLog::default())),
        }
    }

    /// Torch and focus calls received by the synthetic cameras
    pub fn controls(&self) -> Arc<Mutex<ControlLog>> {
        Arc::clone(&self.controls)
    }
}

impl DeviceProvider for SyntheticProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn video_device(&self, position: DevicePosition) -> Option<Arc<dyn VideoDevice>> {
        let present = match position {
            DevicePosition::Front => self.options.front_camera,
            DevicePosition::Back => self.options.back_camera,
        };
        if !present {
            return None;
        }
        Some(Arc::new(SyntheticCamera {
            position,
            options: self.options.clone(),
            clock: self.clock,
            controls: Arc::clone(&self.controls),
        }))
    }

    fn audio_device(&self) -> Option<Arc<dyn AudioDevice>> {
        if !self.options.microphone {
            return None;
        }
        Some(Arc::new(SyntheticMicrophone {
            format: self.options.audio_format,
            clock: self.clock,
        }))
    }
}

struct SyntheticCamera {
    position: DevicePosition,
    options: SyntheticOptions,
    clock: Instant,
    controls: Arc<Mutex<ControlLog>>,
}

impl VideoDevice for SyntheticCamera {
    fn name(&self) -> String {
        format!("Synthetic {} camera", self.position)
    }

    fn position(&self) -> DevicePosition {
        self.position
    }

    fn supports_preset(&self, preset: QualityPreset) -> bool {
        self.options.presets.contains(&preset)
    }

    fn open_input(&self, preset: QualityPreset) -> Result<Box<dyn MediaInput>, String> {
        if !self.supports_preset(preset) {
            return Err(format!("preset {} not available", preset));
        }
        let (width, height) = preset.dimensions();
        Ok(Box::new(SyntheticVideoInput {
            dimensions: Dimensions::new(width, height),
            frame_rate: preset.frame_rate(),
            clock: self.clock,
            output: None,
            worker: None,
        }))
    }

    fn has_torch(&self) -> bool {
        self.options.torch
    }

    fn set_torch(&self, mode: TorchMode) -> Result<(), String> {
        if !self.options.torch {
            return Err("device has no torch".to_string());
        }
        let mut log = self.controls.lock().map_err(|e| e.to_string())?;
        log.torch.push(mode);
        Ok(())
    }

    fn supports_focus_point(&self) -> bool {
        self.options.focus_point
    }

    fn set_focus_point(&self, point: NormalizedPoint) -> Result<(), String> {
        if !self.options.focus_point {
            return Err("focus point of interest not supported".to_string());
        }
        let mut log = self.controls.lock().map_err(|e| e.to_string())?;
        log.focus.push(point);
        Ok(())
    }

    fn set_exposure_point(&self, point: NormalizedPoint) -> Result<(), String> {
        let mut log = self.controls.lock().map_err(|e| e.to_string())?;
        log.exposure.push(point);
        Ok(())
    }
}

struct SyntheticMicrophone {
    format: AudioFormat,
    clock: Instant,
}

impl AudioDevice for SyntheticMicrophone {
    fn name(&self) -> String {
        format!(
            "Synthetic microphone ({} Hz, {} ch)",
            self.format.sample_rate, self.format.channels
        )
    }

    fn open_input(&self) -> Result<Box<dyn MediaInput>, String> {
        Ok(Box::new(SyntheticAudioInput {
            format: self.format,
            clock: self.clock,
            output: None,
            worker: None,
        }))
    }
}

/// Render the colour-bar pattern shifted by `phase` bars
pub fn test_pattern(dimensions: Dimensions, phase: u64) -> RgbaImage {
    let Dimensions { width, height } = dimensions;
    let bar_width = (width / BAR_COLOURS.len() as u32).max(1);
    let mut image = RgbaImage::new(width, height);
    for (x, _, pixel) in image.enumerate_pixels_mut() {
        let bar = ((x / bar_width) as u64 + phase) % BAR_COLOURS.len() as u64;
        *pixel = Rgba(BAR_COLOURS[bar as usize]);
    }
    image
}

struct SyntheticVideoInput {
    dimensions: Dimensions,
    frame_rate: u32,
    clock: Instant,
    output: Option<SampleOutput>,
    worker: Option<CaptureLoopController>,
}

impl MediaInput for SyntheticVideoInput {
    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn attach_output(&mut self, output: SampleOutput) -> Result<(), String> {
        if output.kind() != MediaKind::Video {
            return Err("synthetic camera only produces video".to_string());
        }
        self.output = Some(output);
        Ok(())
    }

    fn start(&mut self) -> Result<(), String> {
        let Some(SampleOutput::Video(callback)) = self.output.clone() else {
            return Err("no video output attached".to_string());
        };
        if self.worker.is_some() {
            return Ok(());
        }

        let interval = Duration::from_secs(1) / self.frame_rate.max(1);
        let dimensions = self.dimensions;
        let clock = self.clock;
        let mut index: u64 = 0;
        let mut next_frame = Instant::now();

        info!(%dimensions, fps = self.frame_rate, "Starting synthetic camera");
        self.worker = Some(CaptureLoopController::start("synthetic-video", move || {
            let now = Instant::now();
            if now < next_frame {
                thread::sleep(next_frame - now);
            }
            next_frame += interval;
            let timestamp = Timestamp::from_duration(clock.elapsed());
            let image = test_pattern(dimensions, index / 15);
            callback(Frame::from_image(image, timestamp));
            index += 1;
            LoopAction::Continue
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            debug!("Stopping synthetic camera");
            worker.stop();
        }
    }
}

impl Drop for SyntheticVideoInput {
    fn drop(&mut self) {
        self.stop();
    }
}

struct SyntheticAudioInput {
    format: AudioFormat,
    clock: Instant,
    output: Option<SampleOutput>,
    worker: Option<CaptureLoopController>,
}

impl MediaInput for SyntheticAudioInput {
    fn kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn attach_output(&mut self, output: SampleOutput) -> Result<(), String> {
        if output.kind() != MediaKind::Audio {
            return Err("synthetic microphone only produces audio".to_string());
        }
        self.output = Some(output);
        Ok(())
    }

    fn start(&mut self) -> Result<(), String> {
        let Some(SampleOutput::Audio(callback)) = self.output.clone() else {
            return Err("no audio output attached".to_string());
        };
        if self.worker.is_some() {
            return Ok(());
        }
        if !self.format.is_valid() {
            return Err(format!("invalid audio format {:?}", self.format));
        }

        let format = self.format;
        let clock = self.clock;
        let chunk_duration = Duration::from_secs_f64(
            AUDIO_CHUNK_FRAMES as f64 / format.sample_rate as f64,
        );
        let step = 2.0 * std::f32::consts::PI * TONE_HZ / format.sample_rate as f32;
        let mut phase: f32 = 0.0;
        let mut next_chunk = Instant::now();

        self.worker = Some(CaptureLoopController::start("synthetic-audio", move || {
            let now = Instant::now();
            if now < next_chunk {
                thread::sleep(next_chunk - now);
            }
            next_chunk += chunk_duration;
            let timestamp = Timestamp::from_duration(clock.elapsed());
            let mut samples = Vec::with_capacity(AUDIO_CHUNK_FRAMES * format.channels as usize);
            for _ in 0..AUDIO_CHUNK_FRAMES {
                let value = (phase.sin() * i16::MAX as f32 * 0.25) as i16;
                phase = (phase + step) % (2.0 * std::f32::consts::PI);
                samples.extend(std::iter::repeat_n(value, format.channels as usize));
            }
            callback(AudioChunk::new(format, samples, timestamp));
            LoopAction::Continue
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            debug!("Stopping synthetic microphone");
            worker.stop();
        }
    }
}

impl Drop for SyntheticAudioInput {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_pattern_shifts_with_phase() {
        let dims = Dimensions::new(16, 2);
        let a = test_pattern(dims, 0);
        let b = test_pattern(dims, 1);
        assert_eq!(a.get_pixel(0, 0).0, BAR_COLOURS[0]);
        assert_eq!(b.get_pixel(0, 0).0, BAR_COLOURS[1]);
    }

    #[test]
    fn test_provider_respects_options() {
        let provider = SyntheticProvider::new(SyntheticOptions {
            front_camera: false,
            microphone: false,
            ..SyntheticOptions::default()
        });
        assert!(provider.video_device(DevicePosition::Front).is_none());
        assert!(provider.video_device(DevicePosition::Back).is_some());
        assert!(provider.audio_device().is_none());
        assert_eq!(provider.list_devices().len(), 1);
    }

    #[test]
    fn test_video_input_delivers_frames() {
        let provider = SyntheticProvider::default();
        let camera = provider.video_device(DevicePosition::Back).unwrap();
        let mut input = camera.open_input(QualityPreset::Low).unwrap();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        input
            .attach_output(SampleOutput::Video(Arc::new(move |frame: Frame| {
                let _ = tx.lock().unwrap().send(frame.dimensions());
            })))
            .unwrap();
        input.start().unwrap();
        let dims = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        input.stop();
        assert_eq!(dims, Dimensions::new(320, 240));
    }

    #[test]
    fn test_unsupported_preset_cannot_open() {
        let provider = SyntheticProvider::default();
        let camera = provider.video_device(DevicePosition::Back).unwrap();
        assert!(!camera.supports_preset(QualityPreset::Uhd2160));
        assert!(camera.open_input(QualityPreset::Uhd2160).is_err());
    }

    #[test]
    fn test_audio_input_rejects_video_output() {
        let provider = SyntheticProvider::default();
        let mic = provider.audio_device().unwrap();
        let mut input = mic.open_input().unwrap();
        let result = input.attach_output(SampleOutput::Video(Arc::new(|_| {})));
        assert!(result.is_err());
    }
}
