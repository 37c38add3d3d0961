// SPDX-License-Identifier: GPL-3.0-only

//! Capture session lifecycle
//!
//! The session owns the device inputs and the capture context. Setup,
//! teardown, torch and focus all run on the capture context, and every
//! captured sample is re-dispatched onto it before reaching the sink, so
//! per-stream ordering is preserved.
//!
//! Each start attempt gets a generation number. Samples and setup results
//! carrying an older generation are dropped, which makes a stop that races
//! an in-flight start or late device callbacks harmless.

use super::frame_loop::SerialQueue;
use super::types::{MediaKind, NormalizedPoint, TorchMode};
use super::{AudioCallback, DeviceProvider, MediaInput, SampleOutput, VideoCallback, VideoDevice};
use crate::backends::audio::AudioChunk;
use crate::backends::camera::types::Frame;
use crate::config::CaptureConfiguration;
use crate::constants::device::TORCH_ON_THRESHOLD;
use crate::errors::CaptureError;
use crate::events::{CaptureObserver, SampleSink};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Stopped,
    Starting,
    Running,
}

struct SessionState {
    phase: Phase,
    inputs: Vec<Box<dyn MediaInput>>,
    video_device: Option<Arc<dyn VideoDevice>>,
    torch_level: f32,
}

struct SessionInner {
    configuration: CaptureConfiguration,
    provider: Arc<dyn DeviceProvider>,
    queue: SerialQueue,
    sink: Arc<dyn SampleSink>,
    observer: Arc<dyn CaptureObserver>,
    generation: Arc<AtomicU64>,
    state: Mutex<SessionState>,
}

/// Camera + microphone capture session
#[derive(Clone)]
pub struct CaptureSession {
    inner: Arc<SessionInner>,
}

impl CaptureSession {
    pub fn new(
        configuration: CaptureConfiguration,
        provider: Arc<dyn DeviceProvider>,
        queue: SerialQueue,
        sink: Arc<dyn SampleSink>,
        observer: Arc<dyn CaptureObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                configuration,
                provider,
                queue,
                sink,
                observer,
                generation: Arc::new(AtomicU64::new(0)),
                state: Mutex::new(SessionState {
                    phase: Phase::Stopped,
                    inputs: Vec::new(),
                    video_device: None,
                    torch_level: 0.0,
                }),
            }),
        }
    }

    pub fn configuration(&self) -> CaptureConfiguration {
        self.inner.configuration
    }

    /// The capture context
    pub fn queue(&self) -> &SerialQueue {
        &self.inner.queue
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock_state().phase == Phase::Running
    }

    /// Acquire the devices and begin delivering samples
    ///
    /// Returns immediately. Success is signalled with `capture_did_start`,
    /// failure with `capture_did_fail`. No-op unless stopped.
    pub fn start(&self) {
        {
            let mut state = self.inner.lock_state();
            if state.phase != Phase::Stopped {
                debug!(phase = ?state.phase, "Capture start ignored");
                return;
            }
            state.phase = Phase::Starting;
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.observer.capture_will_start();

        let inner = Arc::clone(&self.inner);
        self.inner
            .queue
            .dispatch(move || inner.start_on_queue(generation));
    }

    /// Halt delivery and release the inputs. Idempotent.
    pub fn stop(&self) {
        let inputs = {
            let mut state = self.inner.lock_state();
            if state.phase == Phase::Stopped {
                return;
            }
            state.phase = Phase::Stopped;
            std::mem::take(&mut state.inputs)
        };
        // Samples already queued from this session are dropped from here on.
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.observer.capture_will_stop();

        let released = inputs.len();
        let _ = self.inner.queue.sync(move || {
            for mut input in inputs {
                input.stop();
            }
        });
        info!(inputs = released, "Capture session stopped");
        self.inner.observer.capture_did_stop();
    }

    /// Torch on at `level` when above the threshold, otherwise off
    ///
    /// Devices without an available torch ignore the call and failures are
    /// swallowed.
    pub fn set_torch_level(&self, level: f32) {
        self.inner.lock_state().torch_level = level;
        let inner = Arc::clone(&self.inner);
        self.inner.queue.dispatch(move || inner.apply_torch(level));
    }

    /// Last requested torch level
    pub fn torch_level(&self) -> f32 {
        self.inner.lock_state().torch_level
    }

    pub fn has_torch(&self) -> bool {
        self.inner
            .video_device()
            .map(|device| device.has_torch())
            .unwrap_or(false)
    }

    /// Best-effort focus and exposure at a normalized point
    pub fn focus(&self, point: NormalizedPoint) {
        let inner = Arc::clone(&self.inner);
        self.inner.queue.dispatch(move || inner.apply_focus(point));
    }
}

impl SessionInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// The configured camera, resolved once and kept for torch/focus
    fn video_device(&self) -> Option<Arc<dyn VideoDevice>> {
        let mut state = self.lock_state();
        if state.video_device.is_none() {
            state.video_device = self
                .provider
                .video_device(self.configuration.device_position);
        }
        state.video_device.clone()
    }

    fn start_on_queue(&self, generation: u64) {
        if !self.is_current(generation) {
            debug!(generation, "Capture start superseded before setup");
            return;
        }

        match self.build_inputs(generation) {
            Ok(mut inputs) => {
                {
                    let mut state = self.lock_state();
                    if !self.is_current(generation) || state.phase != Phase::Starting {
                        drop(state);
                        debug!(generation, "Capture start superseded during setup");
                        for input in &mut inputs {
                            input.stop();
                        }
                        return;
                    }
                    state.inputs = inputs;
                    state.phase = Phase::Running;
                }
                info!(
                    position = %self.configuration.device_position,
                    preset = %self.configuration.preset,
                    provider = self.provider.name(),
                    "Capture session started"
                );
                self.observer.capture_did_start();
            }
            Err(error) => {
                {
                    let mut state = self.lock_state();
                    if !self.is_current(generation) {
                        drop(state);
                        debug!(generation, %error, "Superseded capture start failed");
                        return;
                    }
                    state.phase = Phase::Stopped;
                }
                warn!(%error, "Capture session failed to start");
                self.observer.capture_did_fail(&error);
            }
        }
    }

    fn build_inputs(&self, generation: u64) -> Result<Vec<Box<dyn MediaInput>>, CaptureError> {
        let position = self.configuration.device_position;
        let preset = self.configuration.preset;

        let camera = self
            .video_device()
            .ok_or(CaptureError::VideoDeviceNotFound(position))?;
        if !camera.supports_preset(preset) {
            return Err(CaptureError::PresetNotSupported(preset));
        }
        let microphone = self
            .provider
            .audio_device()
            .ok_or(CaptureError::AudioDeviceNotFound)?;

        let mut video = camera
            .open_input(preset)
            .map_err(|reason| CaptureError::InputAcquisitionFailed {
                kind: MediaKind::Video,
                reason,
            })?;
        let mut audio =
            microphone
                .open_input()
                .map_err(|reason| CaptureError::InputAcquisitionFailed {
                    kind: MediaKind::Audio,
                    reason,
                })?;

        video
            .attach_output(SampleOutput::Video(self.video_output(generation)))
            .map_err(|reason| CaptureError::OutputAttachFailed {
                kind: MediaKind::Video,
                reason,
            })?;
        audio
            .attach_output(SampleOutput::Audio(self.audio_output(generation)))
            .map_err(|reason| CaptureError::OutputAttachFailed {
                kind: MediaKind::Audio,
                reason,
            })?;

        video
            .start()
            .map_err(|reason| CaptureError::InputAcquisitionFailed {
                kind: MediaKind::Video,
                reason,
            })?;
        if let Err(reason) = audio.start() {
            video.stop();
            return Err(CaptureError::InputAcquisitionFailed {
                kind: MediaKind::Audio,
                reason,
            });
        }

        debug!(camera = %camera.name(), microphone = %microphone.name(), "Inputs running");
        Ok(vec![video, audio])
    }

    fn video_output(&self, generation: u64) -> VideoCallback {
        let queue = self.queue.clone();
        let sink = Arc::clone(&self.sink);
        let current = Arc::clone(&self.generation);
        Arc::new(move |frame: Frame| {
            let sink = Arc::clone(&sink);
            let current = Arc::clone(&current);
            queue.dispatch(move || {
                if current.load(Ordering::SeqCst) == generation {
                    sink.on_video_frame(frame);
                }
            });
        })
    }

    fn audio_output(&self, generation: u64) -> AudioCallback {
        let queue = self.queue.clone();
        let sink = Arc::clone(&self.sink);
        let current = Arc::clone(&self.generation);
        Arc::new(move |chunk: AudioChunk| {
            let sink = Arc::clone(&sink);
            let current = Arc::clone(&current);
            queue.dispatch(move || {
                if current.load(Ordering::SeqCst) == generation {
                    sink.on_audio_chunk(chunk);
                }
            });
        })
    }

    fn apply_torch(&self, level: f32) {
        let Some(device) = self.video_device() else {
            return;
        };
        if !device.has_torch() || !device.is_torch_available() {
            debug!("Torch not available, ignoring level change");
            return;
        }
        let mode = if level > TORCH_ON_THRESHOLD {
            TorchMode::On(level.min(1.0))
        } else {
            TorchMode::Off
        };
        if let Err(e) = device.set_torch(mode) {
            debug!(error = %e, ?mode, "Torch configuration failed");
        }
    }

    fn apply_focus(&self, point: NormalizedPoint) {
        let Some(device) = self.video_device() else {
            return;
        };
        if device.supports_focus_point() {
            if let Err(e) = device.set_focus_point(point) {
                debug!(error = %e, "Focus configuration failed");
            }
        }
        if let Err(e) = device.set_exposure_point(point) {
            debug!(error = %e, "Exposure configuration failed");
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for input in &mut state.inputs {
            input.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::synthetic::{SyntheticOptions, SyntheticProvider};
    use crate::config::{DevicePosition, QualityPreset};
    use std::sync::mpsc;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingSink {
        frames: AtomicU64,
        chunks: AtomicU64,
    }

    impl SampleSink for CountingSink {
        fn on_video_frame(&self, _frame: Frame) {
            self.frames.fetch_add(1, Ordering::SeqCst);
        }
        fn on_audio_chunk(&self, _chunk: AudioChunk) {
            self.chunks.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ChannelCaptureObserver(Mutex<mpsc::Sender<String>>);

    impl ChannelCaptureObserver {
        fn send(&self, event: &str) {
            let _ = self.0.lock().unwrap().send(event.to_string());
        }
    }

    impl CaptureObserver for ChannelCaptureObserver {
        fn capture_did_start(&self) {
            self.send("started");
        }
        fn capture_did_stop(&self) {
            self.send("stopped");
        }
        fn capture_did_fail(&self, error: &CaptureError) {
            self.send(&format!("failed: {}", error));
        }
    }

    fn session(
        options: SyntheticOptions,
        preset: QualityPreset,
    ) -> (CaptureSession, Arc<CountingSink>, mpsc::Receiver<String>, Arc<SyntheticProvider>) {
        let provider = Arc::new(SyntheticProvider::new(options));
        let sink = Arc::new(CountingSink::default());
        let (tx, rx) = mpsc::channel();
        let session = CaptureSession::new(
            CaptureConfiguration::new(DevicePosition::Back, preset),
            provider.clone(),
            SerialQueue::new("test-capture"),
            sink.clone(),
            Arc::new(ChannelCaptureObserver(Mutex::new(tx))),
        );
        (session, sink, rx, provider)
    }

    #[test]
    fn test_start_delivers_samples_then_stop_halts() {
        let (session, sink, rx, _) = session(SyntheticOptions::default(), QualityPreset::Low);
        session.start();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "started");
        assert!(session.is_running());

        std::thread::sleep(Duration::from_millis(150));
        session.stop();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "stopped");
        session.queue().flush();

        let frames = sink.frames.load(Ordering::SeqCst);
        assert!(frames > 0);
        assert!(sink.chunks.load(Ordering::SeqCst) > 0);
        std::thread::sleep(Duration::from_millis(100));
        session.queue().flush();
        assert_eq!(sink.frames.load(Ordering::SeqCst), frames);
    }

    #[test]
    fn test_missing_microphone_fails_start() {
        let options = SyntheticOptions {
            microphone: false,
            ..SyntheticOptions::default()
        };
        let (session, _, rx, _) = session(options, QualityPreset::Low);
        session.start();
        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event, format!("failed: {}", CaptureError::AudioDeviceNotFound));
        assert!(!session.is_running());
    }

    #[test]
    fn test_failure_of_superseded_start_is_not_reported() {
        let options = SyntheticOptions {
            microphone: false,
            ..SyntheticOptions::default()
        };
        let (session, _, rx, _) = session(options, QualityPreset::Low);
        let (release, blocked) = mpsc::channel::<()>();
        session.queue().dispatch(move || {
            let _ = blocked.recv();
        });
        session.start();
        std::thread::scope(|scope| {
            let stopper = scope.spawn(|| session.stop());
            while session.inner.generation.load(Ordering::SeqCst) < 2 {
                std::thread::sleep(Duration::from_millis(1));
            }
            release.send(()).unwrap();
            stopper.join().unwrap();
        });
        session.queue().flush();

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "stopped");
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(!session.is_running());
    }

    #[test]
    fn test_stop_when_stopped_is_noop() {
        let (session, _, rx, _) = session(SyntheticOptions::default(), QualityPreset::Low);
        session.stop();
        session.stop();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_torch_threshold() {
        let (session, _, _, provider) = session(SyntheticOptions::default(), QualityPreset::Low);
        session.set_torch_level(0.05);
        session.set_torch_level(0.1);
        session.set_torch_level(0.7);
        session.set_torch_level(3.0);
        session.queue().flush();

        let controls = provider.controls();
        let log = controls.lock().unwrap();
        assert_eq!(
            log.torch,
            vec![TorchMode::Off, TorchMode::Off, TorchMode::On(0.7), TorchMode::On(1.0)]
        );
        assert_eq!(session.torch_level(), 3.0);
    }

    #[test]
    fn test_focus_without_point_of_interest_sets_exposure_only() {
        let options = SyntheticOptions {
            focus_point: false,
            ..SyntheticOptions::default()
        };
        let (session, _, _, provider) = session(options, QualityPreset::Low);
        session.focus(NormalizedPoint::new(0.25, 0.75));
        session.queue().flush();

        let controls = provider.controls();
        let log = controls.lock().unwrap();
        assert!(log.focus.is_empty());
        assert_eq!(log.exposure, vec![NormalizedPoint::new(0.25, 0.75)]);
    }
}
