// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline controller
//!
//! [`FilterCam`] wires one capture session, one recorder and the
//! post-record transcode step together:
//!
//! ```text
//! CaptureSession ──samples──▶ Recorder ──frames──▶ RenderSink
//!       │                        │
//!       │ lifecycle              │ finished take
//!       ▼                        ▼
//! CaptureObserver          OutputStage ──▶ Transcoder ──▶ OutputObserver
//! ```
//!
//! Capture lifecycle events first drive the recorder (status timer,
//! forced stop) and are then delivered to the capture observer on the
//! presentation context. A finished take is moved out of the fixed
//! temporary path before the recorder returns to idle, then rotated on a
//! background thread.

use crate::backends::camera::frame_loop::SerialQueue;
use crate::backends::camera::types::{Framerate, NormalizedPoint};
use crate::backends::camera::{CaptureSession, DeviceProvider, default_provider};
use crate::config::{CaptureConfiguration, Config};
use crate::errors::{AppError, AppResult, CaptureError, RecorderError};
use crate::events::{
    CaptureObserver, InterruptionSource, NoopObserver, NullRenderSink, OutputObserver,
    RecorderObserver, RenderSink,
};
use crate::pipelines::filter::FilterChain;
use crate::pipelines::transcode::{Transcoder, default_transcoder, relocate, unique_output_path};
use crate::pipelines::video::writer::remove_artifacts;
use crate::pipelines::video::{
    Recorder, RecorderOptions, RecorderPhase, WriterFactory, default_writer_factory,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Collects the collaborators of a [`FilterCam`]
///
/// Everything except the configuration is optional; missing parts fall
/// back to the default provider, writer and transcoder of the build and
/// to observers that ignore every event.
pub struct FilterCamBuilder {
    config: Config,
    provider: Option<Arc<dyn DeviceProvider>>,
    writer_factory: Option<Arc<dyn WriterFactory>>,
    transcoder: Option<Arc<dyn Transcoder>>,
    render_sink: Arc<dyn RenderSink>,
    capture_observer: Arc<dyn CaptureObserver>,
    recorder_observer: Arc<dyn RecorderObserver>,
    output_observer: Arc<dyn OutputObserver>,
    interruptions: Vec<Arc<dyn InterruptionSource>>,
}

impl FilterCamBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            provider: None,
            writer_factory: None,
            transcoder: None,
            render_sink: Arc::new(NullRenderSink),
            capture_observer: Arc::new(NoopObserver),
            recorder_observer: Arc::new(NoopObserver),
            output_observer: Arc::new(NoopObserver),
            interruptions: Vec::new(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn DeviceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn writer_factory(mut self, factory: Arc<dyn WriterFactory>) -> Self {
        self.writer_factory = Some(factory);
        self
    }

    pub fn transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = Some(transcoder);
        self
    }

    pub fn render_sink(mut self, sink: Arc<dyn RenderSink>) -> Self {
        self.render_sink = sink;
        self
    }

    pub fn capture_observer(mut self, observer: Arc<dyn CaptureObserver>) -> Self {
        self.capture_observer = observer;
        self
    }

    pub fn recorder_observer(mut self, observer: Arc<dyn RecorderObserver>) -> Self {
        self.recorder_observer = observer;
        self
    }

    pub fn output_observer(mut self, observer: Arc<dyn OutputObserver>) -> Self {
        self.output_observer = observer;
        self
    }

    /// Register one value as capture, recorder and output observer
    pub fn observer<O>(self, observer: Arc<O>) -> Self
    where
        O: CaptureObserver + RecorderObserver + OutputObserver + 'static,
    {
        self.capture_observer(observer.clone())
            .recorder_observer(observer.clone())
            .output_observer(observer)
    }

    /// Every signal of `source` stops the current recording
    pub fn interruption_source(mut self, source: Arc<dyn InterruptionSource>) -> Self {
        self.interruptions.push(source);
        self
    }

    /// Create the temporary directory and assemble the pipeline
    ///
    /// Capture is not started.
    pub fn build(self) -> AppResult<FilterCam> {
        let config = self.config;
        let temp_dir = config.temp_dir();
        std::fs::create_dir_all(&temp_dir).map_err(|e| {
            AppError::Storage(format!("cannot create {}: {}", temp_dir.display(), e))
        })?;

        let provider = self.provider.unwrap_or_else(default_provider);
        let factory = self
            .writer_factory
            .unwrap_or_else(|| default_writer_factory(config.bitrate_preset));
        let transcoder = self.transcoder.unwrap_or_else(default_transcoder);

        let capture = SerialQueue::new("capture");
        let presentation = SerialQueue::new("presentation");

        let output_stage = Arc::new(OutputStage {
            recorder_observer: self.recorder_observer,
            output_observer: self.output_observer,
            factory: Arc::clone(&factory),
            transcoder,
            temp_dir: temp_dir.clone(),
            transcode: config.transcode,
            presentation: presentation.clone(),
        });

        let preset = config.capture.preset;
        let recorder = Recorder::new(
            RecorderOptions {
                temp_dir,
                bitrate: config.bitrate_preset,
                frame_rate: Framerate::from_int(preset.frame_rate()),
                flip_vertical: config.capture.device_position.mirrors(),
            },
            factory,
            self.render_sink,
            output_stage,
            capture.clone(),
            presentation.clone(),
        );
        recorder.set_filter_chain(FilterChain::new(config.filters.clone()));

        let hooks = Arc::new(CaptureHooks {
            recorder: recorder.clone(),
            observer: self.capture_observer,
            presentation: presentation.clone(),
        });
        let session = CaptureSession::new(
            config.capture,
            provider,
            capture,
            Arc::new(recorder.clone()),
            hooks,
        );

        let inner = Arc::new(FilterCamInner {
            session,
            recorder,
            presentation,
            config,
        });
        for source in &self.interruptions {
            let weak: Weak<FilterCamInner> = Arc::downgrade(&inner);
            source.subscribe(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.on_interrupted();
                }
            }));
        }
        info!(
            position = %inner.config.capture.device_position,
            preset = %inner.config.capture.preset,
            transcode = inner.config.transcode,
            "Pipeline assembled"
        );
        Ok(FilterCam { inner })
    }
}

struct FilterCamInner {
    session: CaptureSession,
    recorder: Recorder,
    presentation: SerialQueue,
    config: Config,
}

impl FilterCamInner {
    fn on_interrupted(&self) {
        info!("Interrupted, stopping recording");
        self.recorder.stop_recording();
    }
}

impl Drop for FilterCamInner {
    fn drop(&mut self) {
        self.recorder.stop_recording();
        self.session.stop();
        self.recorder.shutdown();
        debug!("Pipeline torn down");
    }
}

/// Live capture, filtering and recording of one camera
pub struct FilterCam {
    inner: Arc<FilterCamInner>,
}

impl FilterCam {
    pub fn builder(config: Config) -> FilterCamBuilder {
        FilterCamBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn capture_configuration(&self) -> CaptureConfiguration {
        self.inner.session.configuration()
    }

    /// Acquire the devices; the outcome arrives as a capture event
    pub fn start_capture(&self) {
        self.inner.session.start();
    }

    /// Release the devices. Ends any take in progress.
    pub fn stop_capture(&self) {
        self.inner.session.stop();
    }

    pub fn is_capturing(&self) -> bool {
        self.inner.session.is_running()
    }

    /// Replace the filter chain from the next frame on
    pub fn set_filter_chain(&self, chain: FilterChain) {
        self.inner.recorder.set_filter_chain(chain);
    }

    pub fn filter_chain(&self) -> Arc<FilterChain> {
        self.inner.recorder.filter_chain()
    }

    pub fn set_torch_level(&self, level: f32) {
        self.inner.session.set_torch_level(level);
    }

    pub fn torch_level(&self) -> f32 {
        self.inner.session.torch_level()
    }

    pub fn has_torch(&self) -> bool {
        self.inner.session.has_torch()
    }

    /// Focus and expose at a point in normalized frame coordinates
    pub fn focus(&self, point: NormalizedPoint) {
        self.inner.session.focus(point);
    }

    pub fn start_recording(&self) {
        self.inner.recorder.start_recording();
    }

    pub fn stop_recording(&self) {
        self.inner.recorder.stop_recording();
    }

    pub fn is_recording(&self) -> bool {
        self.inner.recorder.is_recording()
    }

    pub fn recording_phase(&self) -> RecorderPhase {
        self.inner.recorder.phase()
    }

    /// Interruption hook for callers without an [`InterruptionSource`]
    pub fn on_interrupted(&self) {
        self.inner.on_interrupted();
    }

    /// Smoothed frames per second
    pub fn frame_rate(&self) -> f32 {
        self.inner.recorder.frame_rate()
    }

    pub fn recording_seconds(&self) -> u64 {
        self.inner.recorder.recording_seconds()
    }

    /// Fixed path of the take being recorded
    pub fn temp_path(&self) -> PathBuf {
        self.inner.recorder.temp_path()
    }

    /// Wait for the capture and then the presentation context to drain
    pub fn flush(&self) {
        self.inner.session.queue().flush();
        self.inner.presentation.flush();
    }
}

/// Capture events drive the recorder before reaching the observer
struct CaptureHooks {
    recorder: Recorder,
    observer: Arc<dyn CaptureObserver>,
    presentation: SerialQueue,
}

impl CaptureHooks {
    fn notify<F>(&self, f: F)
    where
        F: FnOnce(&dyn CaptureObserver) + Send + 'static,
    {
        let observer = Arc::clone(&self.observer);
        self.presentation.dispatch(move || f(observer.as_ref()));
    }
}

impl CaptureObserver for CaptureHooks {
    fn capture_will_start(&self) {
        self.recorder.capture_will_start();
        self.notify(|o| o.capture_will_start());
    }

    fn capture_did_start(&self) {
        self.recorder.capture_did_start();
        self.notify(|o| o.capture_did_start());
    }

    fn capture_will_stop(&self) {
        self.notify(|o| o.capture_will_stop());
    }

    fn capture_did_stop(&self) {
        self.recorder.capture_did_stop();
        self.notify(|o| o.capture_did_stop());
    }

    fn capture_did_fail(&self, error: &CaptureError) {
        let error = error.clone();
        self.notify(move |o| o.capture_did_fail(&error));
    }
}

/// Hands finished takes to the transcoder
///
/// Runs on the presentation context like every recorder observer.
struct OutputStage {
    recorder_observer: Arc<dyn RecorderObserver>,
    output_observer: Arc<dyn OutputObserver>,
    factory: Arc<dyn WriterFactory>,
    transcoder: Arc<dyn Transcoder>,
    temp_dir: PathBuf,
    transcode: bool,
    presentation: SerialQueue,
}

impl OutputStage {
    /// Move the take off the fixed temporary path
    fn stage(&self, output: &Path) -> Result<PathBuf, AppError> {
        let staged = unique_output_path(&self.temp_dir, self.factory.extension());
        relocate(&self.factory.artifacts(output), &staged).map_err(|e| {
            AppError::Storage(format!("cannot move {}: {}", output.display(), e))
        })
    }

    fn fail(&self, error: AppError) {
        error!(error = %error, "Take not delivered");
        self.output_observer.did_fail_to_record(&error);
    }

    fn spawn_transcode(&self, staged: PathBuf) {
        let destination = unique_output_path(&self.temp_dir, self.transcoder.extension());
        let transcoder = Arc::clone(&self.transcoder);
        let factory = Arc::clone(&self.factory);
        let observer = Arc::clone(&self.output_observer);
        let presentation = self.presentation.clone();
        let spawned = std::thread::Builder::new()
            .name("transcode".to_string())
            .spawn(move || {
                let result = transcoder.transcode(&staged, &destination);
                if result.is_ok() {
                    remove_artifacts(factory.as_ref(), &staged);
                }
                presentation.dispatch(move || match result {
                    Ok(path) => {
                        info!(path = %path.display(), "Take ready");
                        observer.did_finish_writing(&path);
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            source = %staged.display(),
                            "Transcode failed, keeping recording"
                        );
                        observer.did_fail_to_record(&AppError::Transcode(e));
                    }
                });
            });
        if let Err(e) = spawned {
            self.fail(AppError::Other(format!("cannot spawn transcode thread: {}", e)));
        }
    }
}

impl RecorderObserver for OutputStage {
    fn did_start_recording(&self) {
        self.recorder_observer.did_start_recording();
    }

    fn did_abort_recording(&self) {
        self.recorder_observer.did_abort_recording();
    }

    fn did_finish_recording(&self) {
        self.recorder_observer.did_finish_recording();
    }

    fn will_start_writing(&self) {
        self.recorder_observer.will_start_writing();
    }

    fn did_finish_writing(&self, output: &Path) {
        self.recorder_observer.did_finish_writing(output);
        let staged = match self.stage(output) {
            Ok(staged) => staged,
            Err(e) => return self.fail(e),
        };
        if self.transcode {
            debug!(path = %staged.display(), "Queued for transcode");
            self.spawn_transcode(staged);
        } else {
            self.output_observer.did_finish_writing(&staged);
        }
    }

    fn did_update_frame_rate(&self, frame_rate: f32) {
        self.recorder_observer.did_update_frame_rate(frame_rate);
    }

    fn did_update_recording_seconds(&self, seconds: u64) {
        self.recorder_observer.did_update_recording_seconds(seconds);
    }

    fn did_fail(&self, error: &RecorderError) {
        self.recorder_observer.did_fail(error);
    }
}
