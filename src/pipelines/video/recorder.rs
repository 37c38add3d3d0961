// SPDX-License-Identifier: GPL-3.0-only

//! Recording state machine
//!
//! The recorder is the [`SampleSink`] of the capture session. Every video
//! frame is measured by the frame-rate estimator, mirrored for the front
//! camera, run through the current filter chain and handed to the render
//! sink exactly once. While a take is in progress the filtered frame is
//! first rendered into a pooled buffer, and that pooled frame is both shown
//! and appended to the writer.
//!
//! Lifecycle: `Idle → Starting → Recording → Stopping → Idle`. Aborts jump
//! straight back to `Idle` under the state lock. All writer calls except
//! the blocking finalize happen on the capture context; observers are
//! always notified on the presentation context.

use super::frame_rate::FrameRateEstimator;
use super::pool::PixelBufferPool;
use super::writer::{
    AudioTrackSettings, MediaWriter, VideoTrackSettings, WriterFactory, WriterStatus,
    remove_artifacts,
};
use crate::backends::audio::{AudioChunk, AudioFormat};
use crate::backends::camera::frame_loop::{CaptureLoopController, LoopAction, SerialQueue};
use crate::backends::camera::types::{Dimensions, Frame, Framerate, Timestamp};
use crate::constants::BitratePreset;
use crate::constants::recording::{
    FRAME_LOG_INTERVAL, PIXEL_BUFFER_POOL_CAPACITY, STATUS_INTERVAL, TEMP_FILE_STEM,
};
use crate::errors::RecorderError;
use crate::events::{RecorderObserver, RenderSink, SampleSink};
use crate::pipelines::filter::{FilterChain, flip_vertical};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, error, info, warn};

/// Fixed parameters of a recorder
#[derive(Debug, Clone)]
pub struct RecorderOptions {
    /// Directory holding the temporary recording file
    pub temp_dir: PathBuf,
    pub bitrate: BitratePreset,
    /// Nominal frame rate of the video track
    pub frame_rate: Framerate,
    /// Flip frames vertically before filtering (front camera)
    pub flip_vertical: bool,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
            bitrate: BitratePreset::default(),
            frame_rate: Framerate::default(),
            flip_vertical: false,
        }
    }
}

/// Externally visible recorder state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderPhase {
    Idle,
    Starting,
    Recording,
    Stopping,
}

/// Open writer plus the per-take bookkeeping
struct RecordingSession {
    writer: Box<dyn MediaWriter>,
    pool: PixelBufferPool,
    /// Timestamp of the first frame; set once writing started
    start: Option<Timestamp>,
    current: Option<Timestamp>,
    frames: u64,
}

enum Phase {
    Idle,
    Starting { generation: u64 },
    Recording(Box<RecordingSession>),
    Stopping,
}

impl Phase {
    fn public(&self) -> RecorderPhase {
        match self {
            Phase::Idle => RecorderPhase::Idle,
            Phase::Starting { .. } => RecorderPhase::Starting,
            Phase::Recording(_) => RecorderPhase::Recording,
            Phase::Stopping => RecorderPhase::Stopping,
        }
    }
}

struct RecorderState {
    phase: Phase,
    generation: u64,
    last_dimensions: Option<Dimensions>,
    audio_format: Option<AudioFormat>,
}

impl RecorderState {
    /// Whole seconds between the first and the latest recorded frame
    fn recording_seconds(&self) -> u64 {
        match &self.phase {
            Phase::Recording(session) => match (session.start, session.current) {
                (Some(start), Some(current)) => current.saturating_since(start).as_secs(),
                _ => 0,
            },
            _ => 0,
        }
    }
}

type SharedState = Arc<Mutex<RecorderState>>;
type SharedEstimator = Arc<Mutex<FrameRateEstimator>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct RecorderInner {
    options: RecorderOptions,
    factory: Arc<dyn WriterFactory>,
    render_sink: Arc<dyn RenderSink>,
    observer: Arc<dyn RecorderObserver>,
    capture: SerialQueue,
    presentation: SerialQueue,
    chain: RwLock<Arc<FilterChain>>,
    estimator: SharedEstimator,
    state: SharedState,
    status_timer: Mutex<Option<CaptureLoopController>>,
    capture_running: AtomicBool,
}

/// Filter + encode stage of the pipeline
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<RecorderInner>,
}

impl Recorder {
    /// `capture` must be the queue the capture session delivers samples on
    pub fn new(
        options: RecorderOptions,
        factory: Arc<dyn WriterFactory>,
        render_sink: Arc<dyn RenderSink>,
        observer: Arc<dyn RecorderObserver>,
        capture: SerialQueue,
        presentation: SerialQueue,
    ) -> Self {
        Self {
            inner: Arc::new(RecorderInner {
                options,
                factory,
                render_sink,
                observer,
                capture,
                presentation,
                chain: RwLock::new(Arc::new(FilterChain::empty())),
                estimator: Arc::new(Mutex::new(FrameRateEstimator::new())),
                state: Arc::new(Mutex::new(RecorderState {
                    phase: Phase::Idle,
                    generation: 0,
                    last_dimensions: None,
                    audio_format: None,
                })),
                status_timer: Mutex::new(None),
                capture_running: AtomicBool::new(false),
            }),
        }
    }

    /// Path of the temporary recording file
    pub fn temp_path(&self) -> PathBuf {
        self.inner.temp_path()
    }

    pub fn phase(&self) -> RecorderPhase {
        lock(&self.inner.state).phase.public()
    }

    /// True from `start_recording` until the take is finalized or aborted
    pub fn is_recording(&self) -> bool {
        self.phase() != RecorderPhase::Idle
    }

    pub fn frame_rate(&self) -> f32 {
        lock(&self.inner.estimator).rate()
    }

    pub fn recording_seconds(&self) -> u64 {
        lock(&self.inner.state).recording_seconds()
    }

    /// Replace the filter chain; takes effect from the next frame
    pub fn set_filter_chain(&self, chain: FilterChain) {
        info!(chain = %chain, "Filter chain updated");
        *self
            .inner
            .chain
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(chain);
    }

    pub fn filter_chain(&self) -> Arc<FilterChain> {
        self.inner.current_chain()
    }

    /// Begin a take. No-op unless idle; returns immediately.
    pub fn start_recording(&self) {
        let generation = {
            let mut state = lock(&self.inner.state);
            if !matches!(state.phase, Phase::Idle) {
                debug!(phase = ?state.phase.public(), "Start recording ignored");
                return;
            }
            state.generation += 1;
            let generation = state.generation;
            state.phase = Phase::Starting { generation };
            generation
        };
        let inner = Arc::clone(&self.inner);
        self.inner
            .capture
            .dispatch(move || inner.start_on_queue(generation));
    }

    /// End the take. No-op when idle; returns immediately.
    ///
    /// Nothing is appended to the writer once this returns. The write
    /// session is closed on the capture context and finalized on a
    /// background thread.
    pub fn stop_recording(&self) {
        let session = {
            let mut state = lock(&self.inner.state);
            match std::mem::replace(&mut state.phase, Phase::Idle) {
                Phase::Idle => return,
                Phase::Stopping => {
                    state.phase = Phase::Stopping;
                    debug!("Stop recording ignored, already finalizing");
                    return;
                }
                Phase::Starting { generation } => {
                    info!(generation, "Pending recording start cancelled");
                    drop(state);
                    self.inner.notify(|o| o.did_abort_recording());
                    return;
                }
                Phase::Recording(session) => {
                    state.phase = Phase::Stopping;
                    session
                }
            }
        };
        session.pool.release();
        self.inner.notify(|o| o.will_start_writing());

        let inner = Arc::clone(&self.inner);
        self.inner
            .capture
            .dispatch(move || RecorderInner::finish_on_queue(&inner, session));
    }

    /// Stop status reporting and reset the estimator
    pub fn capture_will_start(&self) {
        self.inner.stop_status_timer();
        lock(&self.inner.estimator).reset();
    }

    /// Resume status reporting
    pub fn capture_did_start(&self) {
        self.inner.capture_running.store(true, Ordering::SeqCst);
        self.inner.start_status_timer();
    }

    /// Stop status reporting and any take in progress
    pub fn capture_did_stop(&self) {
        self.inner.capture_running.store(false, Ordering::SeqCst);
        self.inner.stop_status_timer();
        self.stop_recording();
    }

    /// Stop the status timer for good
    pub fn shutdown(&self) {
        self.inner.stop_status_timer();
    }
}

impl RecorderInner {
    fn temp_path(&self) -> PathBuf {
        self.options
            .temp_dir
            .join(TEMP_FILE_STEM)
            .with_extension(self.factory.extension())
    }

    fn current_chain(&self) -> Arc<FilterChain> {
        Arc::clone(&self.chain.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Run `f` with the observer on the presentation context
    fn notify<F>(&self, f: F)
    where
        F: FnOnce(&dyn RecorderObserver) + Send + 'static,
    {
        let observer = Arc::clone(&self.observer);
        self.presentation.dispatch(move || f(observer.as_ref()));
    }

    fn fail(&self, error: RecorderError) {
        warn!(error = %error, "Recorder error");
        self.notify(move |o| o.did_fail(&error));
    }

    fn start_on_queue(&self, generation: u64) {
        let (dimensions, audio_format) = {
            let state = lock(&self.state);
            match state.phase {
                Phase::Starting { generation: g } if g == generation => {}
                _ => {
                    debug!(generation, "Recording start superseded");
                    return;
                }
            }
            (state.last_dimensions, state.audio_format)
        };

        let path = self.temp_path();
        remove_artifacts(self.factory.as_ref(), &path);

        let Some(dimensions) = dimensions else {
            return self.start_failed(generation, RecorderError::VideoFormatUnavailable);
        };
        let mut writer = match self.factory.create(&path) {
            Ok(writer) => writer,
            Err(e) => return self.start_failed(generation, RecorderError::WriterCreationFailed(e)),
        };
        if let Err(e) = self.attach_tracks(writer.as_mut(), dimensions, audio_format) {
            writer.cancel();
            return self.start_failed(generation, e);
        }

        {
            let mut state = lock(&self.state);
            if !matches!(state.phase, Phase::Starting { generation: g } if g == generation) {
                drop(state);
                debug!(generation, "Recording start cancelled during setup");
                writer.cancel();
                remove_artifacts(self.factory.as_ref(), &path);
                return;
            }
            state.phase = Phase::Recording(Box::new(RecordingSession {
                writer,
                pool: PixelBufferPool::new(dimensions, PIXEL_BUFFER_POOL_CAPACITY),
                start: None,
                current: None,
                frames: 0,
            }));
        }
        info!(path = %path.display(), %dimensions, "Recording started");
        self.notify(|o| o.did_start_recording());
    }

    fn attach_tracks(
        &self,
        writer: &mut dyn MediaWriter,
        dimensions: Dimensions,
        audio_format: Option<AudioFormat>,
    ) -> Result<(), RecorderError> {
        let video = VideoTrackSettings {
            codec: self.factory.video_codec(),
            dimensions,
            frame_rate: self.options.frame_rate,
            bitrate: self.options.bitrate,
        };
        writer
            .add_video_track(&video)
            .map_err(RecorderError::VideoTrackAttachFailed)?;

        let format = audio_format.ok_or(RecorderError::AudioFormatUnavailable)?;
        let audio =
            AudioTrackSettings::from_format(format).map_err(RecorderError::AudioSettingsRejected)?;
        writer
            .add_audio_track(&audio)
            .map_err(RecorderError::AudioTrackAttachFailed)
    }

    fn start_failed(&self, generation: u64, error: RecorderError) {
        {
            let mut state = lock(&self.state);
            if matches!(state.phase, Phase::Starting { generation: g } if g == generation) {
                state.phase = Phase::Idle;
            }
        }
        error!(error = %error, "Recording failed to start");
        self.notify(move |o| o.did_fail(&error));
    }

    /// Cancel the take and delete its file. Caller holds the state lock.
    fn abort_locked(&self, state: &mut RecorderState, error: Option<RecorderError>) {
        let phase = std::mem::replace(&mut state.phase, Phase::Idle);
        if let Phase::Recording(session) = phase {
            session.pool.release();
            session.writer.cancel();
            remove_artifacts(self.factory.as_ref(), &self.temp_path());
        }
        match error {
            Some(error) => {
                warn!(error = %error, "Recording aborted");
                self.notify(move |o| o.did_fail(&error));
            }
            None => warn!("Recording aborted"),
        }
        self.notify(|o| o.did_abort_recording());
    }

    /// Record a filtered frame; returns the frame to display
    fn record_frame(&self, filtered: Frame) -> Frame {
        let timestamp = filtered.timestamp();
        let mut state = lock(&self.state);
        state.last_dimensions = Some(filtered.dimensions());

        let Phase::Recording(session) = &mut state.phase else {
            return filtered;
        };

        if session.start.is_none() {
            if let Err(e) = session.writer.start_writing() {
                self.abort_locked(&mut state, Some(RecorderError::WriteSessionFailed(e)));
                return filtered;
            }
            session.writer.start_session(timestamp);
            session.start = Some(timestamp);
            debug!(%timestamp, "Write session opened");
        }

        let Some(pooled) = session.pool.render(&filtered) else {
            warn!(%timestamp, "Pixel buffer pool released, frame not recorded");
            return filtered;
        };
        session.current = Some(timestamp);

        if session.writer.is_ready_for_video() {
            match session.writer.append_video(&pooled) {
                Ok(()) => {
                    session.frames += 1;
                    if session.frames % FRAME_LOG_INTERVAL == 0 {
                        debug!(frames = session.frames, %timestamp, "Recording progress");
                    }
                }
                Err(e) => {
                    drop(state);
                    self.fail(RecorderError::VideoWriteFailed(e));
                }
            }
        }
        pooled
    }

    /// Close the write session and finalize on a background thread
    ///
    /// The recorder returns to idle only once the file is flushed, so a new
    /// take cannot clobber a temporary file that is still being written.
    fn finish_on_queue(self: &Arc<Self>, mut session: Box<RecordingSession>) {
        let end = session.current.or(session.start).unwrap_or(Timestamp::ZERO);
        session.writer.end_session(end);
        let frames = session.frames;

        let weak = Arc::downgrade(self);
        let observer = Arc::clone(&self.observer);
        let presentation = self.presentation.clone();
        let state = Arc::clone(&self.state);
        let writer = session.writer;
        let spawned = std::thread::Builder::new()
            .name("writer-finalize".to_string())
            .spawn(move || {
                let status = writer.finish();
                presentation.dispatch(move || {
                    match status {
                        WriterStatus::Completed(path) => {
                            info!(path = %path.display(), frames, "Recording finalized");
                            observer.did_finish_writing(&path);
                        }
                        WriterStatus::Failed(reason) => {
                            error!(reason = %reason, "Recording finalize failed");
                            observer.did_fail(&RecorderError::WriteFailed(reason));
                        }
                        WriterStatus::Cancelled => debug!("Finalize reported cancellation"),
                    }
                    {
                        let mut state = lock(&state);
                        if matches!(state.phase, Phase::Stopping) {
                            state.phase = Phase::Idle;
                        }
                    }
                    observer.did_finish_recording();
                    if let Some(inner) = weak.upgrade()
                        && inner.capture_running.load(Ordering::SeqCst)
                    {
                        inner.start_status_timer();
                    }
                });
            });
        if let Err(e) = spawned {
            error!(error = %e, "Failed to spawn finalize thread");
            lock(&self.state).phase = Phase::Idle;
            self.fail(RecorderError::WriteFailed(e.to_string()));
            self.notify(|o| o.did_finish_recording());
        }
    }

    fn start_status_timer(&self) {
        let mut timer = lock(&self.status_timer);
        if timer.as_ref().is_some_and(|t| t.is_running()) {
            return;
        }
        let estimator = Arc::clone(&self.estimator);
        let state = Arc::clone(&self.state);
        let observer = Arc::clone(&self.observer);
        let presentation = self.presentation.clone();
        *timer = Some(CaptureLoopController::start_periodic(
            "recorder-status",
            STATUS_INTERVAL,
            move || {
                let rate = lock(&estimator).rate();
                let seconds = lock(&state).recording_seconds();
                let observer = Arc::clone(&observer);
                presentation.dispatch(move || {
                    observer.did_update_frame_rate(rate);
                    observer.did_update_recording_seconds(seconds);
                });
                LoopAction::Continue
            },
        ));
    }

    fn stop_status_timer(&self) {
        let timer = lock(&self.status_timer).take();
        if let Some(mut timer) = timer {
            timer.stop();
        }
    }
}

impl SampleSink for Recorder {
    fn on_video_frame(&self, frame: Frame) {
        lock(&self.inner.estimator).observe(frame.timestamp());
        let frame = if self.inner.options.flip_vertical {
            flip_vertical(&frame)
        } else {
            frame
        };
        let filtered = self.inner.current_chain().apply(&frame);
        let output = self.inner.record_frame(filtered);
        self.inner.render_sink.render(output);
    }

    fn on_audio_chunk(&self, chunk: AudioChunk) {
        let mut state = lock(&self.inner.state);
        state.audio_format = Some(chunk.format());
        let Phase::Recording(session) = &mut state.phase else {
            return;
        };
        if !session.writer.is_ready_for_audio() {
            return;
        }
        if let Err(e) = session.writer.append_audio(&chunk) {
            self.inner
                .abort_locked(&mut state, Some(RecorderError::AudioWriteFailed(e)));
        }
    }
}

impl Drop for RecorderInner {
    fn drop(&mut self) {
        if let Some(mut timer) = lock(&self.status_timer).take() {
            timer.stop();
        }
        if let Phase::Recording(session) = std::mem::replace(&mut lock(&self.state).phase, Phase::Idle)
        {
            session.pool.release();
            session.writer.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelObserver, NullRenderSink, PipelineEvent};
    use crate::pipelines::video::software::Y4mWriterFactory;
    use std::path::Path;
    use std::time::Duration;

    /// Preview that keeps every frame it is shown
    #[derive(Default)]
    struct HoldingSink {
        frames: Mutex<Vec<Frame>>,
    }

    impl RenderSink for HoldingSink {
        fn render(&self, frame: Frame) {
            self.frames.lock().unwrap().push(frame);
        }
    }

    fn recorder(dir: &Path) -> (Recorder, tokio::sync::mpsc::UnboundedReceiver<PipelineEvent>) {
        recorder_with_sink(dir, Arc::new(NullRenderSink))
    }

    fn recorder_with_sink(
        dir: &Path,
        render_sink: Arc<dyn RenderSink>,
    ) -> (Recorder, tokio::sync::mpsc::UnboundedReceiver<PipelineEvent>) {
        let (observer, events) = ChannelObserver::new();
        let recorder = Recorder::new(
            RecorderOptions {
                temp_dir: dir.to_path_buf(),
                frame_rate: Framerate::from_int(10),
                ..RecorderOptions::default()
            },
            Arc::new(Y4mWriterFactory),
            render_sink,
            observer,
            SerialQueue::new("test-capture"),
            SerialQueue::new("test-presentation"),
        );
        (recorder, events)
    }

    fn settle(recorder: &Recorder) {
        recorder.inner.capture.flush();
        recorder.inner.presentation.flush();
    }

    fn drain(events: &mut tokio::sync::mpsc::UnboundedReceiver<PipelineEvent>) -> Vec<PipelineEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            if !event.is_status() {
                out.push(event);
            }
        }
        out
    }

    fn status_events(events: &mut tokio::sync::mpsc::UnboundedReceiver<PipelineEvent>) -> usize {
        let mut count = 0;
        while let Ok(event) = events.try_recv() {
            if event.is_status() {
                count += 1;
            }
        }
        count
    }

    fn wait_idle(recorder: &Recorder) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while recorder.is_recording() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
            settle(recorder);
        }
        settle(recorder);
        assert!(!recorder.is_recording());
    }

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("filtercam-rec-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_start_without_frames_fails() {
        let dir = temp_dir();
        let (recorder, mut events) = recorder(&dir);
        recorder.start_recording();
        settle(&recorder);
        assert_eq!(
            drain(&mut events),
            vec![PipelineEvent::RecorderDidFail(RecorderError::VideoFormatUnavailable)]
        );
        assert_eq!(recorder.phase(), RecorderPhase::Idle);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_start_without_audio_fails() {
        let dir = temp_dir();
        let (recorder, mut events) = recorder(&dir);
        recorder.on_video_frame(Frame::filled(Dimensions::new(4, 4), [0, 0, 0, 255], Timestamp::ZERO));
        recorder.start_recording();
        settle(&recorder);
        assert_eq!(
            drain(&mut events),
            vec![PipelineEvent::RecorderDidFail(RecorderError::AudioFormatUnavailable)]
        );
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_record_and_finish() {
        let dir = temp_dir();
        let (recorder, mut events) = recorder(&dir);
        let dims = Dimensions::new(4, 4);
        let format = AudioFormat::new(8_000, 1);
        recorder.on_video_frame(Frame::filled(dims, [0, 0, 0, 255], Timestamp::ZERO));
        recorder.on_audio_chunk(AudioChunk::silence(format, 80, Timestamp::ZERO));

        recorder.start_recording();
        recorder.start_recording();
        settle(&recorder);
        assert_eq!(recorder.phase(), RecorderPhase::Recording);

        for i in 1..=21u64 {
            let ts = Timestamp::from_millis(i * 100);
            recorder.on_video_frame(Frame::filled(dims, [50, 60, 70, 255], ts));
            recorder.on_audio_chunk(AudioChunk::silence(format, 800, ts));
        }
        settle(&recorder);
        assert_eq!(recorder.recording_seconds(), 2);

        recorder.stop_recording();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while recorder.is_recording() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
            settle(&recorder);
        }
        assert!(!recorder.is_recording());

        let path = recorder.temp_path();
        assert_eq!(
            drain(&mut events),
            vec![
                PipelineEvent::DidStartRecording,
                PipelineEvent::WillStartWriting,
                PipelineEvent::DidFinishWriting(path.clone()),
                PipelineEvent::DidFinishRecording,
            ]
        );
        let info = crate::media::y4m::probe(&path).unwrap();
        assert_eq!(info.frame_count, 21);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_stop_while_starting_aborts() {
        let dir = temp_dir();
        let (recorder, mut events) = recorder(&dir);
        recorder.on_video_frame(Frame::filled(Dimensions::new(2, 2), [0, 0, 0, 255], Timestamp::ZERO));
        recorder.on_audio_chunk(AudioChunk::silence(AudioFormat::new(8_000, 1), 8, Timestamp::ZERO));

        // Hold the capture context so the start stays pending
        let (release, blocked) = std::sync::mpsc::channel::<()>();
        recorder.inner.capture.dispatch(move || {
            let _ = blocked.recv();
        });
        recorder.start_recording();
        assert_eq!(recorder.phase(), RecorderPhase::Starting);
        recorder.stop_recording();
        release.send(()).unwrap();
        settle(&recorder);

        assert_eq!(drain(&mut events), vec![PipelineEvent::DidAbortRecording]);
        assert_eq!(recorder.phase(), RecorderPhase::Idle);
        assert!(!recorder.temp_path().exists());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_frames_held_by_preview_are_still_recorded() {
        let dir = temp_dir();
        let sink = Arc::new(HoldingSink::default());
        let (recorder, _events) = recorder_with_sink(&dir, sink.clone());
        let dims = Dimensions::new(4, 4);
        let format = AudioFormat::new(8_000, 1);
        recorder.on_video_frame(Frame::filled(dims, [0, 0, 0, 255], Timestamp::ZERO));
        recorder.on_audio_chunk(AudioChunk::silence(format, 80, Timestamp::ZERO));
        recorder.start_recording();
        settle(&recorder);

        let count = PIXEL_BUFFER_POOL_CAPACITY as u64 * 3;
        for i in 1..=count {
            let ts = Timestamp::from_millis(i * 100);
            let gray = (i * 10) as u8;
            recorder.on_video_frame(Frame::filled(dims, [gray, gray, gray, 255], ts));
        }
        recorder.stop_recording();
        wait_idle(&recorder);
        assert_eq!(sink.frames.lock().unwrap().len() as u64, count + 1);

        // Every take frame is distinct, so none was replaced by a repeat
        let mut reader = crate::media::y4m::Y4mReader::open(&recorder.temp_path()).unwrap();
        let mut planes = Vec::new();
        let mut lumas = Vec::new();
        while reader.next_frame(&mut planes).unwrap() {
            lumas.push(planes[0]);
        }
        assert_eq!(lumas.len() as u64, count);
        let mut distinct = lumas.clone();
        distinct.dedup();
        assert_eq!(distinct.len(), lumas.len());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_status_timer_follows_capture() {
        let dir = temp_dir();
        let (recorder, mut events) = recorder(&dir);

        recorder.capture_did_start();
        std::thread::sleep(STATUS_INTERVAL * 5);
        settle(&recorder);
        let reported = status_events(&mut events);
        // Rate and seconds once per tick
        assert!((4..=14).contains(&reported), "{} status events", reported);

        recorder.capture_will_start();
        settle(&recorder);
        status_events(&mut events);
        std::thread::sleep(STATUS_INTERVAL * 3);
        settle(&recorder);
        assert_eq!(status_events(&mut events), 0);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_status_timer_restarts_after_take_only_while_capturing() {
        let dir = temp_dir();
        let (recorder, mut events) = recorder(&dir);
        let dims = Dimensions::new(4, 4);
        let format = AudioFormat::new(8_000, 1);
        recorder.capture_did_start();
        recorder.on_video_frame(Frame::filled(dims, [0, 0, 0, 255], Timestamp::ZERO));
        recorder.on_audio_chunk(AudioChunk::silence(format, 80, Timestamp::ZERO));

        // Take ends while capture keeps running
        recorder.start_recording();
        settle(&recorder);
        recorder.on_video_frame(Frame::filled(dims, [9, 9, 9, 255], Timestamp::from_millis(100)));
        recorder.stop_recording();
        wait_idle(&recorder);
        status_events(&mut events);
        std::thread::sleep(STATUS_INTERVAL * 3);
        settle(&recorder);
        assert!(status_events(&mut events) > 0);

        // Take ended by capture stopping
        recorder.start_recording();
        settle(&recorder);
        recorder.on_video_frame(Frame::filled(dims, [9, 9, 9, 255], Timestamp::from_millis(200)));
        recorder.capture_did_stop();
        wait_idle(&recorder);
        assert!(drain(&mut events).contains(&PipelineEvent::DidFinishRecording));
        std::thread::sleep(STATUS_INTERVAL * 3);
        settle(&recorder);
        assert_eq!(status_events(&mut events), 0);
        std::fs::remove_dir_all(dir).unwrap();
    }
}
