// SPDX-License-Identifier: GPL-3.0-only

//! Shared fakes for the integration tests
//!
//! [`ManualProvider`] hands the test full control over sample delivery and
//! timestamps; [`FakeWriterFactory`] records every writer call and can be
//! told to fail at each step; [`RenderLog`] records what the preview saw.

#![allow(dead_code)]

use filtercam::backends::audio::{AudioChunk, AudioFormat};
use filtercam::backends::camera::types::{Dimensions, Frame, MediaKind, Timestamp};
use filtercam::backends::camera::{
    AudioCallback, AudioDevice, DeviceProvider, MediaInput, SampleOutput, VideoCallback,
    VideoDevice,
};
use filtercam::pipelines::video::writer::{
    AudioTrackSettings, MediaWriter, VideoCodec, VideoTrackSettings, WriterFactory, WriterStatus,
};
use filtercam::{
    CaptureConfiguration, ChannelObserver, Config, DevicePosition, FilterCam, PipelineEvent,
    QualityPreset, RenderSink,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

pub const FRAME_SIZE: Dimensions = Dimensions {
    width: 64,
    height: 48,
};

pub const AUDIO_FORMAT: AudioFormat = AudioFormat::new(48_000, 1);

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

pub fn frame(millis: u64, rgba: [u8; 4]) -> Frame {
    Frame::filled(FRAME_SIZE, rgba, Timestamp::from_millis(millis))
}

pub fn chunk(millis: u64) -> AudioChunk {
    AudioChunk::silence(AUDIO_FORMAT, 480, Timestamp::from_millis(millis))
}

pub fn temp_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("filtercam-it-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn config(dir: &Path, preset: QualityPreset, transcode: bool) -> Config {
    Config {
        capture: CaptureConfiguration::new(DevicePosition::Back, preset),
        temp_dir: Some(dir.to_path_buf()),
        transcode,
        ..Config::default()
    }
}

/// Where the device callbacks of the running inputs end up
#[derive(Default)]
pub struct ManualFeed {
    video: Mutex<Option<VideoCallback>>,
    audio: Mutex<Option<AudioCallback>>,
}

impl ManualFeed {
    /// Deliver a frame as the camera would; false when capture is not running
    pub fn push_frame(&self, frame: Frame) -> bool {
        let callback = self.video.lock().unwrap().clone();
        match callback {
            Some(callback) => {
                callback(frame);
                true
            }
            None => false,
        }
    }

    pub fn push_audio(&self, chunk: AudioChunk) -> bool {
        let callback = self.audio.lock().unwrap().clone();
        match callback {
            Some(callback) => {
                callback(chunk);
                true
            }
            None => false,
        }
    }
}

/// Camera and microphone driven by the test
pub struct ManualProvider {
    pub feed: Arc<ManualFeed>,
    pub presets: Vec<QualityPreset>,
    pub microphone: bool,
}

impl ManualProvider {
    pub fn new(presets: Vec<QualityPreset>) -> Self {
        Self {
            feed: Arc::new(ManualFeed::default()),
            presets,
            microphone: true,
        }
    }
}

impl DeviceProvider for ManualProvider {
    fn name(&self) -> &str {
        "manual"
    }

    fn video_device(&self, position: DevicePosition) -> Option<Arc<dyn VideoDevice>> {
        Some(Arc::new(ManualCamera {
            position,
            presets: self.presets.clone(),
            feed: Arc::clone(&self.feed),
        }))
    }

    fn audio_device(&self) -> Option<Arc<dyn AudioDevice>> {
        self.microphone.then(|| {
            Arc::new(ManualMicrophone {
                feed: Arc::clone(&self.feed),
            }) as Arc<dyn AudioDevice>
        })
    }
}

struct ManualCamera {
    position: DevicePosition,
    presets: Vec<QualityPreset>,
    feed: Arc<ManualFeed>,
}

impl VideoDevice for ManualCamera {
    fn name(&self) -> String {
        "Manual Camera".to_string()
    }

    fn position(&self) -> DevicePosition {
        self.position
    }

    fn supports_preset(&self, preset: QualityPreset) -> bool {
        self.presets.contains(&preset)
    }

    fn open_input(&self, _preset: QualityPreset) -> Result<Box<dyn MediaInput>, String> {
        Ok(Box::new(ManualInput {
            kind: MediaKind::Video,
            feed: Arc::clone(&self.feed),
            output: None,
        }))
    }
}

struct ManualMicrophone {
    feed: Arc<ManualFeed>,
}

impl AudioDevice for ManualMicrophone {
    fn name(&self) -> String {
        "Manual Microphone".to_string()
    }

    fn open_input(&self) -> Result<Box<dyn MediaInput>, String> {
        Ok(Box::new(ManualInput {
            kind: MediaKind::Audio,
            feed: Arc::clone(&self.feed),
            output: None,
        }))
    }
}

struct ManualInput {
    kind: MediaKind,
    feed: Arc<ManualFeed>,
    output: Option<SampleOutput>,
}

impl MediaInput for ManualInput {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn attach_output(&mut self, output: SampleOutput) -> Result<(), String> {
        if output.kind() != self.kind {
            return Err("wrong output kind".to_string());
        }
        self.output = Some(output);
        Ok(())
    }

    fn start(&mut self) -> Result<(), String> {
        match self.output.clone() {
            Some(SampleOutput::Video(callback)) => *self.feed.video.lock().unwrap() = Some(callback),
            Some(SampleOutput::Audio(callback)) => *self.feed.audio.lock().unwrap() = Some(callback),
            None => return Err("no output attached".to_string()),
        }
        Ok(())
    }

    fn stop(&mut self) {
        match self.kind {
            MediaKind::Video => *self.feed.video.lock().unwrap() = None,
            MediaKind::Audio => *self.feed.audio.lock().unwrap() = None,
        }
    }
}

/// Everything the fake writers were asked to do
#[derive(Debug, Default)]
pub struct WriterLog {
    pub created: usize,
    pub session_start: Option<Timestamp>,
    pub session_end: Option<Timestamp>,
    /// Timestamp and top-left pixel of each appended frame
    pub video: Vec<(Timestamp, [u8; 4])>,
    pub audio: usize,
    pub finished: bool,
    pub cancelled: bool,
}

/// Steps the fake writers can be told to fail
#[derive(Debug, Default)]
pub struct WriterFailures {
    pub video_track: AtomicBool,
    pub audio_track: AtomicBool,
    pub start_writing: AtomicBool,
    pub video: AtomicBool,
    pub audio: AtomicBool,
    pub finish: AtomicBool,
}

impl WriterFailures {
    fn check(flag: &AtomicBool, reason: &str) -> Result<(), String> {
        if flag.load(Ordering::SeqCst) {
            Err(reason.to_string())
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
pub struct FakeWriterFactory {
    pub log: Arc<Mutex<WriterLog>>,
    pub fail: Arc<WriterFailures>,
}

impl WriterFactory for FakeWriterFactory {
    fn extension(&self) -> &'static str {
        "fake"
    }

    fn video_codec(&self) -> VideoCodec {
        VideoCodec::H264
    }

    fn create(&self, path: &Path) -> Result<Box<dyn MediaWriter>, String> {
        self.log.lock().unwrap().created += 1;
        Ok(Box::new(FakeWriter {
            path: path.to_path_buf(),
            log: Arc::clone(&self.log),
            fail: Arc::clone(&self.fail),
            video: false,
            audio: false,
            open: false,
            session: false,
        }))
    }
}

struct FakeWriter {
    path: PathBuf,
    log: Arc<Mutex<WriterLog>>,
    fail: Arc<WriterFailures>,
    video: bool,
    audio: bool,
    open: bool,
    session: bool,
}

impl MediaWriter for FakeWriter {
    fn output_path(&self) -> &Path {
        &self.path
    }

    fn add_video_track(&mut self, _settings: &VideoTrackSettings) -> Result<(), String> {
        WriterFailures::check(&self.fail.video_track, "video input not accepted")?;
        self.video = true;
        Ok(())
    }

    fn add_audio_track(&mut self, _settings: &AudioTrackSettings) -> Result<(), String> {
        WriterFailures::check(&self.fail.audio_track, "audio input not accepted")?;
        self.audio = true;
        Ok(())
    }

    fn start_writing(&mut self) -> Result<(), String> {
        WriterFailures::check(&self.fail.start_writing, "container could not be opened")?;
        std::fs::write(&self.path, b"fake").map_err(|e| e.to_string())?;
        self.open = true;
        Ok(())
    }

    fn start_session(&mut self, at: Timestamp) {
        self.session = true;
        self.log.lock().unwrap().session_start = Some(at);
    }

    fn is_ready_for_video(&self) -> bool {
        self.open && self.session && self.video
    }

    fn is_ready_for_audio(&self) -> bool {
        self.open && self.session && self.audio
    }

    fn append_video(&mut self, frame: &Frame) -> Result<(), String> {
        WriterFailures::check(&self.fail.video, "video encoder rejected frame")?;
        let pixel = frame.pixel(0, 0).unwrap_or_default();
        self.log.lock().unwrap().video.push((frame.timestamp(), pixel));
        Ok(())
    }

    fn append_audio(&mut self, _chunk: &AudioChunk) -> Result<(), String> {
        WriterFailures::check(&self.fail.audio, "audio encoder rejected chunk")?;
        self.log.lock().unwrap().audio += 1;
        Ok(())
    }

    fn end_session(&mut self, at: Timestamp) {
        self.log.lock().unwrap().session_end = Some(at);
    }

    fn finish(self: Box<Self>) -> WriterStatus {
        self.log.lock().unwrap().finished = true;
        if self.fail.finish.load(Ordering::SeqCst) {
            WriterStatus::Failed("disk full".to_string())
        } else if self.open {
            WriterStatus::Completed(self.path.clone())
        } else {
            WriterStatus::Failed("never opened".to_string())
        }
    }

    fn cancel(self: Box<Self>) {
        self.log.lock().unwrap().cancelled = true;
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Preview recording the timestamp of every frame it is shown
///
/// With `hold` set it also keeps the frames, as a queueing preview would.
#[derive(Default)]
pub struct RenderLog {
    pub shown: Mutex<Vec<Timestamp>>,
    pub held: Mutex<Vec<Frame>>,
    pub hold: AtomicBool,
}

impl RenderLog {
    pub fn times_shown(&self, millis: u64) -> usize {
        let at = Timestamp::from_millis(millis);
        self.shown.lock().unwrap().iter().filter(|t| **t == at).count()
    }
}

impl RenderSink for RenderLog {
    fn render(&self, frame: Frame) {
        self.shown.lock().unwrap().push(frame.timestamp());
        if self.hold.load(Ordering::SeqCst) {
            self.held.lock().unwrap().push(frame);
        }
    }
}

/// A pipeline on manual devices and fake writers
pub struct Harness {
    pub cam: FilterCam,
    pub feed: Arc<ManualFeed>,
    pub writers: Arc<FakeWriterFactory>,
    pub preview: Arc<RenderLog>,
    pub events: UnboundedReceiver<PipelineEvent>,
    pub dir: PathBuf,
}

impl Harness {
    pub fn new(presets: Vec<QualityPreset>, preset: QualityPreset) -> Self {
        let dir = temp_dir();
        let provider = ManualProvider::new(presets);
        let feed = Arc::clone(&provider.feed);
        let writers = Arc::new(FakeWriterFactory::default());
        let preview = Arc::new(RenderLog::default());
        let (observer, events) = ChannelObserver::new();
        let cam = FilterCam::builder(config(&dir, preset, false))
            .provider(Arc::new(provider))
            .writer_factory(writers.clone())
            .render_sink(preview.clone())
            .observer(observer)
            .build()
            .unwrap();
        Self {
            cam,
            feed,
            writers,
            preview,
            events,
            dir,
        }
    }

    pub fn running() -> Self {
        let mut harness = Self::new(vec![QualityPreset::Low], QualityPreset::Low);
        harness.cam.start_capture();
        harness.expect(|e| *e == PipelineEvent::CaptureDidStart);
        harness
    }

    /// Capture running and a take in progress
    pub fn recording() -> Self {
        let mut harness = Self::running();
        harness.feed.push_frame(frame(0, [10, 20, 30, 255]));
        harness.feed.push_audio(chunk(0));
        harness.cam.flush();
        harness.cam.start_recording();
        harness.expect(|e| *e == PipelineEvent::DidStartRecording);
        harness
    }

    /// Wait for a matching event; returns it
    pub fn expect(&mut self, pred: impl Fn(&PipelineEvent) -> bool) -> PipelineEvent {
        self.events_until(pred).pop().unwrap()
    }

    /// Non-status events up to and including the first match
    pub fn events_until(&mut self, pred: impl Fn(&PipelineEvent) -> bool) -> Vec<PipelineEvent> {
        let deadline = std::time::Instant::now() + EVENT_TIMEOUT;
        let mut seen = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) if event.is_status() => {}
                Ok(event) => {
                    let done = pred(&event);
                    seen.push(event);
                    if done {
                        return seen;
                    }
                }
                Err(_) => {
                    assert!(
                        std::time::Instant::now() < deadline,
                        "timed out, events so far: {:?}",
                        seen
                    );
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
        }
    }

    /// Status events delivered over `window`; other events are discarded
    pub fn status_for(&mut self, window: Duration) -> Vec<PipelineEvent> {
        std::thread::sleep(window);
        self.cam.flush();
        let mut seen = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if event.is_status() {
                seen.push(event);
            }
        }
        seen
    }

    /// Non-status events already delivered
    pub fn drain(&mut self) -> Vec<PipelineEvent> {
        self.cam.flush();
        let mut seen = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if !event.is_status() {
                seen.push(event);
            }
        }
        seen
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, WriterLog> {
        self.writers.log.lock().unwrap()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}
