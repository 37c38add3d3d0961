// SPDX-License-Identifier: GPL-3.0-only

//! Narrow capability interfaces between the pipeline stages and its consumers
//!
//! Every observer method has a no-op default so consumers implement only
//! what they need. Observer callbacks are always invoked on the
//! presentation context.

use crate::backends::audio::AudioChunk;
use crate::backends::camera::types::Frame;
use crate::errors::{AppError, CaptureError, RecorderError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Receives raw samples on the capture context
pub trait SampleSink: Send + Sync {
    fn on_video_frame(&self, frame: Frame);
    fn on_audio_chunk(&self, chunk: AudioChunk);
}

/// Receives every processed frame for display
///
/// Called on the capture context; implementations must hand the frame off
/// rather than block. Frames backed by the render pool return their buffer
/// once the last clone is dropped.
pub trait RenderSink: Send + Sync {
    fn render(&self, frame: Frame);
}

/// Capture session lifecycle
pub trait CaptureObserver: Send + Sync {
    fn capture_will_start(&self) {}
    fn capture_did_start(&self) {}
    fn capture_will_stop(&self) {}
    fn capture_did_stop(&self) {}
    fn capture_did_fail(&self, _error: &CaptureError) {}
}

/// Recording lifecycle and status
pub trait RecorderObserver: Send + Sync {
    fn did_start_recording(&self) {}
    fn did_abort_recording(&self) {}
    fn did_finish_recording(&self) {}
    fn will_start_writing(&self) {}
    fn did_finish_writing(&self, _output: &Path) {}
    fn did_update_frame_rate(&self, _frame_rate: f32) {}
    fn did_update_recording_seconds(&self, _seconds: u64) {}
    fn did_fail(&self, _error: &RecorderError) {}
}

/// Delivery of the post-processed take
pub trait OutputObserver: Send + Sync {
    fn did_finish_writing(&self, _final_path: &Path) {}
    fn did_fail_to_record(&self, _error: &AppError) {}
}

/// External interruption signal (session interruption, backgrounding, Ctrl-C)
///
/// The pipeline subscribes once at construction; every invocation of the
/// handler stops the current recording.
pub trait InterruptionSource: Send + Sync {
    fn subscribe(&self, handler: Box<dyn Fn() + Send + Sync>);
}

/// Render sink that discards frames
pub struct NullRenderSink;

impl RenderSink for NullRenderSink {
    fn render(&self, _frame: Frame) {}
}

/// Observer that ignores every event
pub struct NoopObserver;

impl CaptureObserver for NoopObserver {}
impl RecorderObserver for NoopObserver {}
impl OutputObserver for NoopObserver {}

/// Every observable pipeline event as a value
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    CaptureWillStart,
    CaptureDidStart,
    CaptureWillStop,
    CaptureDidStop,
    CaptureDidFail(CaptureError),
    DidStartRecording,
    DidAbortRecording,
    DidFinishRecording,
    WillStartWriting,
    DidFinishWriting(PathBuf),
    FrameRate(f32),
    RecordingSeconds(u64),
    RecorderDidFail(RecorderError),
    OutputReady(PathBuf),
    OutputFailed(String),
}

impl PipelineEvent {
    /// Periodic status reports, usually filtered out when asserting on order
    pub fn is_status(&self) -> bool {
        matches!(
            self,
            PipelineEvent::FrameRate(_) | PipelineEvent::RecordingSeconds(_)
        )
    }
}

/// Observer forwarding every event into an unbounded tokio channel
#[derive(Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { sender }), receiver)
    }

    fn send(&self, event: PipelineEvent) {
        if self.sender.send(event).is_err() {
            trace!("Event receiver dropped");
        }
    }
}

impl CaptureObserver for ChannelObserver {
    fn capture_will_start(&self) {
        self.send(PipelineEvent::CaptureWillStart);
    }
    fn capture_did_start(&self) {
        self.send(PipelineEvent::CaptureDidStart);
    }
    fn capture_will_stop(&self) {
        self.send(PipelineEvent::CaptureWillStop);
    }
    fn capture_did_stop(&self) {
        self.send(PipelineEvent::CaptureDidStop);
    }
    fn capture_did_fail(&self, error: &CaptureError) {
        self.send(PipelineEvent::CaptureDidFail(error.clone()));
    }
}

impl RecorderObserver for ChannelObserver {
    fn did_start_recording(&self) {
        self.send(PipelineEvent::DidStartRecording);
    }
    fn did_abort_recording(&self) {
        self.send(PipelineEvent::DidAbortRecording);
    }
    fn did_finish_recording(&self) {
        self.send(PipelineEvent::DidFinishRecording);
    }
    fn will_start_writing(&self) {
        self.send(PipelineEvent::WillStartWriting);
    }
    fn did_finish_writing(&self, output: &Path) {
        self.send(PipelineEvent::DidFinishWriting(output.to_path_buf()));
    }
    fn did_update_frame_rate(&self, frame_rate: f32) {
        self.send(PipelineEvent::FrameRate(frame_rate));
    }
    fn did_update_recording_seconds(&self, seconds: u64) {
        self.send(PipelineEvent::RecordingSeconds(seconds));
    }
    fn did_fail(&self, error: &RecorderError) {
        self.send(PipelineEvent::RecorderDidFail(error.clone()));
    }
}

impl OutputObserver for ChannelObserver {
    fn did_finish_writing(&self, final_path: &Path) {
        self.send(PipelineEvent::OutputReady(final_path.to_path_buf()));
    }
    fn did_fail_to_record(&self, error: &AppError) {
        self.send(PipelineEvent::OutputFailed(error.to_string()));
    }
}
