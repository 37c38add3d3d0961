// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the capture, recording and transcode pipeline
//!
//! Errors never unwind out of the pipeline. They are delivered to the
//! observers on the presentation context, which is why every type here is
//! `Clone`.

use crate::backends::camera::types::MediaKind;
use crate::config::{DevicePosition, QualityPreset};
use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Umbrella error for the binary and the post-processing hand-off
#[derive(Debug, Clone)]
pub enum AppError {
    /// Capture session setup errors
    Capture(CaptureError),
    /// Recording errors
    Recording(RecorderError),
    /// Post-record transcode errors
    Transcode(TranscodeError),
    /// Configuration errors
    Config(String),
    /// Storage/filesystem errors
    Storage(String),
    /// Generic error with message
    Other(String),
}

/// Errors that abort a capture session start attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// No video device exists for the requested position
    VideoDeviceNotFound(DevicePosition),
    /// No audio capture device exists
    AudioDeviceNotFound,
    /// The selected video device cannot deliver the requested preset
    PresetNotSupported(QualityPreset),
    /// Opening the device input failed
    InputAcquisitionFailed { kind: MediaKind, reason: String },
    /// Attaching the sample output to the session failed
    OutputAttachFailed { kind: MediaKind, reason: String },
}

/// Errors reported by the recording state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderError {
    /// The encoder handle could not be created
    WriterCreationFailed(String),
    /// No video frame has been observed yet, so the track cannot be sized
    VideoFormatUnavailable,
    /// The video track was rejected by the encoder
    VideoTrackAttachFailed(String),
    /// No audio chunk has been observed yet
    AudioFormatUnavailable,
    /// The cached audio format cannot be turned into encoder settings
    AudioSettingsRejected(String),
    /// The audio track was rejected by the encoder
    AudioTrackAttachFailed(String),
    /// Opening the write session on the first frame failed
    WriteSessionFailed(String),
    /// Appending a video frame failed (reported, not fatal)
    VideoWriteFailed(String),
    /// Appending an audio chunk failed (aborts the recording)
    AudioWriteFailed(String),
    /// Finalizing the container failed
    WriteFailed(String),
}

/// Errors from the rotate-and-re-encode step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeError {
    /// The source file has no video track
    NoVideoTrack,
    /// The source file could not be opened or parsed
    SourceUnreadable(String),
    /// No usable encoder/muxer is available
    EncoderUnavailable(String),
    /// The export itself failed
    ExportFailed(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Capture(e) => write!(f, "Capture error: {}", e),
            AppError::Recording(e) => write!(f, "Recording error: {}", e),
            AppError::Transcode(e) => write!(f, "Transcode error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::VideoDeviceNotFound(position) => {
                write!(f, "No {} video device found", position)
            }
            CaptureError::AudioDeviceNotFound => write!(f, "No audio device found"),
            CaptureError::PresetNotSupported(preset) => {
                write!(f, "Preset {} is not supported by the video device", preset)
            }
            CaptureError::InputAcquisitionFailed { kind, reason } => {
                write!(f, "Could not obtain {} device input: {}", kind, reason)
            }
            CaptureError::OutputAttachFailed { kind, reason } => {
                write!(f, "Could not add {} data output: {}", kind, reason)
            }
        }
    }
}

impl fmt::Display for RecorderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecorderError::WriterCreationFailed(msg) => {
                write!(f, "Could not create the writer: {}", msg)
            }
            RecorderError::VideoFormatUnavailable => {
                write!(f, "No video frame observed yet, video dimensions unknown")
            }
            RecorderError::VideoTrackAttachFailed(msg) => {
                write!(f, "Could not add the video track: {}", msg)
            }
            RecorderError::AudioFormatUnavailable => {
                write!(f, "No audio chunk observed yet, audio format unknown")
            }
            RecorderError::AudioSettingsRejected(msg) => {
                write!(f, "Could not apply audio output settings: {}", msg)
            }
            RecorderError::AudioTrackAttachFailed(msg) => {
                write!(f, "Could not add the audio track: {}", msg)
            }
            RecorderError::WriteSessionFailed(msg) => {
                write!(f, "Could not open the write session: {}", msg)
            }
            RecorderError::VideoWriteFailed(msg) => write!(f, "Could not write video data: {}", msg),
            RecorderError::AudioWriteFailed(msg) => write!(f, "Could not write audio data: {}", msg),
            RecorderError::WriteFailed(msg) => write!(f, "Could not finish writing: {}", msg),
        }
    }
}

impl fmt::Display for TranscodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscodeError::NoVideoTrack => write!(f, "Source file has no video track"),
            TranscodeError::SourceUnreadable(msg) => write!(f, "Cannot read source: {}", msg),
            TranscodeError::EncoderUnavailable(msg) => write!(f, "Encoder not available: {}", msg),
            TranscodeError::ExportFailed(msg) => write!(f, "Export failed: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for CaptureError {}
impl std::error::Error for RecorderError {}
impl std::error::Error for TranscodeError {}

impl From<CaptureError> for AppError {
    fn from(err: CaptureError) -> Self {
        AppError::Capture(err)
    }
}

impl From<RecorderError> for AppError {
    fn from(err: RecorderError) -> Self {
        AppError::Recording(err)
    }
}

impl From<TranscodeError> for AppError {
    fn from(err: TranscodeError) -> Self {
        AppError::Transcode(err)
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<std::io::Error> for TranscodeError {
    fn from(err: std::io::Error) -> Self {
        TranscodeError::ExportFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_error_names_the_preset() {
        let err = CaptureError::PresetNotSupported(QualityPreset::Uhd2160);
        assert!(err.to_string().contains("3840x2160"));
    }

    #[test]
    fn test_app_error_wraps_sub_errors() {
        let err: AppError = RecorderError::AudioFormatUnavailable.into();
        assert!(matches!(
            err,
            AppError::Recording(RecorderError::AudioFormatUnavailable)
        ));
        assert!(err.to_string().starts_with("Recording error:"));
    }

    #[test]
    fn test_io_error_maps_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: AppError = io.into();
        assert!(matches!(err, AppError::Storage(msg) if msg == "gone"));
    }
}
