// SPDX-License-Identifier: GPL-3.0-only

//! Y4M rotation without external encoders

use super::Transcoder;
use crate::errors::TranscodeError;
use crate::media::y4m::{self, Y4mHeader, Y4mReader};
use crate::pipelines::video::software::sidecar_path;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Rotates the frames of a Y4M file and copies its WAV sidecar
#[derive(Debug, Default, Clone, Copy)]
pub struct Y4mTranscoder;

impl Y4mTranscoder {
    fn rotate(&self, source: &Path, destination: &Path) -> Result<u64, TranscodeError> {
        let file = File::open(source)
            .map_err(|e| TranscodeError::SourceUnreadable(format!("{}: {}", source.display(), e)))?;
        let mut reader = Y4mReader::new(BufReader::new(file)).map_err(|e| {
            debug!(error = %e, "Source is not a Y4M stream");
            TranscodeError::NoVideoTrack
        })?;
        let header = reader.header();
        let rotated = Y4mHeader::new(header.dimensions.swapped(), header.frame_rate);

        let out = File::create(destination)?;
        let mut writer = y4m::Y4mWriter::new(BufWriter::new(out), rotated)?;
        let mut planes = Vec::with_capacity(header.frame_len());
        while reader
            .next_frame(&mut planes)
            .map_err(TranscodeError::SourceUnreadable)?
        {
            writer.write_frame(&y4m::rotate_i420_clockwise(&planes, header.dimensions))?;
        }
        writer.flush()?;
        Ok(writer.frames_written())
    }
}

impl Transcoder for Y4mTranscoder {
    fn extension(&self) -> &'static str {
        "y4m"
    }

    fn transcode(&self, source: &Path, destination: &Path) -> Result<PathBuf, TranscodeError> {
        info!(source = %source.display(), destination = %destination.display(), "Rotating recording");
        let frames = match self.rotate(source, destination) {
            Ok(frames) => frames,
            Err(e) => {
                let _ = std::fs::remove_file(destination);
                return Err(e);
            }
        };

        let audio = sidecar_path(source);
        if audio.exists() {
            if let Err(e) = std::fs::copy(&audio, sidecar_path(destination)) {
                warn!(error = %e, "Failed to copy audio sidecar");
                let _ = std::fs::remove_file(destination);
                return Err(TranscodeError::ExportFailed(format!("audio copy: {}", e)));
            }
        }
        info!(frames, "Rotation complete");
        Ok(destination.to_path_buf())
    }

    fn artifacts(&self, path: &Path) -> Vec<PathBuf> {
        vec![path.to_path_buf(), sidecar_path(path)]
    }
}
