// SPDX-License-Identifier: GPL-3.0-only

//! Post-record transcode: rotate 90° clockwise into a new file
//!
//! Camera sensors deliver landscape frames. After a take is finalized the
//! temporary recording is rotated into portrait orientation, with width
//! and height swapped, and written to a fresh file. The step is
//! independent of the live pipeline; a failure leaves the source intact.

#[cfg(feature = "gst")]
pub mod gst;
pub mod software;

use crate::errors::TranscodeError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub use software::Y4mTranscoder;

/// Rotating re-encoder
pub trait Transcoder: Send + Sync {
    /// Extension of the files this transcoder writes
    fn extension(&self) -> &'static str;

    /// Rotate `source` into `destination`. Blocking.
    fn transcode(&self, source: &Path, destination: &Path) -> Result<PathBuf, TranscodeError>;

    /// Every file an output at `path` consists of
    fn artifacts(&self, path: &Path) -> Vec<PathBuf> {
        vec![path.to_path_buf()]
    }
}

/// Fresh uniquely named output path in `dir`
pub fn unique_output_path(dir: &Path, extension: &str) -> PathBuf {
    dir.join(format!("{}.{}", uuid::Uuid::new_v4(), extension))
}

/// Move a set of sibling files to `destination`, keeping each file's extension
///
/// `artifacts[0]` is the primary file and must exist; the others are moved
/// when present. Falls back to copy + delete across filesystems. Returns
/// the new primary path.
pub fn relocate(artifacts: &[PathBuf], destination: &Path) -> std::io::Result<PathBuf> {
    let Some(primary) = artifacts.first() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "nothing to relocate",
        ));
    };
    if !primary.is_file() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", primary.display()),
        ));
    }
    let mut moved_primary = destination.to_path_buf();
    for (index, artifact) in artifacts.iter().enumerate() {
        if index > 0 && !artifact.exists() {
            continue;
        }
        let target = match artifact.extension() {
            Some(ext) if index > 0 => destination.with_extension(ext),
            _ => destination.to_path_buf(),
        };
        if std::fs::rename(artifact, &target).is_err() {
            std::fs::copy(artifact, &target)?;
            std::fs::remove_file(artifact)?;
        }
        debug!(from = %artifact.display(), to = %target.display(), "Relocated file");
        if index == 0 {
            moved_primary = target;
        }
    }
    Ok(moved_primary)
}

/// Transcoder matching [`default_writer_factory`](crate::pipelines::video::default_writer_factory)
pub fn default_transcoder() -> Arc<dyn Transcoder> {
    #[cfg(feature = "gst")]
    {
        Arc::new(gst::GstTranscoder)
    }
    #[cfg(not(feature = "gst"))]
    {
        Arc::new(Y4mTranscoder)
    }
}
