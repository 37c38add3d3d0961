// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for camera backends

#[cfg(feature = "gst")]
use gstreamer::buffer::{MappedBuffer, Readable};
use crate::pipelines::video::pool::PooledBuffer;
use image::RgbaImage;
use std::sync::Arc;
use std::time::Duration;

/// Which stream a device, input or error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

/// Presentation timestamp in nanoseconds on the capture clock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_nanos(nanos: u64) -> Self {
        Timestamp(nanos)
    }

    pub fn from_millis(millis: u64) -> Self {
        Timestamp(millis.saturating_mul(1_000_000))
    }

    pub fn from_duration(duration: Duration) -> Self {
        Timestamp(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
    }

    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    /// Time elapsed since `earlier`, zero if `earlier` is later than `self`
    pub fn saturating_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    /// `self - window`, clamped at zero
    pub fn saturating_sub(&self, window: Duration) -> Timestamp {
        Timestamp(self.0.saturating_sub(Timestamp::from_duration(window).0))
    }

    pub fn saturating_add(&self, delta: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(Timestamp::from_duration(delta).0))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

/// Pixel dimensions of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Dimensions after a quarter turn
    pub fn swapped(&self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }

    /// Size of an RGBA buffer with these dimensions
    pub fn rgba_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Framerate as a fraction (numerator/denominator)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Framerate {
    pub num: u32,
    pub denom: u32,
}

impl Framerate {
    pub fn new(num: u32, denom: u32) -> Self {
        Self {
            num,
            denom: if denom == 0 { 1 } else { denom },
        }
    }

    pub fn from_int(fps: u32) -> Self {
        Self::new(fps, 1)
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.denom as f64
    }

    /// Duration of one frame, `None` for a zero rate
    pub fn frame_interval(&self) -> Option<Duration> {
        if self.num == 0 {
            return None;
        }
        Some(Duration::from_nanos(
            1_000_000_000u64 * self.denom as u64 / self.num as u64,
        ))
    }
}

impl std::fmt::Display for Framerate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.denom != 1 {
            write!(f, "{:.2}", self.as_f64())
        } else {
            write!(f, "{}", self.num)
        }
    }
}

impl Default for Framerate {
    fn default() -> Self {
        Self { num: 30, denom: 1 }
    }
}

/// Point in normalized device coordinates, (0,0) top-left to (1,1) bottom-right
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedPoint {
    pub x: f32,
    pub y: f32,
}

impl NormalizedPoint {
    /// Clamp both coordinates into the unit square
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x: if x.is_finite() { x.clamp(0.0, 1.0) } else { 0.5 },
            y: if y.is_finite() { y.clamp(0.0, 1.0) } else { 0.5 },
        }
    }
}

/// Requested torch state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TorchMode {
    Off,
    /// On at a level in (0, 1]
    On(f32),
}

/// Frame pixel storage
///
/// Pixels are always tightly packed RGBA8. Cloning a frame never copies the
/// pixel data.
#[derive(Clone)]
pub enum FrameData {
    /// Pre-copied bytes (device sources, filter output, tests)
    Copied(Arc<[u8]>),
    /// Buffer checked out of a recording's render pool; returns on drop
    Pooled(Arc<PooledBuffer>),
    /// Zero-copy mapped GStreamer buffer
    #[cfg(feature = "gst")]
    Mapped(Arc<MappedBuffer<Readable>>),
}

impl FrameData {
    #[cfg(feature = "gst")]
    pub fn from_mapped_buffer(buffer: MappedBuffer<Readable>) -> Self {
        FrameData::Mapped(Arc::new(buffer))
    }

    pub fn len(&self) -> usize {
        self.as_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self, FrameData::Pooled(_))
    }
}

impl std::fmt::Debug for FrameData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameData::Copied(data) => write!(f, "FrameData::Copied({} bytes)", data.len()),
            FrameData::Pooled(buf) => {
                write!(f, "FrameData::Pooled({:?}, {} bytes)", buf.handle(), buf.len())
            }
            #[cfg(feature = "gst")]
            FrameData::Mapped(buf) => write!(f, "FrameData::Mapped({} bytes)", buf.len()),
        }
    }
}

impl AsRef<[u8]> for FrameData {
    fn as_ref(&self) -> &[u8] {
        match self {
            FrameData::Copied(data) => data.as_ref(),
            FrameData::Pooled(buf) => buf.as_slice(),
            #[cfg(feature = "gst")]
            FrameData::Mapped(buf) => buf.as_slice(),
        }
    }
}

impl std::ops::Deref for FrameData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_ref()
    }
}

/// One video frame: RGBA pixels, dimensions and presentation timestamp
#[derive(Debug, Clone)]
pub struct Frame {
    dimensions: Dimensions,
    data: FrameData,
    timestamp: Timestamp,
}

impl Frame {
    /// Wrap existing pixel storage. Fails when the byte count does not match.
    pub fn new(
        dimensions: Dimensions,
        data: FrameData,
        timestamp: Timestamp,
    ) -> Result<Self, String> {
        if data.len() != dimensions.rgba_len() {
            return Err(format!(
                "frame {} needs {} bytes, got {}",
                dimensions,
                dimensions.rgba_len(),
                data.len()
            ));
        }
        Ok(Self {
            dimensions,
            data,
            timestamp,
        })
    }

    pub fn from_image(image: RgbaImage, timestamp: Timestamp) -> Self {
        let dimensions = Dimensions::new(image.width(), image.height());
        Self {
            dimensions,
            data: FrameData::Copied(Arc::from(image.into_raw())),
            timestamp,
        }
    }

    pub fn from_pooled(buffer: PooledBuffer, timestamp: Timestamp) -> Self {
        Self {
            dimensions: buffer.dimensions(),
            data: FrameData::Pooled(Arc::new(buffer)),
            timestamp,
        }
    }

    /// Solid-colour frame
    pub fn filled(dimensions: Dimensions, rgba: [u8; 4], timestamp: Timestamp) -> Self {
        let image = RgbaImage::from_pixel(dimensions.width, dimensions.height, image::Rgba(rgba));
        Self::from_image(image, timestamp)
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn width(&self) -> u32 {
        self.dimensions.width
    }

    pub fn height(&self) -> u32 {
        self.dimensions.height
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn data(&self) -> &FrameData {
        &self.data
    }

    pub fn pixels(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// Copy the pixels into an owned image for filtering
    pub fn to_image(&self) -> RgbaImage {
        // The constructor guarantees the length, so this never falls back.
        RgbaImage::from_raw(self.width(), self.height(), self.pixels().to_vec())
            .unwrap_or_else(|| RgbaImage::new(self.width(), self.height()))
    }

    /// RGBA value at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let offset = (y as usize * self.width() as usize + x as usize) * 4;
        let p = &self.pixels()[offset..offset + 4];
        Some([p[0], p[1], p[2], p[3]])
    }
}
