// SPDX-License-Identifier: GPL-3.0-only

//! YUV4MPEG2 container and I420 plane helpers
//!
//! Files are written as `C420jpeg` (full-range BT.601, 4:2:0) with a
//! constant frame rate. Every frame is a bare `FRAME` marker followed by
//! the Y, U and V planes.

use crate::backends::camera::types::{Dimensions, Framerate};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;
use std::time::Duration;

const MAGIC: &str = "YUV4MPEG2";
const FRAME_MARKER: &[u8] = b"FRAME";

/// Stream header: picture size and frame rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Y4mHeader {
    pub dimensions: Dimensions,
    pub frame_rate: Framerate,
}

impl Y4mHeader {
    pub fn new(dimensions: Dimensions, frame_rate: Framerate) -> Self {
        Self {
            dimensions,
            frame_rate,
        }
    }

    /// Bytes of one I420 frame
    pub fn frame_len(&self) -> usize {
        i420_len(self.dimensions)
    }

    fn to_line(self) -> String {
        format!(
            "{} W{} H{} F{}:{} Ip A1:1 C420jpeg\n",
            MAGIC,
            self.dimensions.width,
            self.dimensions.height,
            self.frame_rate.num,
            self.frame_rate.denom
        )
    }

    fn parse(line: &str) -> Result<Self, String> {
        let mut tokens = line.split_ascii_whitespace();
        if tokens.next() != Some(MAGIC) {
            return Err("not a YUV4MPEG2 stream".to_string());
        }
        let mut width = None;
        let mut height = None;
        let mut frame_rate = Framerate::default();
        for token in tokens {
            let Some((tag, value)) = token.split_at_checked(1) else {
                continue;
            };
            match tag {
                "W" => width = value.parse::<u32>().ok(),
                "H" => height = value.parse::<u32>().ok(),
                "F" => {
                    let (num, denom) = value
                        .split_once(':')
                        .ok_or_else(|| format!("bad frame rate '{}'", value))?;
                    frame_rate = Framerate::new(
                        num.parse().map_err(|_| format!("bad frame rate '{}'", value))?,
                        denom.parse().map_err(|_| format!("bad frame rate '{}'", value))?,
                    );
                }
                "C" if !value.starts_with("420") => {
                    return Err(format!("unsupported colour space C{}", value));
                }
                _ => {}
            }
        }
        match (width, height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => {
                Ok(Self::new(Dimensions::new(w, h), frame_rate))
            }
            _ => Err("stream header has no picture size".to_string()),
        }
    }
}

/// Writes frames after the stream header
pub struct Y4mWriter<W: Write> {
    out: W,
    header: Y4mHeader,
    frames_written: u64,
}

impl<W: Write> Y4mWriter<W> {
    pub fn new(mut out: W, header: Y4mHeader) -> io::Result<Self> {
        out.write_all(header.to_line().as_bytes())?;
        Ok(Self {
            out,
            header,
            frames_written: 0,
        })
    }

    pub fn header(&self) -> Y4mHeader {
        self.header
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Write one I420 frame
    pub fn write_frame(&mut self, planes: &[u8]) -> io::Result<()> {
        if planes.len() != self.header.frame_len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "frame has {} bytes, stream expects {}",
                    planes.len(),
                    self.header.frame_len()
                ),
            ));
        }
        self.out.write_all(FRAME_MARKER)?;
        self.out.write_all(b"\n")?;
        self.out.write_all(planes)?;
        self.frames_written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Sequential frame reader
pub struct Y4mReader<R: BufRead> {
    input: R,
    header: Y4mHeader,
}

impl Y4mReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, String> {
        let file = File::open(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        Self::new(BufReader::new(file))
    }
}

impl<R: BufRead> Y4mReader<R> {
    pub fn new(mut input: R) -> Result<Self, String> {
        let mut line = Vec::new();
        input
            .read_until(b'\n', &mut line)
            .map_err(|e| e.to_string())?;
        let line = String::from_utf8_lossy(&line);
        let header = Y4mHeader::parse(line.trim_end())?;
        Ok(Self { input, header })
    }

    pub fn header(&self) -> Y4mHeader {
        self.header
    }

    /// Read the next frame into `planes`; `Ok(false)` at end of stream
    pub fn next_frame(&mut self, planes: &mut Vec<u8>) -> Result<bool, String> {
        let mut marker = Vec::new();
        let read = self
            .input
            .read_until(b'\n', &mut marker)
            .map_err(|e| e.to_string())?;
        if read == 0 {
            return Ok(false);
        }
        if !marker.starts_with(FRAME_MARKER) {
            return Err("missing FRAME marker".to_string());
        }
        planes.resize(self.header.frame_len(), 0);
        self.input
            .read_exact(planes)
            .map_err(|e| format!("truncated frame: {}", e))?;
        Ok(true)
    }
}

/// Summary of a Y4M file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Y4mInfo {
    pub header: Y4mHeader,
    pub frame_count: u64,
}

impl Y4mInfo {
    pub fn duration(&self) -> Duration {
        self.header
            .frame_rate
            .frame_interval()
            .map(|interval| interval * self.frame_count as u32)
            .unwrap_or_default()
    }
}

/// Read the header and count the frames of a file
pub fn probe(path: &Path) -> Result<Y4mInfo, String> {
    let mut reader = Y4mReader::open(path)?;
    let mut planes = Vec::new();
    let mut frame_count = 0;
    while reader.next_frame(&mut planes)? {
        frame_count += 1;
    }
    Ok(Y4mInfo {
        header: reader.header(),
        frame_count,
    })
}

fn chroma_dimensions(dimensions: Dimensions) -> Dimensions {
    Dimensions::new(dimensions.width.div_ceil(2), dimensions.height.div_ceil(2))
}

/// Size of an I420 buffer
pub fn i420_len(dimensions: Dimensions) -> usize {
    let chroma = chroma_dimensions(dimensions);
    dimensions.width as usize * dimensions.height as usize
        + 2 * chroma.width as usize * chroma.height as usize
}

/// Convert tightly packed RGBA to full-range BT.601 I420
///
/// Chroma is the average of each 2x2 block.
pub fn rgba_to_i420(rgba: &[u8], dimensions: Dimensions) -> Vec<u8> {
    let width = dimensions.width as usize;
    let height = dimensions.height as usize;
    let chroma = chroma_dimensions(dimensions);
    let (cw, ch) = (chroma.width as usize, chroma.height as usize);
    let y_size = width * height;

    let mut out = vec![0u8; i420_len(dimensions)];
    let (y_plane, uv) = out.split_at_mut(y_size);
    let (u_plane, v_plane) = uv.split_at_mut(cw * ch);

    let rgb = |x: usize, y: usize| -> (f32, f32, f32) {
        let i = (y * width + x) * 4;
        (rgba[i] as f32, rgba[i + 1] as f32, rgba[i + 2] as f32)
    };

    for y in 0..height {
        for x in 0..width {
            let (r, g, b) = rgb(x, y);
            y_plane[y * width + x] = clamp_byte(0.299 * r + 0.587 * g + 0.114 * b);
        }
    }

    for cy in 0..ch {
        for cx in 0..cw {
            let (mut r, mut g, mut b, mut n) = (0.0, 0.0, 0.0, 0.0);
            for y in (cy * 2)..((cy * 2 + 2).min(height)) {
                for x in (cx * 2)..((cx * 2 + 2).min(width)) {
                    let (pr, pg, pb) = rgb(x, y);
                    r += pr;
                    g += pg;
                    b += pb;
                    n += 1.0;
                }
            }
            let (r, g, b) = (r / n, g / n, b / n);
            u_plane[cy * cw + cx] = clamp_byte(-0.169 * r - 0.331 * g + 0.500 * b + 128.0);
            v_plane[cy * cw + cx] = clamp_byte(0.500 * r - 0.419 * g - 0.081 * b + 128.0);
        }
    }

    out
}

/// Rotate an I420 frame a quarter turn clockwise
///
/// The returned frame has swapped dimensions.
pub fn rotate_i420_clockwise(planes: &[u8], dimensions: Dimensions) -> Vec<u8> {
    let chroma = chroma_dimensions(dimensions);
    let y_size = dimensions.width as usize * dimensions.height as usize;
    let c_size = chroma.width as usize * chroma.height as usize;

    let mut out = Vec::with_capacity(planes.len());
    rotate_plane(&planes[..y_size], dimensions, &mut out);
    rotate_plane(&planes[y_size..y_size + c_size], chroma, &mut out);
    rotate_plane(&planes[y_size + c_size..y_size + 2 * c_size], chroma, &mut out);
    out
}

fn rotate_plane(src: &[u8], dimensions: Dimensions, out: &mut Vec<u8>) {
    let (w, h) = (dimensions.width as usize, dimensions.height as usize);
    // Destination is h wide and w tall: dst(x, y) = src(y, h - 1 - x)
    for y in 0..w {
        for x in 0..h {
            out.push(src[(h - 1 - x) * w + y]);
        }
    }
}

#[inline]
fn clamp_byte(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_round_trip() {
        let header = Y4mHeader::new(Dimensions::new(640, 480), Framerate::new(30000, 1001));
        let parsed = Y4mHeader::parse(header.to_line().trim_end()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_header_rejects_other_streams() {
        assert!(Y4mHeader::parse("RIFF....WAVE").is_err());
        assert!(Y4mHeader::parse("YUV4MPEG2 F30:1").is_err());
        assert!(Y4mHeader::parse("YUV4MPEG2 W2 H2 C444").is_err());
    }

    #[test]
    fn test_write_then_read_frames() {
        let dims = Dimensions::new(4, 2);
        let header = Y4mHeader::new(dims, Framerate::from_int(10));
        let mut writer = Y4mWriter::new(Vec::new(), header).unwrap();
        let frame = vec![7u8; header.frame_len()];
        writer.write_frame(&frame).unwrap();
        writer.write_frame(&frame).unwrap();
        assert!(writer.write_frame(&[1, 2, 3]).is_err());
        let bytes = writer.into_inner();

        let mut reader = Y4mReader::new(Cursor::new(bytes)).unwrap();
        let mut planes = Vec::new();
        let mut count = 0;
        while reader.next_frame(&mut planes).unwrap() {
            assert_eq!(planes, frame);
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn test_rgba_to_i420_primaries() {
        let dims = Dimensions::new(2, 2);
        let white = [255u8; 16];
        let planes = rgba_to_i420(&white, dims);
        assert_eq!(planes.len(), 6);
        assert_eq!(&planes[..4], &[255, 255, 255, 255]);
        assert_eq!(planes[4], 128);
        assert_eq!(planes[5], 128);

        let red: Vec<u8> = [255, 0, 0, 255].repeat(4);
        let planes = rgba_to_i420(&red, dims);
        assert_eq!(planes[0], 76);
        assert!(planes[5] > 200);
    }

    #[test]
    fn test_odd_dimensions_round_chroma_up() {
        assert_eq!(i420_len(Dimensions::new(3, 3)), 9 + 2 * 4);
        let planes = rgba_to_i420(&[0u8; 36], Dimensions::new(3, 3));
        assert_eq!(planes.len(), 17);
    }

    #[test]
    fn test_rotate_clockwise() {
        // 3x2 luma:      rotated 2x3:
        //  1 2 3          4 1
        //  4 5 6          5 2
        //                 6 3
        let dims = Dimensions::new(3, 2);
        let mut planes = vec![1, 2, 3, 4, 5, 6];
        planes.extend([10, 20, 30, 40]);
        let rotated = rotate_i420_clockwise(&planes, dims);
        assert_eq!(&rotated[..6], &[4, 1, 5, 2, 6, 3]);
        // 2x1 chroma planes become 1x2
        assert_eq!(&rotated[6..], &[10, 20, 30, 40]);
    }

    #[test]
    fn test_info_duration() {
        let info = Y4mInfo {
            header: Y4mHeader::new(Dimensions::new(2, 2), Framerate::from_int(30)),
            frame_count: 90,
        };
        assert!((info.duration().as_secs_f64() - 3.0).abs() < 0.001);
    }
}
