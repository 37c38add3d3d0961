// SPDX-License-Identifier: GPL-3.0-only

//! Minimal RIFF/WAVE writer for signed 16-bit PCM

use crate::backends::audio::AudioFormat;
use std::io::{self, Read, Seek, SeekFrom, Write};

const HEADER_LEN: u32 = 44;

/// Streams PCM data and patches the chunk sizes on finish
pub struct WavWriter<W: Write + Seek> {
    out: W,
    format: AudioFormat,
    data_len: u32,
}

impl<W: Write + Seek> WavWriter<W> {
    pub fn new(mut out: W, format: AudioFormat) -> io::Result<Self> {
        write_header(&mut out, format, 0)?;
        Ok(Self {
            out,
            format,
            data_len: 0,
        })
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Append interleaved little-endian S16 bytes
    pub fn write_samples(&mut self, bytes: &[u8]) -> io::Result<()> {
        let len = u32::try_from(bytes.len())
            .ok()
            .and_then(|len| self.data_len.checked_add(len))
            .filter(|total| *total <= u32::MAX - HEADER_LEN)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "WAV data exceeds 4 GiB"))?;
        self.out.write_all(bytes)?;
        self.data_len = len;
        Ok(())
    }

    /// Patch the header sizes and flush
    pub fn finish(mut self) -> io::Result<W> {
        self.out.seek(SeekFrom::Start(0))?;
        write_header(&mut self.out, self.format, self.data_len)?;
        self.out.seek(SeekFrom::End(0))?;
        self.out.flush()?;
        Ok(self.out)
    }
}

fn write_header<W: Write>(out: &mut W, format: AudioFormat, data_len: u32) -> io::Result<()> {
    let block_align = format.channels as u32 * 2;
    out.write_all(b"RIFF")?;
    out.write_all(&(HEADER_LEN - 8 + data_len).to_le_bytes())?;
    out.write_all(b"WAVE")?;
    out.write_all(b"fmt ")?;
    out.write_all(&16u32.to_le_bytes())?;
    out.write_all(&1u16.to_le_bytes())?;
    out.write_all(&format.channels.to_le_bytes())?;
    out.write_all(&format.sample_rate.to_le_bytes())?;
    out.write_all(&(format.sample_rate * block_align).to_le_bytes())?;
    out.write_all(&(block_align as u16).to_le_bytes())?;
    out.write_all(&16u16.to_le_bytes())?;
    out.write_all(b"data")?;
    out.write_all(&data_len.to_le_bytes())?;
    Ok(())
}

/// Format and sample-frame count of a file written by [`WavWriter`]
pub fn read_info<R: Read>(mut input: R) -> io::Result<(AudioFormat, u64)> {
    let mut header = [0u8; HEADER_LEN as usize];
    input.read_exact(&mut header)?;
    if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "not a WAV file"));
    }
    let le16 = |at: usize| u16::from_le_bytes([header[at], header[at + 1]]);
    let le32 = |at: usize| {
        u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]])
    };
    let format = AudioFormat::new(le32(24), le16(22));
    let frames = if format.channels == 0 {
        0
    } else {
        le32(40) as u64 / format.bytes_per_frame() as u64
    };
    Ok((format, frames))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_sizes_patched_on_finish() {
        let format = AudioFormat::new(48_000, 2);
        let mut writer = WavWriter::new(Cursor::new(Vec::new()), format).unwrap();
        writer.write_samples(&[0u8; 400]).unwrap();
        writer.write_samples(&[1u8; 400]).unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        assert_eq!(bytes.len(), 44 + 800);

        let (read_format, frames) = read_info(Cursor::new(bytes)).unwrap();
        assert_eq!(read_format, format);
        assert_eq!(frames, 200);
    }

    #[test]
    fn test_rejects_foreign_data() {
        assert!(read_info(Cursor::new(vec![0u8; 44])).is_err());
    }
}
