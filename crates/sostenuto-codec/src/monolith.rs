//! Monolith containers: many samples concatenated as raw 16-bit PCM.

use crate::error::{Error, Result};
use crate::header::monolith_flag;
use serde::{Deserialize, Serialize};
use sostenuto_core::SampleBuffer;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// One sample inside a monolith, in frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonolithEntry {
    pub name: String,
    pub offset: u64,
    pub length: u64,
}

/// Table of contents of a monolith file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonolithInfo {
    pub path: Option<PathBuf>,
    pub num_channels: u8,
    pub sample_rate: u32,
    pub entries: Vec<MonolithEntry>,
}

impl MonolithInfo {
    pub fn entry(&self, index: usize) -> Option<&MonolithEntry> {
        self.entries.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }
}

/// Writes a monolith one sample at a time.
pub struct MonolithWriter<W: Write> {
    inner: W,
    path: Option<PathBuf>,
    num_channels: u8,
    sample_rate: u32,
    entries: Vec<MonolithEntry>,
    position: u64,
}

impl MonolithWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>, num_channels: u8, sample_rate: u32) -> Result<Self> {
        let path = path.as_ref();
        let file = BufWriter::new(File::create(path)?);
        let mut writer = Self::new(file, num_channels, sample_rate)?;
        writer.path = Some(path.to_path_buf());
        Ok(writer)
    }
}

impl<W: Write> MonolithWriter<W> {
    pub fn new(mut inner: W, num_channels: u8, sample_rate: u32) -> Result<Self> {
        inner.write_all(&[monolith_flag(num_channels)?])?;
        Ok(Self {
            inner,
            path: None,
            num_channels,
            sample_rate,
            entries: Vec::new(),
            position: 0,
        })
    }

    /// Appends a sample and returns its entry index.
    pub fn add_sample(&mut self, name: impl Into<String>, channels: &[&[i16]]) -> Result<usize> {
        if channels.len() != self.num_channels as usize {
            return Err(Error::UnsupportedChannelCount(channels.len()));
        }
        let length = channels[0].len();
        if channels.iter().any(|c| c.len() != length) {
            return Err(Error::InvalidHeader("channel lengths differ".into()));
        }

        let mut frame = Vec::with_capacity(length * channels.len() * 2);
        for i in 0..length {
            for channel in channels {
                frame.extend_from_slice(&channel[i].to_le_bytes());
            }
        }
        self.inner.write_all(&frame)?;

        self.entries.push(MonolithEntry {
            name: name.into(),
            offset: self.position,
            length: length as u64,
        });
        self.position += length as u64;
        Ok(self.entries.len() - 1)
    }

    pub fn finish(mut self) -> Result<MonolithInfo> {
        self.inner.flush()?;
        Ok(MonolithInfo {
            path: self.path,
            num_channels: self.num_channels,
            sample_rate: self.sample_rate,
            entries: self.entries,
        })
    }
}

/// Decodes interleaved little-endian 16-bit frames from `bytes` into `dest`.
///
/// Returns the number of whole frames decoded. A trailing partial frame is ignored.
pub fn read_interleaved(
    bytes: &[u8],
    num_channels: usize,
    dest: &mut SampleBuffer,
    dest_offset: usize,
) -> usize {
    let frame_bytes = num_channels * 2;
    let frames = (bytes.len() / frame_bytes).min(dest.num_samples().saturating_sub(dest_offset));
    let mut chunk = [0i16; 256];
    for c in 0..dest.num_channels() {
        let src_channel = c.min(num_channels - 1);
        let mut i = 0;
        while i < frames {
            let n = chunk.len().min(frames - i);
            for (k, s) in chunk[..n].iter_mut().enumerate() {
                let at = (i + k) * frame_bytes + src_channel * 2;
                *s = i16::from_le_bytes([bytes[at], bytes[at + 1]]);
            }
            dest.write_fixed(c, dest_offset + i, &chunk[..n]);
            i += n;
        }
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use sostenuto_core::SampleFormat;
    use tempfile::TempDir;

    #[test]
    fn test_entries_are_contiguous() {
        let mut out = Vec::new();
        let mut writer = MonolithWriter::new(&mut out, 1, 48000).unwrap();
        assert_eq!(writer.add_sample("a", &[&[1, 2, 3]]).unwrap(), 0);
        assert_eq!(writer.add_sample("b", &[&[4, 5]]).unwrap(), 1);
        let info = writer.finish().unwrap();

        assert_eq!(info.entry(1).unwrap().offset, 3);
        assert_eq!(info.index_of("b"), Some(1));
        assert_eq!(out.len(), 1 + 5 * 2);
        assert_eq!(out[0], 1);
    }

    #[test]
    fn test_read_interleaved_stereo() {
        let bytes = [1u8, 0, 2, 0, 3, 0, 4, 0, 9];
        let mut dest = SampleBuffer::new(SampleFormat::Fixed16, 2, 4).unwrap();
        assert_eq!(read_interleaved(&bytes, 2, &mut dest, 1), 2);
        assert_eq!(dest.channel_fixed(0).unwrap(), &[0, 1, 3, 0]);
        assert_eq!(dest.channel_fixed(1).unwrap(), &[0, 2, 4, 0]);
    }

    #[test]
    fn test_create_records_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("library.mono");
        let mut writer = MonolithWriter::create(&path, 2, 44100).unwrap();
        writer.add_sample("kick", &[&[1; 100], &[2; 100]]).unwrap();
        let info = writer.finish().unwrap();

        assert_eq!(info.path.as_deref(), Some(path.as_path()));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 1 + 100 * 2 * 2);
    }
}
