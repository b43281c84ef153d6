//! Streaming file writer.

use crate::encoder::{BlockEncoder, CompressorOptions};
use crate::error::{Error, Result};
use crate::header::{monolith_flag, LacHeader, COMPRESSION_BLOCK_SIZE};
use sostenuto_core::{float_to_fixed, SampleBuffer};
use std::io::Write;

/// Accepts frames in arbitrary chunk sizes and writes a complete file on
/// [`finish`](Self::finish).
///
/// Compressed output is staged in memory because the block index precedes
/// the block records in the file.
pub struct LacWriter<W: Write> {
    inner: W,
    options: CompressorOptions,
    num_channels: usize,
    sample_rate: u32,
    staging: Vec<Vec<i16>>,
    encoder: BlockEncoder,
    data: Vec<u8>,
    block_offsets: Vec<u32>,
    frames_written: u64,
}

impl<W: Write> LacWriter<W> {
    pub fn new(
        inner: W,
        num_channels: usize,
        sample_rate: u32,
        options: CompressorOptions,
    ) -> Result<Self> {
        if num_channels == 0 || num_channels > 2 {
            return Err(Error::UnsupportedChannelCount(num_channels));
        }
        Ok(Self {
            inner,
            options,
            num_channels,
            sample_rate,
            staging: vec![Vec::with_capacity(COMPRESSION_BLOCK_SIZE); num_channels],
            encoder: BlockEncoder::new(),
            data: Vec::new(),
            block_offsets: Vec::new(),
            frames_written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Appends planar 16-bit frames. All channel slices must have equal length.
    pub fn write_fixed(&mut self, channels: &[&[i16]]) -> Result<()> {
        self.check_layout(channels.iter().map(|c| c.len()))?;
        let frames = channels[0].len();

        if !self.options.use_compression {
            self.data.reserve(frames * self.num_channels * 2);
            for i in 0..frames {
                for channel in channels {
                    self.data.extend_from_slice(&channel[i].to_le_bytes());
                }
            }
            self.frames_written += frames as u64;
            return Ok(());
        }

        let mut pos = 0;
        while pos < frames {
            let space = COMPRESSION_BLOCK_SIZE - self.staging[0].len();
            let n = space.min(frames - pos);
            for (staged, channel) in self.staging.iter_mut().zip(channels) {
                staged.extend_from_slice(&channel[pos..pos + n]);
            }
            pos += n;
            if self.staging[0].len() == COMPRESSION_BLOCK_SIZE {
                self.flush_block()?;
            }
        }
        self.frames_written += frames as u64;
        Ok(())
    }

    /// Appends planar float frames, quantised to 16 bit.
    pub fn write_float(&mut self, channels: &[&[f32]]) -> Result<()> {
        self.check_layout(channels.iter().map(|c| c.len()))?;
        let fixed: Vec<Vec<i16>> = channels
            .iter()
            .map(|c| c.iter().map(|s| float_to_fixed(*s)).collect())
            .collect();
        let refs: Vec<&[i16]> = fixed.iter().map(Vec::as_slice).collect();
        self.write_fixed(&refs)
    }

    /// Appends `num` frames of `buffer` starting at `start`.
    pub fn write_buffer(&mut self, buffer: &SampleBuffer, start: usize, num: usize) -> Result<()> {
        let end = start.saturating_add(num).min(buffer.num_samples());
        let start = start.min(end);
        let channels: Vec<Vec<i16>> = (0..self.num_channels)
            .map(|c| {
                (start..end)
                    .map(|i| float_to_fixed(buffer.sample(c, i)))
                    .collect()
            })
            .collect();
        let refs: Vec<&[i16]> = channels.iter().map(Vec::as_slice).collect();
        self.write_fixed(&refs)
    }

    /// Pads the trailing block with silence and writes header and data.
    pub fn finish(mut self) -> Result<LacHeader> {
        let channels = self.num_channels as u8;
        let header = if self.options.use_compression {
            if !self.staging[0].is_empty() {
                for staged in &mut self.staging {
                    staged.resize(COMPRESSION_BLOCK_SIZE, 0);
                }
                self.flush_block()?;
            }
            LacHeader::indexed(channels, self.sample_rate, std::mem::take(&mut self.block_offsets))
        } else {
            monolith_flag(channels)?;
            LacHeader::monolith(channels, self.sample_rate)
        };

        header.write_to(&mut self.inner)?;
        self.inner.write_all(&self.data)?;
        self.inner.flush()?;
        tracing::debug!(
            "wrote {} frames ({} blocks, {} bytes)",
            self.frames_written,
            header.block_amount(),
            self.data.len()
        );
        Ok(header)
    }

    fn check_layout(&self, mut lengths: impl ExactSizeIterator<Item = usize>) -> Result<()> {
        if lengths.len() != self.num_channels {
            return Err(Error::UnsupportedChannelCount(lengths.len()));
        }
        let first = lengths.next().unwrap_or(0);
        if lengths.any(|l| l != first) {
            return Err(Error::InvalidHeader("channel lengths differ".into()));
        }
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        let offset = u32::try_from(self.data.len()).map_err(|_| Error::FileTooLarge)?;
        self.block_offsets.push(offset);
        let refs: Vec<&[i16]> = self.staging.iter().map(Vec::as_slice).collect();
        self.encoder.encode_block(&refs, &mut self.data)?;
        for staged in &mut self.staging {
            staged.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_block_is_padded() {
        let mut out = Vec::new();
        let mut writer = LacWriter::new(&mut out, 1, 44100, CompressorOptions::diff()).unwrap();
        writer.write_fixed(&[&[1, 2, 3]]).unwrap();
        let header = writer.finish().unwrap();
        assert_eq!(header.block_amount(), 1);
        assert_eq!(header.length_in_samples(0), COMPRESSION_BLOCK_SIZE as u64);
    }

    #[test]
    fn test_chunked_writes_share_blocks() {
        let mut out = Vec::new();
        let mut writer = LacWriter::new(&mut out, 2, 48000, CompressorOptions::diff()).unwrap();
        let chunk = vec![100i16; 1000];
        for _ in 0..9 {
            writer.write_fixed(&[&chunk, &chunk]).unwrap();
        }
        assert_eq!(writer.frames_written(), 9000);
        let header = writer.finish().unwrap();
        assert_eq!(header.block_amount(), 3);
        assert!(header.block_offsets.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_uncompressed_writes_monolith() {
        let mut out = Vec::new();
        let mut writer =
            LacWriter::new(&mut out, 2, 44100, CompressorOptions::uncompressed()).unwrap();
        writer.write_fixed(&[&[1, 3], &[2, 4]]).unwrap();
        let header = writer.finish().unwrap();
        assert!(header.is_monolith());
        assert_eq!(out, vec![0, 1, 0, 2, 0, 3, 0, 4, 0]);
    }

    #[test]
    fn test_mismatched_channels_rejected() {
        let mut writer =
            LacWriter::new(Vec::new(), 2, 44100, CompressorOptions::diff()).unwrap();
        assert!(writer.write_fixed(&[&[1, 2]]).is_err());
        assert!(writer.write_fixed(&[&[1, 2], &[1]]).is_err());
    }
}
