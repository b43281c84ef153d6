//! Random-access reader for indexed and monolith files.

use crate::decoder::BlockDecoder;
use crate::error::{Error, Result};
use crate::header::{LacHeader, COMPRESSION_BLOCK_SIZE};
use crate::monolith::read_interleaved;
use sostenuto_core::{SampleBuffer, SampleFormat};
use std::io::{ErrorKind, Read, Seek, SeekFrom};

const UNKNOWN_POSITION: u64 = u64::MAX;

/// Reads arbitrary frame ranges from a codec file.
///
/// The reader remembers where the underlying stream is positioned and only
/// seeks when a read does not continue where the previous one stopped. The
/// most recently decoded block is cached, so reads that start mid-block after
/// a read that ended in the same block decode nothing.
pub struct LacReader<R: Read + Seek> {
    inner: R,
    header: LacHeader,
    file_len: u64,
    stream_pos: u64,
    decoder: BlockDecoder,
    scratch: Vec<u8>,
    block: Vec<Vec<i16>>,
    cached_block: Option<usize>,
}

impl<R: Read + Seek> LacReader<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let file_len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        let header = LacHeader::read_from(&mut inner)?;
        if header.uses_encryption {
            return Err(Error::EncryptionUnsupported);
        }
        let channels = header.num_channels as usize;
        Ok(Self {
            inner,
            stream_pos: header.header_size(),
            header,
            file_len,
            decoder: BlockDecoder::new(),
            scratch: Vec::new(),
            block: vec![Vec::with_capacity(COMPRESSION_BLOCK_SIZE); channels],
            cached_block: None,
        })
    }

    /// Overrides the sample rate. Monoliths do not store one.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.header.sample_rate = sample_rate;
        self
    }

    pub fn header(&self) -> &LacHeader {
        &self.header
    }

    pub fn num_channels(&self) -> usize {
        self.header.num_channels as usize
    }

    pub fn sample_rate(&self) -> u32 {
        self.header.sample_rate
    }

    pub fn is_monolith(&self) -> bool {
        self.header.is_monolith()
    }

    pub fn length_in_samples(&self) -> u64 {
        self.header.length_in_samples(self.file_len)
    }

    /// Reads `num` frames starting at frame `start` into `dest` at `dest_offset`.
    ///
    /// Frames beyond the end of the file are silence. On error the destination
    /// range is left zeroed.
    pub fn read(
        &mut self,
        dest: &mut SampleBuffer,
        dest_offset: usize,
        start: u64,
        num: usize,
    ) -> Result<()> {
        dest.clear_range(dest_offset, num);
        let end = (start + num as u64).min(self.length_in_samples());
        if start >= end {
            return Ok(());
        }

        let result = if self.header.is_monolith() {
            self.read_raw(dest, dest_offset, start, end)
        } else {
            self.read_blocks(dest, dest_offset, start, end)
        };
        if result.is_err() {
            dest.clear_range(dest_offset, num);
        }
        result
    }

    /// Absolute peak of a frame range, normalised to `[0, 1]`.
    pub fn read_max_level(&mut self, start: u64, num: u64) -> Result<f32> {
        let channels = self.num_channels();
        let mut chunk = SampleBuffer::new(SampleFormat::Fixed16, channels, COMPRESSION_BLOCK_SIZE)?;
        let end = (start + num).min(self.length_in_samples());
        let mut pos = start;
        let mut level = 0.0f32;
        while pos < end {
            let n = (end - pos).min(COMPRESSION_BLOCK_SIZE as u64) as usize;
            self.read(&mut chunk, 0, pos, n)?;
            level = level.max(chunk.peak(0, n));
            pos += n as u64;
        }
        Ok(level)
    }

    fn read_raw(
        &mut self,
        dest: &mut SampleBuffer,
        dest_offset: usize,
        start: u64,
        end: u64,
    ) -> Result<()> {
        let frame_bytes = self.num_channels() * 2;
        let wanted = (end - start) as usize * frame_bytes;
        self.seek_to(self.header.offset_for_read_position(start))?;
        let got = self.read_bytes(wanted)?;
        // short reads leave the tail zeroed
        read_interleaved(&self.scratch[..got], self.num_channels(), dest, dest_offset);
        Ok(())
    }

    fn read_blocks(
        &mut self,
        dest: &mut SampleBuffer,
        dest_offset: usize,
        start: u64,
        end: u64,
    ) -> Result<()> {
        let block_size = COMPRESSION_BLOCK_SIZE as u64;
        let channels = self.num_channels();
        let mut pos = start;
        let mut written = dest_offset;
        let mut next_offset = self.header.offset_for_read_position(start);

        while pos < end {
            let index = (pos / block_size) as usize;
            self.load_block(index, next_offset)?;

            let in_block = (pos % block_size) as usize;
            let n = (COMPRESSION_BLOCK_SIZE - in_block).min((end - pos) as usize);
            for c in 0..dest.num_channels() {
                let src = &self.block[c.min(channels - 1)][in_block..in_block + n];
                dest.write_fixed(c, written, src);
            }

            if pos + (n as u64) < end {
                next_offset = self.header.offset_for_next_block(pos);
            }
            pos += n as u64;
            written += n;
        }
        Ok(())
    }

    fn load_block(&mut self, index: usize, offset: u64) -> Result<()> {
        if self.cached_block == Some(index) {
            return Ok(());
        }
        if offset == 0 {
            return Err(Error::BlockIndexOutOfRange {
                index,
                amount: self.header.block_amount(),
            });
        }
        let record_end = if index + 1 < self.header.block_amount() {
            self.header.block_offset(index + 1)?
        } else {
            self.file_len
        };
        let len = record_end.saturating_sub(offset) as usize;

        self.cached_block = None;
        self.seek_to(offset)?;
        let got = self.read_bytes(len)?;
        self.decoder.decode_block(
            &self.scratch[..got],
            index,
            self.header.bit_shift,
            &mut self.block,
        )?;
        self.cached_block = Some(index);
        Ok(())
    }

    fn seek_to(&mut self, pos: u64) -> Result<()> {
        if self.stream_pos != pos {
            self.stream_pos = UNKNOWN_POSITION;
            self.inner.seek(SeekFrom::Start(pos))?;
            self.stream_pos = pos;
        }
        Ok(())
    }

    /// Fills `scratch` with up to `len` bytes, stopping early at end of file.
    fn read_bytes(&mut self, len: usize) -> Result<usize> {
        self.scratch.clear();
        self.scratch.resize(len, 0);
        let mut got = 0;
        while got < len {
            match self.inner.read(&mut self.scratch[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.stream_pos = UNKNOWN_POSITION;
                    return Err(e.into());
                }
            }
        }
        self.stream_pos += got as u64;
        Ok(got)
    }
}
