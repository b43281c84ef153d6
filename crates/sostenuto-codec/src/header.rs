//! File header and block index.
//!
//! Indexed layout (version >= 2), all integers little endian:
//!
//! | bytes | content |
//! |---|---|
//! | 0 | `version << 4 \| encrypted << 3 \| compressed << 2 \| mono` |
//! | 1 | bits per sample |
//! | 2..6 | sample rate |
//! | 6 | bit shift applied on decode |
//! | 7 | reserved |
//! | 8..12 | block amount `n` |
//! | 12..12+4n | block offsets, relative to the end of the header |
//!
//! A monolith header is the single byte `0` (stereo) or `1` (mono).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Frames per compressed block.
pub const COMPRESSION_BLOCK_SIZE: usize = 4096;

/// Version written by [`LacWriter`](crate::LacWriter).
pub const CURRENT_VERSION: u8 = 2;

/// Monoliths do not store a rate; readers assume this unless told otherwise.
pub const DEFAULT_MONOLITH_SAMPLE_RATE: u32 = 44100;

const FIXED_HEADER_SIZE: u64 = 12;
const MONOLITH_HEADER_SIZE: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LacHeader {
    pub version: u8,
    pub num_channels: u8,
    pub sample_rate: u32,
    pub bits_per_sample: u8,
    pub uses_compression: bool,
    pub uses_encryption: bool,
    pub bit_shift: u8,
    pub block_offsets: Vec<u32>,
}

impl LacHeader {
    /// Header of a compressed file.
    pub fn indexed(num_channels: u8, sample_rate: u32, block_offsets: Vec<u32>) -> Self {
        Self {
            version: CURRENT_VERSION,
            num_channels,
            sample_rate,
            bits_per_sample: 16,
            uses_compression: true,
            uses_encryption: false,
            bit_shift: 0,
            block_offsets,
        }
    }

    /// Header of a raw 16-bit monolith.
    pub fn monolith(num_channels: u8, sample_rate: u32) -> Self {
        Self {
            version: 0,
            num_channels,
            sample_rate,
            bits_per_sample: 16,
            uses_compression: false,
            uses_encryption: false,
            bit_shift: 0,
            block_offsets: Vec::new(),
        }
    }

    #[inline]
    pub fn is_monolith(&self) -> bool {
        self.version < 2
    }

    #[inline]
    pub fn block_amount(&self) -> usize {
        self.block_offsets.len()
    }

    /// Bytes before the first block record (or first PCM frame).
    pub fn header_size(&self) -> u64 {
        if self.is_monolith() {
            MONOLITH_HEADER_SIZE
        } else {
            FIXED_HEADER_SIZE + 4 * self.block_offsets.len() as u64
        }
    }

    /// Frames stored in a file of `file_len` bytes.
    ///
    /// Compressed files always hold whole blocks, so the last block's padding
    /// counts towards the length.
    pub fn length_in_samples(&self, file_len: u64) -> u64 {
        if self.is_monolith() {
            let frame_bytes = 2 * self.num_channels.max(1) as u64;
            file_len.saturating_sub(MONOLITH_HEADER_SIZE) / frame_bytes
        } else {
            (self.block_offsets.len() * COMPRESSION_BLOCK_SIZE) as u64
        }
    }

    /// Absolute file offset of the block containing sample `pos`.
    ///
    /// For monoliths this is the exact byte of the frame. Positions beyond the
    /// index yield `0`, which callers must treat as "no data" rather than a seek
    /// target.
    pub fn offset_for_read_position(&self, pos: u64) -> u64 {
        if self.is_monolith() {
            return MONOLITH_HEADER_SIZE + pos * self.num_channels as u64 * 2;
        }
        let index = (pos / COMPRESSION_BLOCK_SIZE as u64) as usize;
        self.block_offset(index).unwrap_or_else(|e| {
            tracing::warn!("offset lookup for sample {}: {}", pos, e);
            0
        })
    }

    /// Absolute file offset of the block following the one containing `pos`.
    pub fn offset_for_next_block(&self, pos: u64) -> u64 {
        if self.is_monolith() {
            return self.offset_for_read_position(pos);
        }
        let index = (pos / COMPRESSION_BLOCK_SIZE as u64) as usize + 1;
        self.block_offset(index).unwrap_or_else(|e| {
            tracing::warn!("next block lookup for sample {}: {}", pos, e);
            0
        })
    }

    /// Checked absolute offset of block `index`.
    pub fn block_offset(&self, index: usize) -> Result<u64> {
        self.block_offsets
            .get(index)
            .map(|o| self.header_size() + *o as u64)
            .ok_or(Error::BlockIndexOutOfRange {
                index,
                amount: self.block_offsets.len(),
            })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        if self.is_monolith() {
            w.write_all(&[monolith_flag(self.num_channels)?])?;
            return Ok(());
        }
        let mono = match self.num_channels {
            1 => 1u8,
            2 => 0u8,
            n => return Err(Error::UnsupportedChannelCount(n as usize)),
        };
        let flags = (self.version << 4)
            | ((self.uses_encryption as u8) << 3)
            | ((self.uses_compression as u8) << 2)
            | mono;
        let amount =
            u32::try_from(self.block_offsets.len()).map_err(|_| Error::FileTooLarge)?;

        let mut fixed = [0u8; FIXED_HEADER_SIZE as usize];
        fixed[0] = flags;
        fixed[1] = self.bits_per_sample;
        fixed[2..6].copy_from_slice(&self.sample_rate.to_le_bytes());
        fixed[6] = self.bit_shift;
        fixed[8..12].copy_from_slice(&amount.to_le_bytes());
        w.write_all(&fixed)?;
        for offset in &self.block_offsets {
            w.write_all(&offset.to_le_bytes())?;
        }
        Ok(())
    }

    /// Parses a header, deciding monolith vs. indexed from the first byte.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut first = [0u8; 1];
        r.read_exact(&mut first)?;
        match first[0] {
            0 => return Ok(Self::monolith(2, DEFAULT_MONOLITH_SAMPLE_RATE)),
            1 => return Ok(Self::monolith(1, DEFAULT_MONOLITH_SAMPLE_RATE)),
            _ => {}
        }

        let flags = first[0];
        let version = flags >> 4;
        if version < 2 {
            return Err(Error::InvalidHeader(format!("flag byte {flags:#04x}")));
        }
        if version > CURRENT_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        let mut rest = [0u8; FIXED_HEADER_SIZE as usize - 1];
        r.read_exact(&mut rest)?;
        let bits_per_sample = rest[0];
        if bits_per_sample != 16 {
            return Err(Error::InvalidHeader(format!(
                "{bits_per_sample} bits per sample"
            )));
        }
        let sample_rate = u32::from_le_bytes([rest[1], rest[2], rest[3], rest[4]]);
        let bit_shift = rest[5];
        if bit_shift > 15 {
            return Err(Error::InvalidHeader(format!("bit shift {bit_shift}")));
        }
        let amount = u32::from_le_bytes([rest[7], rest[8], rest[9], rest[10]]);

        // the block count is untrusted: grow the table with the bytes actually present
        let table_len = amount as u64 * 4;
        let mut table = Vec::new();
        r.by_ref().take(table_len).read_to_end(&mut table)?;
        if (table.len() as u64) < table_len {
            return Err(Error::InvalidHeader(format!(
                "block table truncated: {amount} blocks declared, {} present",
                table.len() / 4
            )));
        }
        let block_offsets: Vec<u32> = table
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        if block_offsets.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::InvalidHeader("block offsets not increasing".into()));
        }

        Ok(Self {
            version,
            num_channels: if flags & 1 == 1 { 1 } else { 2 },
            sample_rate,
            bits_per_sample,
            uses_compression: flags & 0b100 != 0,
            uses_encryption: flags & 0b1000 != 0,
            bit_shift,
            block_offsets,
        })
    }
}

pub(crate) fn monolith_flag(num_channels: u8) -> Result<u8> {
    match num_channels {
        2 => Ok(0),
        1 => Ok(1),
        n => Err(Error::UnsupportedChannelCount(n as usize)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_round_trip() {
        let header = LacHeader::indexed(1, 48000, vec![0, 100, 250]);
        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len() as u64, header.header_size());

        let parsed = LacHeader::read_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.length_in_samples(0), 3 * COMPRESSION_BLOCK_SIZE as u64);
    }

    #[test]
    fn test_offsets_are_absolute() {
        let header = LacHeader::indexed(2, 44100, vec![0, 100, 250]);
        let base = header.header_size();
        assert_eq!(header.offset_for_read_position(0), base);
        assert_eq!(header.offset_for_read_position(4095), base);
        assert_eq!(header.offset_for_read_position(4096), base + 100);
        assert_eq!(header.offset_for_next_block(4097), base + 250);
    }

    #[test]
    fn test_out_of_range_offset_degrades_to_zero() {
        let header = LacHeader::indexed(2, 44100, vec![0, 100]);
        assert_eq!(header.offset_for_read_position(3 * 4096), 0);
        assert_eq!(header.offset_for_next_block(4096), 0);
        assert!(matches!(
            header.block_offset(2),
            Err(Error::BlockIndexOutOfRange { index: 2, amount: 2 })
        ));
    }

    #[test]
    fn test_monolith_detection() {
        let mono = LacHeader::read_from(&mut Cursor::new([1u8, 0, 0])).unwrap();
        assert!(mono.is_monolith());
        assert_eq!(mono.num_channels, 1);
        assert_eq!(mono.header_size(), 1);
        assert_eq!(mono.offset_for_read_position(10), 21);

        let stereo = LacHeader::read_from(&mut Cursor::new([0u8])).unwrap();
        assert_eq!(stereo.num_channels, 2);
        assert_eq!(stereo.offset_for_read_position(10), 41);
        assert_eq!(stereo.length_in_samples(41), 10);
    }

    #[test]
    fn test_rejects_unsorted_index() {
        let mut bytes = Vec::new();
        LacHeader::indexed(2, 44100, vec![0, 10])
            .write_to(&mut bytes)
            .unwrap();
        // swap the two offsets
        bytes[12..16].copy_from_slice(&10u32.to_le_bytes());
        bytes[16..20].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            LacHeader::read_from(&mut Cursor::new(bytes)),
            Err(Error::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_huge_block_count_is_rejected() {
        let mut bytes = vec![0x20u8, 16, 0x44, 0xac, 0, 0, 0, 0];
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 8]);
        assert!(matches!(
            LacHeader::read_from(&mut Cursor::new(bytes)),
            Err(Error::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_rejects_future_version() {
        let bytes = [0x30u8, 16, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            LacHeader::read_from(&mut Cursor::new(bytes)),
            Err(Error::UnsupportedVersion(3))
        ));
    }

    #[test]
    fn test_encryption_flag_parsed() {
        let mut header = LacHeader::indexed(2, 44100, vec![0]);
        header.uses_encryption = true;
        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();
        assert!(LacHeader::read_from(&mut Cursor::new(bytes))
            .unwrap()
            .uses_encryption);
    }
}
