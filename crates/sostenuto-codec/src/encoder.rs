//! Block encoder.
//!
//! Every channel of a block becomes one record that starts with a mode byte:
//! the top two bits select the record kind and the low five bits carry the
//! bit width of packed deltas.
//!
//! - `Zero`: silent channel, no payload.
//! - `Raw`: [`COMPRESSION_BLOCK_SIZE`] little-endian `i16` values.
//! - `Delta`: first sample as `i16`, then zigzag-coded first differences
//!   packed at the width stored in the mode byte.

use crate::bits::BitWriter;
use crate::error::{Error, Result};
use crate::header::COMPRESSION_BLOCK_SIZE;
use serde::{Deserialize, Serialize};

pub(crate) const MODE_ZERO: u8 = 0;
pub(crate) const MODE_RAW: u8 = 1;
pub(crate) const MODE_DELTA: u8 = 2;

/// Encoding choices for [`LacWriter`](crate::LacWriter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressorOptions {
    /// `false` writes a raw 16-bit monolith with no block index.
    pub use_compression: bool,
}

impl CompressorOptions {
    /// Delta + bit packing preset.
    pub const fn diff() -> Self {
        Self {
            use_compression: true,
        }
    }

    /// Raw 16-bit preset.
    pub const fn uncompressed() -> Self {
        Self {
            use_compression: false,
        }
    }
}

impl Default for CompressorOptions {
    fn default() -> Self {
        Self::diff()
    }
}

#[inline]
pub(crate) fn zigzag(delta: i32) -> u32 {
    ((delta << 1) ^ (delta >> 31)) as u32
}

#[inline]
fn bit_width(value: u32) -> u32 {
    32 - value.leading_zeros()
}

/// Encodes whole blocks. Holds no state between blocks, so any block can be
/// decoded on its own.
#[derive(Debug, Default)]
pub struct BlockEncoder;

impl BlockEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Appends one block record (all channels) to `out`.
    ///
    /// Every channel slice must hold exactly [`COMPRESSION_BLOCK_SIZE`] frames.
    pub fn encode_block(&mut self, channels: &[&[i16]], out: &mut Vec<u8>) -> Result<()> {
        if channels.is_empty() || channels.len() > 2 {
            return Err(Error::UnsupportedChannelCount(channels.len()));
        }
        for channel in channels {
            if channel.len() != COMPRESSION_BLOCK_SIZE {
                return Err(Error::InvalidHeader(format!(
                    "block of {} frames, expected {}",
                    channel.len(),
                    COMPRESSION_BLOCK_SIZE
                )));
            }
            encode_channel(channel, out);
        }
        Ok(())
    }
}

fn encode_channel(samples: &[i16], out: &mut Vec<u8>) {
    if samples.iter().all(|s| *s == 0) {
        out.push(MODE_ZERO << 6);
        return;
    }

    let width = samples
        .windows(2)
        .map(|w| bit_width(zigzag(w[1] as i32 - w[0] as i32)))
        .max()
        .unwrap_or(0);

    if width >= 16 {
        out.push(MODE_RAW << 6);
        out.reserve(samples.len() * 2);
        for s in samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        return;
    }

    out.push((MODE_DELTA << 6) | width as u8);
    out.extend_from_slice(&samples[0].to_le_bytes());
    let mut bits = BitWriter::new(out);
    for w in samples.windows(2) {
        bits.write(zigzag(w[1] as i32 - w[0] as i32), width);
    }
    bits.finish();
}
