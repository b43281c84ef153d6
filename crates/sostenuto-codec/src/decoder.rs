//! Block decoder.

use crate::bits::{packed_len, BitReader};
use crate::encoder::{MODE_DELTA, MODE_RAW, MODE_ZERO};
use crate::error::{Error, Result};
use crate::header::COMPRESSION_BLOCK_SIZE;

#[inline]
fn unzigzag(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

#[derive(Debug, Default)]
pub struct BlockDecoder;

impl BlockDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decodes one block record into `out`, one `Vec` per channel.
    ///
    /// `index` only labels errors. Returns the number of record bytes consumed.
    pub fn decode_block(
        &mut self,
        record: &[u8],
        index: usize,
        bit_shift: u8,
        out: &mut [Vec<i16>],
    ) -> Result<usize> {
        let mut consumed = 0;
        for channel in out.iter_mut() {
            channel.resize(COMPRESSION_BLOCK_SIZE, 0);
            consumed += decode_channel(&record[consumed.min(record.len())..], index, channel)?;
            if bit_shift > 0 {
                for s in channel.iter_mut() {
                    *s = ((*s as i32) << bit_shift).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                }
            }
        }
        Ok(consumed)
    }
}

fn decode_channel(record: &[u8], index: usize, out: &mut [i16]) -> Result<usize> {
    let corrupt = |reason| Error::CorruptBlock { index, reason };
    let mode_byte = *record.first().ok_or(corrupt("empty record"))?;
    let width = (mode_byte & 0x1f) as u32;

    match mode_byte >> 6 {
        MODE_ZERO => {
            out.fill(0);
            Ok(1)
        }
        MODE_RAW => {
            let len = 1 + 2 * COMPRESSION_BLOCK_SIZE;
            let payload = record.get(1..len).ok_or(corrupt("truncated raw record"))?;
            for (s, b) in out.iter_mut().zip(payload.chunks_exact(2)) {
                *s = i16::from_le_bytes([b[0], b[1]]);
            }
            Ok(len)
        }
        MODE_DELTA => {
            if width > 17 {
                return Err(corrupt("delta width too large"));
            }
            let first = record.get(1..3).ok_or(corrupt("truncated delta record"))?;
            let len = 3 + packed_len(COMPRESSION_BLOCK_SIZE - 1, width);
            let packed = record.get(3..len).ok_or(corrupt("truncated delta record"))?;

            let mut value = i16::from_le_bytes([first[0], first[1]]) as i32;
            out[0] = value as i16;
            let mut bits = BitReader::new(packed);
            for s in out.iter_mut().skip(1) {
                let delta = bits.read(width).ok_or(corrupt("truncated delta bits"))?;
                value += unzigzag(delta);
                *s = i16::try_from(value).map_err(|_| corrupt("delta overflow"))?;
            }
            Ok(len)
        }
        _ => Err(corrupt("unknown record mode")),
    }
}
