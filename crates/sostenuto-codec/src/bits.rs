//! LSB-first bit packing for delta records.

pub(crate) struct BitWriter<'a> {
    out: &'a mut Vec<u8>,
    acc: u64,
    filled: u32,
}

impl<'a> BitWriter<'a> {
    pub fn new(out: &'a mut Vec<u8>) -> Self {
        Self {
            out,
            acc: 0,
            filled: 0,
        }
    }

    /// Appends the low `width` bits of `value`. `width` must be at most 32.
    #[inline]
    pub fn write(&mut self, value: u32, width: u32) {
        if width == 0 {
            return;
        }
        let mask = (1u64 << width) - 1;
        self.acc |= (value as u64 & mask) << self.filled;
        self.filled += width;
        while self.filled >= 8 {
            self.out.push(self.acc as u8);
            self.acc >>= 8;
            self.filled -= 8;
        }
    }

    /// Flushes the partial trailing byte.
    pub fn finish(self) {
        if self.filled > 0 {
            self.out.push(self.acc as u8);
        }
    }
}

pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    acc: u64,
    filled: u32,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            acc: 0,
            filled: 0,
        }
    }

    /// Reads `width` bits, or `None` when the input runs out.
    #[inline]
    pub fn read(&mut self, width: u32) -> Option<u32> {
        if width == 0 {
            return Some(0);
        }
        while self.filled < width {
            let byte = *self.data.get(self.pos)?;
            self.acc |= (byte as u64) << self.filled;
            self.pos += 1;
            self.filled += 8;
        }
        let value = (self.acc & ((1u64 << width) - 1)) as u32;
        self.acc >>= width;
        self.filled -= width;
        Some(value)
    }
}

/// Bytes needed to hold `count` values of `width` bits.
#[inline]
pub(crate) fn packed_len(count: usize, width: u32) -> usize {
    (count * width as usize).div_ceil(8)
}
