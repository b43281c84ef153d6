//! Planar PCM buffers in floating point or 16-bit fixed point.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Scale applied to a fixed-point sample to bring it into `[-1, 1)`.
pub const FIXED_GAIN: f32 = 1.0 / 32768.0;

/// Converts a 16-bit sample to float.
#[inline]
pub fn fixed_to_float(value: i16) -> f32 {
    value as f32 * FIXED_GAIN
}

/// Converts a float sample to 16-bit, rounding to nearest and clipping.
#[inline]
pub fn float_to_fixed(value: f32) -> i16 {
    (value * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}

/// Sample representation of a [`SampleBuffer`]. Fixed per buffer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleFormat {
    #[default]
    Float,
    Fixed16,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::Float => 4,
            SampleFormat::Fixed16 => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Storage {
    Float(Vec<Vec<f32>>),
    Fixed(Vec<Vec<i16>>),
}

/// Mono or stereo planar buffer.
///
/// Reads past the end return silence and writes past the end are dropped, so
/// callers on the audio thread never have to bounds-check twice.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    storage: Storage,
    num_samples: usize,
}

fn check_channels(channels: usize) -> Result<()> {
    if channels == 1 || channels == 2 {
        Ok(())
    } else {
        Err(Error::InvalidChannelCount(channels))
    }
}

fn alloc_channel<T: Copy + Default>(samples: usize, channels: usize) -> Result<Vec<T>> {
    let mut data = Vec::new();
    data.try_reserve_exact(samples)
        .map_err(|_| Error::AllocationFailed { channels, samples })?;
    data.resize(samples, T::default());
    Ok(data)
}

impl SampleBuffer {
    /// Allocates a zeroed buffer. Fails instead of aborting when memory runs out.
    pub fn new(format: SampleFormat, channels: usize, samples: usize) -> Result<Self> {
        check_channels(channels)?;
        let storage = match format {
            SampleFormat::Float => Storage::Float(
                (0..channels)
                    .map(|_| alloc_channel(samples, channels))
                    .collect::<Result<_>>()?,
            ),
            SampleFormat::Fixed16 => Storage::Fixed(
                (0..channels)
                    .map(|_| alloc_channel(samples, channels))
                    .collect::<Result<_>>()?,
            ),
        };
        Ok(Self {
            storage,
            num_samples: samples,
        })
    }

    /// A zero-length buffer. Never allocates.
    pub fn empty(format: SampleFormat, channels: usize) -> Self {
        let channels = channels.clamp(1, 2);
        let storage = match format {
            SampleFormat::Float => Storage::Float(vec![Vec::new(); channels]),
            SampleFormat::Fixed16 => Storage::Fixed(vec![Vec::new(); channels]),
        };
        Self {
            storage,
            num_samples: 0,
        }
    }

    pub fn format(&self) -> SampleFormat {
        match self.storage {
            Storage::Float(_) => SampleFormat::Float,
            Storage::Fixed(_) => SampleFormat::Fixed16,
        }
    }

    #[inline]
    pub fn is_float(&self) -> bool {
        matches!(self.storage, Storage::Float(_))
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        match &self.storage {
            Storage::Float(c) => c.len(),
            Storage::Fixed(c) => c.len(),
        }
    }

    #[inline]
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn is_empty(&self) -> bool {
        self.num_samples == 0
    }

    pub fn size_in_bytes(&self) -> usize {
        self.num_samples * self.num_channels() * self.format().bytes_per_sample()
    }

    /// Gain that brings [`sample_raw`](Self::sample_raw) values into `[-1, 1)`.
    #[inline]
    pub fn gain(&self) -> f32 {
        if self.is_float() {
            1.0
        } else {
            FIXED_GAIN
        }
    }

    /// Resizes to `samples`, keeping existing content and zeroing new space.
    pub fn set_size(&mut self, samples: usize) -> Result<()> {
        let channels = self.num_channels();
        let extra = samples.saturating_sub(self.num_samples);
        match &mut self.storage {
            Storage::Float(chans) => {
                for c in chans.iter_mut() {
                    c.try_reserve_exact(extra)
                        .map_err(|_| Error::AllocationFailed { channels, samples })?;
                    c.resize(samples, 0.0);
                }
            }
            Storage::Fixed(chans) => {
                for c in chans.iter_mut() {
                    c.try_reserve_exact(extra)
                        .map_err(|_| Error::AllocationFailed { channels, samples })?;
                    c.resize(samples, 0);
                }
            }
        }
        self.num_samples = samples;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.clear_range(0, self.num_samples);
    }

    /// Zeroes `[start, start + num)`, clipped to the buffer.
    pub fn clear_range(&mut self, start: usize, num: usize) {
        let start = start.min(self.num_samples);
        let end = start.saturating_add(num).min(self.num_samples);
        match &mut self.storage {
            Storage::Float(chans) => chans.iter_mut().for_each(|c| c[start..end].fill(0.0)),
            Storage::Fixed(chans) => chans.iter_mut().for_each(|c| c[start..end].fill(0)),
        }
    }

    /// The stored value without format scaling (an `i16` widened to `f32` for fixed buffers).
    ///
    /// Mono buffers answer for any channel index.
    #[inline]
    pub fn sample_raw(&self, channel: usize, index: usize) -> f32 {
        match &self.storage {
            Storage::Float(c) => c[channel.min(c.len() - 1)]
                .get(index)
                .copied()
                .unwrap_or(0.0),
            Storage::Fixed(c) => c[channel.min(c.len() - 1)]
                .get(index)
                .map_or(0.0, |v| *v as f32),
        }
    }

    /// The sample normalised to `[-1, 1)`.
    #[inline]
    pub fn sample(&self, channel: usize, index: usize) -> f32 {
        self.sample_raw(channel, index) * self.gain()
    }

    pub fn set_sample(&mut self, channel: usize, index: usize, value: f32) {
        if index >= self.num_samples {
            return;
        }
        match &mut self.storage {
            Storage::Float(c) => {
                if let Some(ch) = c.get_mut(channel) {
                    ch[index] = value;
                }
            }
            Storage::Fixed(c) => {
                if let Some(ch) = c.get_mut(channel) {
                    ch[index] = float_to_fixed(value);
                }
            }
        }
    }

    /// Writes 16-bit samples into one channel starting at `start`.
    pub fn write_fixed(&mut self, channel: usize, start: usize, data: &[i16]) {
        let end = start.saturating_add(data.len()).min(self.num_samples);
        if start >= end {
            return;
        }
        let data = &data[..end - start];
        match &mut self.storage {
            Storage::Float(c) => {
                if let Some(ch) = c.get_mut(channel) {
                    for (d, s) in ch[start..end].iter_mut().zip(data) {
                        *d = fixed_to_float(*s);
                    }
                }
            }
            Storage::Fixed(c) => {
                if let Some(ch) = c.get_mut(channel) {
                    ch[start..end].copy_from_slice(data);
                }
            }
        }
    }

    /// Writes normalised float samples into one channel starting at `start`.
    pub fn write_float(&mut self, channel: usize, start: usize, data: &[f32]) {
        let end = start.saturating_add(data.len()).min(self.num_samples);
        if start >= end {
            return;
        }
        let data = &data[..end - start];
        match &mut self.storage {
            Storage::Float(c) => {
                if let Some(ch) = c.get_mut(channel) {
                    ch[start..end].copy_from_slice(data);
                }
            }
            Storage::Fixed(c) => {
                if let Some(ch) = c.get_mut(channel) {
                    for (d, s) in ch[start..end].iter_mut().zip(data) {
                        *d = float_to_fixed(*s);
                    }
                }
            }
        }
    }

    /// Copies `num` frames from `src` into `self`, converting the sample format.
    ///
    /// A mono source feeds every destination channel; a stereo source copied
    /// into a mono buffer contributes its left channel. The span is clipped to
    /// both buffers and the number of copied frames is returned.
    pub fn copy_from(
        &mut self,
        dest_start: usize,
        src: &SampleBuffer,
        src_start: usize,
        num: usize,
    ) -> usize {
        let num = num
            .min(self.num_samples.saturating_sub(dest_start))
            .min(src.num_samples.saturating_sub(src_start));
        if num == 0 {
            return 0;
        }
        let src_channels = src.num_channels();
        let dest_range = dest_start..dest_start + num;
        let src_range = src_start..src_start + num;

        match (&mut self.storage, &src.storage) {
            (Storage::Float(d), Storage::Float(s)) => {
                for (c, ch) in d.iter_mut().enumerate() {
                    ch[dest_range.clone()]
                        .copy_from_slice(&s[c.min(src_channels - 1)][src_range.clone()]);
                }
            }
            (Storage::Fixed(d), Storage::Fixed(s)) => {
                for (c, ch) in d.iter_mut().enumerate() {
                    ch[dest_range.clone()]
                        .copy_from_slice(&s[c.min(src_channels - 1)][src_range.clone()]);
                }
            }
            (Storage::Float(d), Storage::Fixed(s)) => {
                for (c, ch) in d.iter_mut().enumerate() {
                    let s = &s[c.min(src_channels - 1)][src_range.clone()];
                    for (d, s) in ch[dest_range.clone()].iter_mut().zip(s) {
                        *d = fixed_to_float(*s);
                    }
                }
            }
            (Storage::Fixed(d), Storage::Float(s)) => {
                for (c, ch) in d.iter_mut().enumerate() {
                    let s = &s[c.min(src_channels - 1)][src_range.clone()];
                    for (d, s) in ch[dest_range.clone()].iter_mut().zip(s) {
                        *d = float_to_fixed(*s);
                    }
                }
            }
        }
        num
    }

    /// Copies `[src_start, src_start + num)` to `dest_start` inside this buffer.
    pub fn copy_within(&mut self, src_start: usize, dest_start: usize, num: usize) {
        let num = num
            .min(self.num_samples.saturating_sub(src_start))
            .min(self.num_samples.saturating_sub(dest_start));
        let range = src_start..src_start + num;
        match &mut self.storage {
            Storage::Float(c) => c
                .iter_mut()
                .for_each(|ch| ch.copy_within(range.clone(), dest_start)),
            Storage::Fixed(c) => c
                .iter_mut()
                .for_each(|ch| ch.copy_within(range.clone(), dest_start)),
        }
    }

    /// Reverses the sample order of every channel in place.
    pub fn reverse(&mut self) {
        match &mut self.storage {
            Storage::Float(c) => c.iter_mut().for_each(|ch| ch.reverse()),
            Storage::Fixed(c) => c.iter_mut().for_each(|ch| ch.reverse()),
        }
    }

    pub fn channel_f32(&self, channel: usize) -> Option<&[f32]> {
        match &self.storage {
            Storage::Float(c) => c.get(channel).map(Vec::as_slice),
            Storage::Fixed(_) => None,
        }
    }

    pub fn channel_fixed(&self, channel: usize) -> Option<&[i16]> {
        match &self.storage {
            Storage::Fixed(c) => c.get(channel).map(Vec::as_slice),
            Storage::Float(_) => None,
        }
    }

    /// Absolute peak of `[start, start + num)` across all channels, normalised.
    pub fn peak(&self, start: usize, num: usize) -> f32 {
        let start = start.min(self.num_samples);
        let end = start.saturating_add(num).min(self.num_samples);
        match &self.storage {
            Storage::Float(c) => c
                .iter()
                .flat_map(|ch| ch[start..end].iter())
                .fold(0.0f32, |acc, v| acc.max(v.abs())),
            Storage::Fixed(c) => c
                .iter()
                .flat_map(|ch| ch[start..end].iter())
                .fold(0.0f32, |acc, v| acc.max(fixed_to_float(*v).abs())),
        }
    }
}
