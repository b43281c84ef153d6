//! Streaming sampler sounds.
//!
//! A [`StreamingSound`] keeps the trim window, loop points and crossfade of one
//! sample, plus the in-memory preload window that lets a voice start without
//! touching the disk. Everything the audio thread and refill jobs need is
//! published as an immutable [`SoundSnapshot`] behind an `ArcSwap`; setters
//! build a fresh snapshot and swap it in.
//!
//! Positions handed to [`fill_sample_buffer`](StreamingSound::fill_sample_buffer)
//! are relative to the sample start. When looping, any position at or past the
//! loop end reads the sample at `loop_start + (pos - loop_start) % loop_length`,
//! and the last `crossfade_length` samples before the loop end are replaced by
//! a linear blend of the loop tail (fading out) and the samples leading into
//! the loop start (fading in).

use crate::config::StreamingConfig;
use crate::error::{Error, Result};
use crate::file_reader::{FileReader, FileReference, SampleMetadata};
use crate::sound_pool::PoolCounters;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sostenuto_core::{AtomicFlag, SampleBuffer, SampleFormat};
use std::sync::Arc;

/// Lower bound of the internal preload size.
pub const MINIMUM_PRELOAD: usize = 2048;

/// How much of a sample is kept in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreloadSize {
    Samples(usize),
    EntireSample,
}

impl PreloadSize {
    /// Negative values mean "the entire sample".
    pub fn from_raw(value: i64) -> Self {
        if value < 0 {
            PreloadSize::EntireSample
        } else {
            PreloadSize::Samples(value as usize)
        }
    }
}

/// Key and velocity range a sound answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicMappingData {
    pub low_key: u8,
    pub high_key: u8,
    pub low_velocity: u8,
    pub high_velocity: u8,
    pub root_note: u8,
}

impl Default for BasicMappingData {
    fn default() -> Self {
        Self {
            low_key: 0,
            high_key: 127,
            low_velocity: 0,
            high_velocity: 127,
            root_note: 60,
        }
    }
}

impl BasicMappingData {
    pub fn applies_to(&self, note: u8, velocity: u8) -> bool {
        (self.low_key..=self.high_key).contains(&note)
            && (self.low_velocity..=self.high_velocity).contains(&velocity)
    }
}

/// Playback ratio that transposes `root_note` to `note`.
pub fn pitch_factor(note: i32, root_note: i32) -> f64 {
    2f64.powf((note - root_note) as f64 / 12.0)
}

#[derive(Debug, Clone)]
struct SoundSettings {
    metadata: Option<SampleMetadata>,
    sample_start: u64,
    sample_end: u64,
    loop_enabled: bool,
    loop_start: u64,
    loop_end: u64,
    crossfade_length: u64,
    sample_start_mod: u64,
    preload_size: PreloadSize,
    reversed: bool,
    purged: bool,
    mapping: BasicMappingData,
    /// Bytes currently charged to the pool for this sound.
    reserved_bytes: usize,
}

impl SoundSettings {
    fn new(preload: usize) -> Self {
        Self {
            metadata: None,
            sample_start: 0,
            sample_end: 0,
            loop_enabled: false,
            loop_start: 0,
            loop_end: 0,
            crossfade_length: 0,
            sample_start_mod: 0,
            preload_size: PreloadSize::Samples(preload),
            reversed: false,
            purged: false,
            mapping: BasicMappingData::default(),
            reserved_bytes: 0,
        }
    }

    fn reset_range(&mut self, metadata: SampleMetadata) {
        self.metadata = Some(metadata);
        self.sample_start = 0;
        self.sample_end = metadata.length_in_samples;
        self.loop_start = 0;
        self.loop_end = metadata.length_in_samples;
    }

    /// Restores `sample_start <= loop_start <= loop_end <= sample_end <= length`.
    fn clamp(&mut self) {
        let length = self.metadata.map_or(0, |m| m.length_in_samples);
        self.sample_end = self.sample_end.min(length);
        self.sample_start = self.sample_start.min(self.sample_end);
        self.loop_end = self.loop_end.clamp(self.sample_start, self.sample_end);
        self.loop_start = self.loop_start.clamp(self.sample_start, self.loop_end);
    }
}

/// Immutable playback view of a sound.
#[derive(Debug)]
pub struct SoundSnapshot {
    pub sample_rate: f64,
    pub sample_start: u64,
    pub sample_length: u64,
    pub loop_enabled: bool,
    /// Loop start relative to the sample start.
    pub loop_start: u64,
    /// Loop end relative to the sample start.
    pub loop_end: u64,
    pub crossfade_length: usize,
    pub internal_preload_size: usize,
    pub entire_sample_loaded: bool,
    pub reversed: bool,
    pub num_channels: usize,
    pub preload: SampleBuffer,
    small_loop: Option<SampleBuffer>,
    crossfade: Option<SampleBuffer>,
}

impl SoundSnapshot {
    fn empty(format: SampleFormat) -> Self {
        Self {
            sample_rate: 44100.0,
            sample_start: 0,
            sample_length: 0,
            loop_enabled: false,
            loop_start: 0,
            loop_end: 0,
            crossfade_length: 0,
            internal_preload_size: 0,
            entire_sample_loaded: false,
            reversed: false,
            num_channels: 1,
            preload: SampleBuffer::empty(format, 1),
            small_loop: None,
            crossfade: None,
        }
    }

    #[inline]
    pub fn loop_length(&self) -> u64 {
        self.loop_end - self.loop_start
    }

    #[inline]
    pub fn is_looping(&self) -> bool {
        self.loop_enabled && self.loop_length() != 0
    }

    /// First sample of the crossfade area, relative to the sample start.
    pub fn crossfade_start(&self) -> u64 {
        self.loop_end - self.crossfade_length as u64
    }

    pub fn has_small_loop_buffer(&self) -> bool {
        self.small_loop.is_some()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.preload.size_in_bytes()
            + self.small_loop.as_ref().map_or(0, SampleBuffer::size_in_bytes)
            + self.crossfade.as_ref().map_or(0, SampleBuffer::size_in_bytes)
    }
}

/// One sample of a streaming instrument.
pub struct StreamingSound {
    reader: FileReader,
    format: SampleFormat,
    small_loop_threshold: usize,
    default_preload: usize,
    settings: Mutex<SoundSettings>,
    snapshot: ArcSwap<SoundSnapshot>,
    missing: AtomicFlag,
    counters: Arc<PoolCounters>,
    last_error: Mutex<Option<String>>,
}

impl StreamingSound {
    pub fn new(reference: FileReference, config: &StreamingConfig) -> Self {
        Self::with_counters(reference, config, Arc::new(PoolCounters::default()))
    }

    /// Creates a sound whose open handles and preload memory are charged to `counters`.
    ///
    /// A file that cannot be opened yields a sound that reports
    /// [`is_missing`](Self::is_missing) instead of an error.
    pub fn with_counters(
        reference: FileReference,
        config: &StreamingConfig,
        counters: Arc<PoolCounters>,
    ) -> Self {
        let sound = Self {
            reader: FileReader::new(reference, counters.open_handle_counter()),
            format: config.buffer_format,
            small_loop_threshold: config.small_loop_threshold,
            default_preload: config.preload_size,
            settings: Mutex::new(SoundSettings::new(config.preload_size)),
            snapshot: ArcSwap::from_pointee(SoundSnapshot::empty(config.buffer_format)),
            missing: AtomicFlag::new(false),
            counters,
            last_error: Mutex::new(None),
        };
        if let Err(e) = sound.load_metadata() {
            tracing::warn!("{}: {}", sound.reader.reference().display_name(), e);
        }
        sound
    }

    fn load_metadata(&self) -> Result<()> {
        self.update(|settings, reader| {
            let metadata = reader.metadata()?;
            settings.reset_range(metadata);
            Ok(())
        })
    }

    pub fn reader(&self) -> &FileReader {
        &self.reader
    }

    pub fn file_reference(&self) -> FileReference {
        self.reader.reference()
    }

    pub fn hash_code(&self) -> u64 {
        self.reader.reference().hash_code()
    }

    /// The current playback view. Lock-free.
    #[inline]
    pub fn snapshot(&self) -> Arc<SoundSnapshot> {
        self.snapshot.load_full()
    }

    /// Lock-free, safe to call from the audio thread.
    pub fn sample_rate(&self) -> f64 {
        self.snapshot.load().sample_rate
    }

    pub fn num_channels(&self) -> usize {
        self.settings.lock().metadata.map_or(1, |m| m.num_channels)
    }

    /// Frames in the file, ignoring the trim window.
    pub fn length_in_samples(&self) -> u64 {
        self.settings
            .lock()
            .metadata
            .map_or(0, |m| m.length_in_samples)
    }

    pub fn sample_start(&self) -> u64 {
        self.settings.lock().sample_start
    }

    pub fn sample_end(&self) -> u64 {
        self.settings.lock().sample_end
    }

    pub fn sample_length(&self) -> u64 {
        let s = self.settings.lock();
        s.sample_end - s.sample_start
    }

    pub fn loop_start(&self) -> u64 {
        self.settings.lock().loop_start
    }

    pub fn loop_end(&self) -> u64 {
        self.settings.lock().loop_end
    }

    pub fn is_loop_enabled(&self) -> bool {
        self.settings.lock().loop_enabled
    }

    /// Crossfade length in effect, after clamping to the loop.
    pub fn crossfade_length(&self) -> usize {
        self.snapshot.load().crossfade_length
    }

    pub fn preload_size(&self) -> PreloadSize {
        self.settings.lock().preload_size
    }

    pub fn internal_preload_size(&self) -> usize {
        self.snapshot.load().internal_preload_size
    }

    pub fn is_entire_sample_loaded(&self) -> bool {
        self.snapshot.load().entire_sample_loaded
    }

    pub fn is_reversed(&self) -> bool {
        self.settings.lock().reversed
    }

    pub fn is_missing(&self) -> bool {
        self.missing.get()
    }

    pub fn is_purged(&self) -> bool {
        self.settings.lock().purged
    }

    pub fn has_active_state(&self) -> bool {
        !self.is_missing() && !self.is_purged()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn sample_state_string(&self) -> &'static str {
        match (self.is_purged(), self.is_missing()) {
            (false, false) => "Normal",
            (true, false) => "Purged",
            (false, true) => "Missing",
            (true, true) => "Purged+Missing",
        }
    }

    /// Bytes held by the preload, small-loop and crossfade buffers.
    pub fn actual_preload_size(&self) -> usize {
        self.snapshot.load().size_in_bytes()
    }

    pub fn mapping(&self) -> BasicMappingData {
        self.settings.lock().mapping
    }

    pub fn set_mapping(&self, mapping: BasicMappingData) {
        self.settings.lock().mapping = mapping;
    }

    /// True while a voice at `pos` (relative to the sample start) still has audio ahead.
    #[inline]
    pub fn has_enough_samples_for_block(&self, pos: u64) -> bool {
        let snapshot = self.snapshot.load();
        snapshot.is_looping() || pos < snapshot.sample_length
    }

    pub fn set_sample_start(&self, start: u64) -> Result<()> {
        self.update(|s, _| {
            s.sample_start = start;
            s.loop_start = s.loop_start.max(start);
            s.loop_end = s.loop_end.max(start);
            Ok(())
        })
    }

    pub fn set_sample_end(&self, end: u64) -> Result<()> {
        self.update(|s, _| {
            s.sample_end = end.max(s.sample_start);
            s.loop_end = s.loop_end.min(s.sample_end);
            Ok(())
        })
    }

    pub fn set_loop_enabled(&self, enabled: bool) -> Result<()> {
        self.update(|s, _| {
            s.loop_enabled = enabled;
            Ok(())
        })
    }

    pub fn set_loop_start(&self, start: u64) -> Result<()> {
        self.update(|s, _| {
            s.loop_start = start;
            Ok(())
        })
    }

    pub fn set_loop_end(&self, end: u64) -> Result<()> {
        self.update(|s, _| {
            s.loop_end = end.max(s.loop_start);
            Ok(())
        })
    }

    pub fn set_loop_crossfade(&self, length: u64) -> Result<()> {
        self.update(|s, _| {
            s.crossfade_length = length;
            Ok(())
        })
    }

    /// Headroom for voices that start later than the sample start.
    pub fn set_sample_start_modulation(&self, samples: u64) -> Result<()> {
        self.update(|s, _| {
            s.sample_start_mod = samples;
            Ok(())
        })
    }

    pub fn set_preload_size(&self, size: PreloadSize) -> Result<()> {
        self.update(|s, _| {
            s.preload_size = size;
            Ok(())
        })
    }

    /// Reversed sounds are loaded entirely and ignore their loop.
    pub fn set_reversed(&self, reversed: bool) -> Result<()> {
        self.update(|s, _| {
            s.reversed = reversed;
            Ok(())
        })
    }

    /// Purged sounds release their preload memory and cannot be played.
    pub fn set_purged(&self, purged: bool) -> Result<()> {
        self.update(|s, _| {
            s.purged = purged;
            Ok(())
        })
    }

    /// Points the sound at another file and resets the trim and loop window.
    pub fn replace_file_reference(&self, reference: FileReference) -> Result<()> {
        self.reader.set_reference(reference);
        self.missing.set(false);
        *self.last_error.lock() = None;
        let default_preload = self.default_preload;
        self.update(|settings, reader| {
            settings.metadata = None;
            settings.preload_size = PreloadSize::Samples(default_preload);
            let metadata = reader.metadata()?;
            settings.reset_range(metadata);
            Ok(())
        })
    }

    /// Absolute peak of the trimmed sample, normalised.
    pub fn calculate_peak_value(&self) -> Result<f32> {
        let (start, end, channels) = {
            let s = self.settings.lock();
            (s.sample_start, s.sample_end, s.metadata.map_or(1, |m| m.num_channels))
        };
        const CHUNK: usize = 8192;
        let mut chunk = SampleBuffer::new(SampleFormat::Float, channels, CHUNK)?;
        let mut peak = 0.0f32;
        let mut pos = start;
        while pos < end {
            let n = ((end - pos) as usize).min(CHUNK);
            self.reader.read_from_disk(&mut chunk, 0, n, pos, true)?;
            peak = peak.max(chunk.peak(0, n));
            pos += n as u64;
        }
        self.reader.close_file_handles();
        Ok(peak)
    }

    /// Fills `dest[0..num]` with the sample starting at `uptime` (relative to the sample start).
    ///
    /// Reads come from the crossfade buffer, the preload buffer, the small-loop
    /// buffer or the file, whichever holds the span. Spans that wrap around the
    /// loop end any number of times are split into per-repetition copies.
    /// Returns true if any frame had to be read from the file.
    pub fn fill_sample_buffer(&self, dest: &mut SampleBuffer, num: usize, uptime: u64) -> bool {
        let snapshot = self.snapshot.load();
        let num = num.min(dest.num_samples());

        if !snapshot.is_looping() || uptime + num as u64 <= snapshot.loop_end {
            return self.fill_internal(&snapshot, dest, 0, num, uptime);
        }

        let loop_start = snapshot.loop_start;
        let loop_end = snapshot.loop_end;
        let mut written = 0;
        let mut pos = uptime;
        let mut from_disk = false;

        if pos < loop_end {
            written = (loop_end - pos) as usize;
            from_disk |= self.fill_internal(&snapshot, dest, 0, written, pos);
            pos = loop_end;
        }

        let mut loop_pos = loop_start + (pos - loop_start) % snapshot.loop_length();
        while written < num {
            let n = ((loop_end - loop_pos) as usize).min(num - written);
            match &snapshot.small_loop {
                Some(small) => {
                    dest.copy_from(written, small, (loop_pos - loop_start) as usize, n);
                }
                None => from_disk |= self.fill_internal(&snapshot, dest, written, n, loop_pos),
            }
            written += n;
            loop_pos = loop_start;
        }
        from_disk
    }

    /// Splits off the part of the span that lies in the crossfade area.
    fn fill_internal(
        &self,
        snapshot: &SoundSnapshot,
        dest: &mut SampleBuffer,
        offset: usize,
        num: usize,
        uptime: u64,
    ) -> bool {
        if num == 0 {
            return false;
        }
        if let Some(crossfade) = &snapshot.crossfade {
            let xf_start = snapshot.crossfade_start();
            let end = uptime + num as u64;
            if uptime < snapshot.loop_end && end > xf_start {
                let before = xf_start.saturating_sub(uptime) as usize;
                let mut from_disk = self.fill_direct(snapshot, dest, offset, before, uptime);

                let from = uptime.max(xf_start);
                let to = end.min(snapshot.loop_end);
                let inside = (to - from) as usize;
                dest.copy_from(offset + before, crossfade, (from - xf_start) as usize, inside);

                let after = (end - to) as usize;
                from_disk |= self.fill_direct(snapshot, dest, offset + before + inside, after, to);
                return from_disk;
            }
        }
        self.fill_direct(snapshot, dest, offset, num, uptime)
    }

    /// Preload if it holds the whole span, the file otherwise.
    fn fill_direct(
        &self,
        snapshot: &SoundSnapshot,
        dest: &mut SampleBuffer,
        offset: usize,
        num: usize,
        uptime: u64,
    ) -> bool {
        if num == 0 {
            return false;
        }
        let preload_len = snapshot.preload.num_samples() as u64;
        if uptime + num as u64 <= preload_len
            || snapshot.entire_sample_loaded
            || snapshot.reversed
        {
            let copied = if uptime < preload_len {
                dest.copy_from(offset, &snapshot.preload, uptime as usize, num)
            } else {
                0
            };
            dest.clear_range(offset + copied, num - copied);
            return false;
        }

        let valid = snapshot.sample_length.saturating_sub(uptime).min(num as u64) as usize;
        if let Err(e) = self.reader.read_from_disk(
            dest,
            offset,
            valid,
            snapshot.sample_start + uptime,
            true,
        ) {
            tracing::warn!("{}: streaming read failed: {}", self.reader.reference().display_name(), e);
        }
        dest.clear_range(offset + valid, num - valid);
        valid > 0
    }

    fn update(
        &self,
        f: impl FnOnce(&mut SoundSettings, &FileReader) -> Result<()>,
    ) -> Result<()> {
        let mut settings = self.settings.lock();
        let result = f(&mut *settings, &self.reader).and_then(|_| {
            settings.clamp();
            self.rebuild(&mut *settings)
        });
        self.reader.close_file_handles();

        if let Err(e) = &result {
            tracing::warn!("{}: {}", self.reader.reference().display_name(), e);
            self.counters.release(settings.reserved_bytes);
            settings.reserved_bytes = 0;
            self.snapshot
                .store(Arc::new(SoundSnapshot::empty(self.format)));
            self.missing.set(true);
            *self.last_error.lock() = Some(e.to_string());
        }
        result
    }

    /// Recomputes preload, small-loop and crossfade buffers.
    fn rebuild(&self, s: &mut SoundSettings) -> Result<()> {
        let metadata = s.metadata.ok_or_else(|| Error::Loading {
            file: self.reader.reference().path(),
            reason: "sample metadata unavailable".into(),
        })?;

        let sample_length = s.sample_end - s.sample_start;
        let channels = metadata.num_channels;
        let looped = s.loop_enabled && !s.reversed && s.loop_end > s.loop_start;
        let loop_start = s.loop_start - s.sample_start;
        let loop_end = s.loop_end - s.sample_start;
        let loop_length = loop_end - loop_start;

        let internal_preload_size = match s.preload_size {
            PreloadSize::EntireSample => (sample_length as usize).max(MINIMUM_PRELOAD),
            PreloadSize::Samples(n) => n
                .max(n + s.sample_start_mod as usize)
                .max(MINIMUM_PRELOAD),
        };

        if s.purged {
            self.counters.release(s.reserved_bytes);
            s.reserved_bytes = 0;
            self.snapshot.store(Arc::new(SoundSnapshot {
                sample_rate: metadata.sample_rate as f64,
                sample_start: s.sample_start,
                sample_length,
                internal_preload_size,
                num_channels: channels,
                preload: SampleBuffer::empty(self.format, channels),
                ..SoundSnapshot::empty(self.format)
            }));
            return Ok(());
        }

        // the crossfade reads before the loop start, so it cannot exceed it
        let crossfade_length = if looped {
            s.crossfade_length.min(loop_length).min(s.loop_start) as usize
        } else {
            0
        };
        let crossfade = if crossfade_length > 0 {
            Some(self.build_crossfade(s, channels, crossfade_length)?)
        } else {
            None
        };
        let crossfade_start = loop_end - crossfade_length as u64;

        let preload_len = if s.reversed {
            sample_length as usize
        } else if looped {
            internal_preload_size
        } else {
            internal_preload_size.min(sample_length as usize)
        };

        let mut preload = SampleBuffer::new(self.format, channels, preload_len)?;
        let raw_len = if looped {
            preload_len.min(loop_end as usize)
        } else {
            preload_len
        };
        self.reader
            .read_from_disk(&mut preload, 0, raw_len, s.sample_start, true)?;
        if let Some(xf) = &crossfade {
            let at = crossfade_start as usize;
            if at < raw_len {
                preload.copy_from(at, xf, 0, raw_len - at);
            }
        }
        if looped && preload_len > loop_end as usize {
            let mut pos = loop_end as usize;
            while pos < preload_len {
                let n = (loop_length as usize).min(preload_len - pos);
                preload.copy_within(loop_start as usize, pos, n);
                pos += n;
            }
        }
        if s.reversed {
            preload.reverse();
        }

        let small_loop = if looped
            && (loop_length as usize) < self.small_loop_threshold
            && loop_end as usize > preload_len
        {
            let mut small = SampleBuffer::new(self.format, channels, loop_length as usize)?;
            self.reader.read_from_disk(
                &mut small,
                0,
                loop_length as usize,
                s.loop_start,
                true,
            )?;
            if let Some(xf) = &crossfade {
                small.copy_from((crossfade_start - loop_start) as usize, xf, 0, crossfade_length);
            }
            Some(small)
        } else {
            None
        };

        let snapshot = SoundSnapshot {
            sample_rate: metadata.sample_rate as f64,
            sample_start: s.sample_start,
            sample_length,
            loop_enabled: looped,
            loop_start,
            loop_end,
            crossfade_length,
            internal_preload_size,
            entire_sample_loaded: s.reversed || (!looped && preload_len as u64 >= sample_length),
            reversed: s.reversed,
            num_channels: channels,
            preload,
            small_loop,
            crossfade,
        };

        let bytes = snapshot.size_in_bytes();
        if !self.counters.try_reserve(s.reserved_bytes, bytes) {
            return Err(Error::Loading {
                file: self.reader.reference().path(),
                reason: "Preload error (max memory exceeded)".into(),
            });
        }
        s.reserved_bytes = bytes;
        tracing::debug!(
            "{}: preload {} samples ({} bytes)",
            self.reader.reference().display_name(),
            preload_len,
            bytes
        );
        self.snapshot.store(Arc::new(snapshot));
        Ok(())
    }

    fn build_crossfade(
        &self,
        s: &SoundSettings,
        channels: usize,
        length: usize,
    ) -> Result<SampleBuffer> {
        let mut lead_in = SampleBuffer::new(SampleFormat::Float, channels, length)?;
        let mut tail = SampleBuffer::new(SampleFormat::Float, channels, length)?;
        self.reader
            .read_from_disk(&mut lead_in, 0, length, s.loop_start - length as u64, true)?;
        self.reader
            .read_from_disk(&mut tail, 0, length, s.loop_end - length as u64, true)?;

        let mut crossfade = SampleBuffer::new(self.format, channels, length)?;
        for c in 0..channels {
            for i in 0..length {
                let fade_in = i as f32 / length as f32;
                let value = lead_in.sample(c, i) * fade_in + tail.sample(c, i) * (1.0 - fade_in);
                crossfade.set_sample(c, i, value);
            }
        }
        Ok(crossfade)
    }
}

impl Drop for StreamingSound {
    fn drop(&mut self) {
        let reserved = self.settings.get_mut().reserved_bytes;
        self.counters.release(reserved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sostenuto_codec::{CompressorOptions, LacWriter};
    use std::fs::File;
    use std::io::BufWriter;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn signal(len: usize) -> Vec<i16> {
        (0..len).map(|i| ((i * 7) % 20000) as i16 - 10000).collect()
    }

    fn write_file(dir: &TempDir, data: &[i16]) -> PathBuf {
        let path = dir.path().join("s.lac");
        let mut w = LacWriter::new(
            BufWriter::new(File::create(&path).unwrap()),
            1,
            44100,
            CompressorOptions::diff(),
        )
        .unwrap();
        w.write_fixed(&[data]).unwrap();
        w.finish().unwrap();
        path
    }

    fn config() -> StreamingConfig {
        StreamingConfig::default().with_buffer_format(SampleFormat::Fixed16)
    }

    fn read(sound: &StreamingSound, pos: u64, num: usize) -> Vec<i16> {
        let mut dest = SampleBuffer::new(SampleFormat::Fixed16, 1, num).unwrap();
        sound.fill_sample_buffer(&mut dest, num, pos);
        dest.channel_fixed(0).unwrap().to_vec()
    }

    #[test]
    fn test_internal_preload_size() {
        let dir = TempDir::new().unwrap();
        let sound = StreamingSound::new(FileReference::file(write_file(&dir, &signal(40_000))), &config());
        assert_eq!(sound.internal_preload_size(), 8192);

        sound.set_preload_size(PreloadSize::Samples(100)).unwrap();
        assert_eq!(sound.internal_preload_size(), MINIMUM_PRELOAD);

        sound.set_sample_start_modulation(5000).unwrap();
        sound.set_preload_size(PreloadSize::Samples(3000)).unwrap();
        assert_eq!(sound.internal_preload_size(), 8000);

        sound.set_preload_size(PreloadSize::from_raw(-1)).unwrap();
        assert!(sound.is_entire_sample_loaded());
        assert!(sound.internal_preload_size() >= MINIMUM_PRELOAD);
    }

    #[test]
    fn test_disk_and_preload_agree() {
        let dir = TempDir::new().unwrap();
        let data = signal(40_000);
        let sound = StreamingSound::new(FileReference::file(write_file(&dir, &data)), &config());
        assert_eq!(read(&sound, 100, 1000), &data[100..1100]);
        assert_eq!(read(&sound, 20_000, 1000), &data[20_000..21_000]);
        // straddles the preload end
        assert_eq!(read(&sound, 8000, 1000), &data[8000..9000]);
    }

    #[test]
    fn test_trim_window() {
        let dir = TempDir::new().unwrap();
        let data = signal(40_000);
        let sound = StreamingSound::new(FileReference::file(write_file(&dir, &data)), &config());
        sound.set_sample_start(1000).unwrap();
        sound.set_sample_end(30_000).unwrap();
        assert_eq!(sound.sample_length(), 29_000);
        assert_eq!(read(&sound, 0, 10), &data[1000..1010]);
        assert_eq!(read(&sound, 20_000, 10), &data[21_000..21_010]);

        let tail = read(&sound, 28_995, 10);
        assert_eq!(&tail[..5], &data[29_995..30_000]);
        assert!(tail[5..].iter().all(|s| *s == 0));
        assert!(sound.has_enough_samples_for_block(28_999));
        assert!(!sound.has_enough_samples_for_block(29_000));
    }

    #[test]
    fn test_loop_invariants_clamped() {
        let dir = TempDir::new().unwrap();
        let sound =
            StreamingSound::new(FileReference::file(write_file(&dir, &signal(20_000))), &config());
        sound.set_sample_start(500).unwrap();
        sound.set_loop_start(100).unwrap();
        assert_eq!(sound.loop_start(), 500);
        sound.set_sample_end(10_000).unwrap();
        sound.set_loop_end(50_000).unwrap();
        assert_eq!(sound.loop_end(), 10_000);
    }

    #[test]
    fn test_crossfade_clamped_to_loop_start() {
        let dir = TempDir::new().unwrap();
        let sound =
            StreamingSound::new(FileReference::file(write_file(&dir, &signal(20_000))), &config());
        sound.set_loop_start(100).unwrap();
        sound.set_loop_end(5000).unwrap();
        sound.set_loop_crossfade(1000).unwrap();
        sound.set_loop_enabled(true).unwrap();
        assert_eq!(sound.crossfade_length(), 100);
        assert!(sound.has_enough_samples_for_block(1_000_000));
    }

    #[test]
    fn test_small_loop_buffer_used_beyond_preload() {
        let dir = TempDir::new().unwrap();
        let data = signal(40_000);
        let sound = StreamingSound::new(FileReference::file(write_file(&dir, &data)), &config());
        sound.set_loop_start(20_000).unwrap();
        sound.set_loop_end(20_500).unwrap();
        sound.set_loop_enabled(true).unwrap();
        assert!(sound.snapshot().has_small_loop_buffer());

        let out = read(&sound, 20_400, 1200);
        for (i, v) in out.iter().enumerate() {
            let pos = 20_400 + i;
            let expected = 20_000 + (pos - 20_000) % 500;
            assert_eq!(*v, data[expected], "at {pos}");
        }
    }

    #[test]
    fn test_reversed_sound() {
        let dir = TempDir::new().unwrap();
        let data = signal(5000);
        let sound = StreamingSound::new(FileReference::file(write_file(&dir, &data)), &config());
        sound.set_sample_end(5000).unwrap();
        sound.set_reversed(true).unwrap();
        assert!(sound.is_entire_sample_loaded());
        assert_eq!(read(&sound, 0, 3), vec![data[4999], data[4998], data[4997]]);

        sound.set_reversed(false).unwrap();
        assert_eq!(read(&sound, 0, 3), &data[..3]);
    }

    #[test]
    fn test_purge_and_missing_states() {
        let dir = TempDir::new().unwrap();
        let sound =
            StreamingSound::new(FileReference::file(write_file(&dir, &signal(10_000))), &config());
        assert_eq!(sound.sample_state_string(), "Normal");
        assert!(sound.actual_preload_size() > 0);

        sound.set_purged(true).unwrap();
        assert_eq!(sound.sample_state_string(), "Purged");
        assert_eq!(sound.actual_preload_size(), 0);
        assert!(!sound.has_active_state());

        let missing = StreamingSound::new(FileReference::file(dir.path().join("nope.lac")), &config());
        assert!(missing.is_missing());
        assert_eq!(missing.sample_state_string(), "Missing");
        assert!(missing.last_error().is_some());
    }

    #[test]
    fn test_replace_file_reference_recovers() {
        let dir = TempDir::new().unwrap();
        let sound = StreamingSound::new(FileReference::file(dir.path().join("later.lac")), &config());
        assert!(sound.is_missing());

        let path = write_file(&dir, &signal(10_000));
        sound.replace_file_reference(FileReference::file(path)).unwrap();
        assert!(!sound.is_missing());
        assert_eq!(sound.length_in_samples(), 12_288);
    }

    #[test]
    fn test_peak_value() {
        let dir = TempDir::new().unwrap();
        let mut data = vec![0i16; 9000];
        data[8500] = -16384;
        let sound = StreamingSound::new(FileReference::file(write_file(&dir, &data)), &config());
        assert_eq!(sound.calculate_peak_value().unwrap(), 0.5);
    }

    #[test]
    fn test_mapping_and_pitch() {
        let mapping = BasicMappingData {
            low_key: 48,
            high_key: 72,
            ..Default::default()
        };
        assert!(mapping.applies_to(60, 100));
        assert!(!mapping.applies_to(73, 100));
        approx::assert_relative_eq!(pitch_factor(72, 60), 2.0);
        approx::assert_relative_eq!(pitch_factor(60, 72), 0.5);
    }
}
