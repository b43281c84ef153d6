//! Fixtures shared by the sostenuto integration tests.
//!
//! Signals are deterministic so failures reproduce. Codec files are written
//! into a [`TempDir`] owned by the caller; keep it alive for as long as the
//! sound that reads from it.

#![allow(dead_code)]

use sostenuto::prelude::*;
use sostenuto::{LacHeader, LacWriter, MonolithInfo, MonolithWriter, SampleFormat};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Default test sample rate
pub const TEST_SAMPLE_RATE: f64 = 44100.0;

/// Standard block size for render loops
pub const TEST_BLOCK_SIZE: usize = 256;

/// Tolerance for values that went through one float conversion.
pub const FLOAT_EPSILON: f32 = 1e-6;

/// Tolerance for crossfaded values (two products and a sum in f32).
pub const CROSSFADE_EPSILON: f32 = 1e-5;

/// Routes `tracing` output through the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Sawtooth with a period that does not divide the codec block size.
pub fn sawtooth(len: usize) -> Vec<i16> {
    (0..len).map(|i| ((i * 7) % 20000) as i16 - 10000).collect()
}

/// Reproducible full-range noise.
pub fn noise(len: usize, seed: u64) -> Vec<i16> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 48) as i16
        })
        .collect()
}

pub fn to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|s| *s as f32 / 32768.0).collect()
}

pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
}

/// Writes `channels` as a codec file named `name` inside `dir`.
pub fn write_codec_file(dir: &TempDir, name: &str, channels: &[&[i16]]) -> (PathBuf, LacHeader) {
    let path = dir.path().join(name);
    let header = write_codec_to(&path, channels, CompressorOptions::diff());
    (path, header)
}

pub fn write_codec_to(path: &Path, channels: &[&[i16]], options: CompressorOptions) -> LacHeader {
    let out = BufWriter::new(File::create(path).expect("create codec file"));
    let mut writer =
        LacWriter::new(out, channels.len(), TEST_SAMPLE_RATE as u32, options).expect("writer");
    writer.write_fixed(channels).expect("write");
    writer.finish().expect("finish")
}

/// Writes every sample into one monolith container.
pub fn write_monolith(dir: &TempDir, name: &str, samples: &[&[i16]]) -> MonolithInfo {
    let mut writer = MonolithWriter::create(dir.path().join(name), 1, TEST_SAMPLE_RATE as u32)
        .expect("create monolith");
    for (i, data) in samples.iter().enumerate() {
        writer.add_sample(format!("sample{i}"), &[*data]).expect("add sample");
    }
    writer.finish().expect("finish monolith")
}

/// Config with fixed-point buffers so rendered values compare exactly.
pub fn fixed_config() -> StreamingConfig {
    StreamingConfig::synchronous().with_buffer_format(SampleFormat::Fixed16)
}

pub fn load_sound(path: &Path, config: &StreamingConfig) -> Arc<StreamingSound> {
    let sound = Arc::new(StreamingSound::new(FileReference::file(path), config));
    assert!(!sound.is_missing(), "{:?}", sound.last_error());
    sound
}

/// Voice-local value a sound should play at `pos`, as a normalised float.
///
/// `loop_range` is `(start, end, crossfade)` relative to the sample start.
pub fn expected_sample(data: &[i16], pos: u64, loop_range: Option<(u64, u64, u64)>) -> f32 {
    let value = |i: u64| data.get(i as usize).copied().unwrap_or(0) as f32 / 32768.0;
    let Some((start, end, crossfade)) = loop_range else {
        return value(pos);
    };
    let pos = if pos >= end {
        start + (pos - start) % (end - start)
    } else {
        pos
    };
    if crossfade > 0 && pos >= end - crossfade && pos < end {
        let i = pos - (end - crossfade);
        let fade_in = i as f32 / crossfade as f32;
        return value(start - crossfade + i) * fade_in + value(end - crossfade + i) * (1.0 - fade_in);
    }
    value(pos)
}
