//! Per-note playback with linear interpolation.

use crate::config::StreamingConfig;
use crate::error::Result;
use crate::loader::SampleLoader;
use crate::pool::SampleThreadPool;
use crate::sound::{pitch_factor, StreamingSound};
use sostenuto_core::SampleBuffer;
use std::sync::Arc;

/// Extra frames fetched per block so interpolation can look one sample ahead.
const INTERPOLATION_PADDING: usize = 3;

/// Plays one note of a [`StreamingSound`].
///
/// Owned by the audio thread. Every render fetches just enough frames from
/// its [`SampleLoader`] to cover the block at the current pitch, interpolates
/// them into the output and advances the loader by the distance travelled.
pub struct StreamingVoice {
    loader: Arc<SampleLoader>,
    sound: Option<Arc<StreamingSound>>,
    temp: SampleBuffer,
    max_pitch: f64,
    overwrite_output: bool,
    sample_rate: f64,
    block_size: usize,
    /// Playback position relative to the sample start.
    uptime: f64,
    /// Frames advanced per output sample.
    uptime_delta: f64,
    active: bool,
}

impl StreamingVoice {
    pub fn new(pool: Arc<SampleThreadPool>, config: &StreamingConfig) -> Result<Self> {
        Ok(Self {
            loader: SampleLoader::new(pool, config)?,
            sound: None,
            temp: SampleBuffer::empty(config.buffer_format, 2),
            max_pitch: config.max_pitch,
            overwrite_output: config.overwrite_output,
            sample_rate: 44100.0,
            block_size: 0,
            uptime: 0.0,
            uptime_delta: 1.0,
            active: false,
        })
    }

    /// Sizes the scratch buffer and the loader for `block_size` at the highest pitch.
    ///
    /// Allocates. Call before playback starts.
    pub fn prepare_to_play(&mut self, sample_rate: f64, block_size: usize) -> Result<()> {
        self.sample_rate = sample_rate;
        self.block_size = block_size;
        let frames = (block_size as f64 * self.max_pitch).ceil() as usize + INTERPOLATION_PADDING;
        self.temp.set_size(frames)?;
        self.loader.assert_buffer_size(frames)?;
        Ok(())
    }

    pub fn loader(&self) -> &Arc<SampleLoader> {
        &self.loader
    }

    pub fn loaded_sound(&self) -> Option<&Arc<StreamingSound>> {
        self.sound.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn uptime(&self) -> f64 {
        self.uptime
    }

    pub fn uptime_delta(&self) -> f64 {
        self.uptime_delta
    }

    pub fn disk_usage(&self) -> f32 {
        self.loader.get_disk_usage()
    }

    /// Sets the playback ratio for `note` on a sound recorded at `root_note`.
    ///
    /// The ratio includes the sound's sample rate against the playback rate and
    /// is clamped to `[0, max_pitch]`.
    pub fn set_pitch_factor(
        &mut self,
        note: i32,
        root_note: i32,
        sound: &StreamingSound,
        global_pitch_factor: f64,
    ) {
        let ratio = pitch_factor(note, root_note)
            * global_pitch_factor
            * (sound.sample_rate() / self.sample_rate);
        self.uptime_delta = ratio.clamp(0.0, self.max_pitch);
    }

    /// Starts `sound` at `start_offset` samples past its start. Returns false if it cannot play.
    pub fn start_note(&mut self, sound: &Arc<StreamingSound>, start_offset: u64) -> bool {
        self.uptime = start_offset as f64;
        self.active = self.loader.start_note(sound, start_offset);
        self.sound = self.active.then(|| Arc::clone(sound));
        self.active
    }

    pub fn stop_note(&mut self) {
        if self.active {
            self.reset();
        }
    }

    fn reset(&mut self) {
        self.loader.stop_note();
        self.active = false;
        self.uptime = 0.0;
    }

    /// Renders `num` samples into `output[..][start..start + num]` at a constant pitch.
    pub fn render_next_block(&mut self, output: &mut [&mut [f32]], start: usize, num: usize) {
        self.render_next_block_with_pitch(output, start, num, None);
    }

    /// Renders with an optional per-sample pitch multiplier on top of the voice pitch.
    pub fn render_next_block_with_pitch(
        &mut self,
        output: &mut [&mut [f32]],
        start: usize,
        num: usize,
        pitch: Option<&[f32]>,
    ) {
        if !self.active || output.is_empty() {
            return;
        }
        let num = output
            .iter()
            .map(|ch| ch.len().saturating_sub(start))
            .min()
            .unwrap_or(0)
            .min(num);

        let distance = match pitch {
            Some(p) => p
                .iter()
                .take(num)
                .map(|m| (self.uptime_delta * *m as f64).clamp(0.0, self.max_pitch))
                .sum::<f64>(),
            None => self.uptime_delta * num as f64,
        };

        let offset = self.uptime.fract();
        let needed = ((offset + distance).ceil() as usize + INTERPOLATION_PADDING)
            .min(self.temp.num_samples());
        self.loader.fill_voice_buffer(&mut self.temp, needed);

        // nothing from the fetched block reaches the output if streaming killed the voice
        self.uptime += distance;
        if !self.loader.advance_read_index(self.uptime) {
            if self.overwrite_output {
                for channel in output.iter_mut() {
                    channel[start..start + num].fill(0.0);
                }
            }
            self.reset();
            return;
        }

        let gain = self.temp.gain();
        let stereo_out = output.len() > 1;
        let mut pos = offset;
        for i in 0..num {
            let index = pos as usize;
            let alpha = (pos - index as f64) as f32;
            let left = interpolate(&self.temp, 0, index, alpha) * gain;
            let right = interpolate(&self.temp, 1, index, alpha) * gain;

            let out = start + i;
            if self.overwrite_output {
                output[0][out] = left;
                if stereo_out {
                    output[1][out] = right;
                }
            } else {
                output[0][out] += left;
                if stereo_out {
                    output[1][out] += right;
                }
            }

            pos += match pitch {
                Some(p) => {
                    let m = p.get(i).copied().unwrap_or(1.0) as f64;
                    (self.uptime_delta * m).clamp(0.0, self.max_pitch)
                }
                None => self.uptime_delta,
            };
        }

        let still_playing = self
            .sound
            .as_ref()
            .is_some_and(|s| s.has_enough_samples_for_block(self.uptime as u64));
        if !still_playing {
            self.reset();
        }
    }
}

#[inline]
fn interpolate(buffer: &SampleBuffer, channel: usize, index: usize, alpha: f32) -> f32 {
    let a = buffer.sample_raw(channel, index);
    let b = buffer.sample_raw(channel, index + 1);
    a + (b - a) * alpha
}

impl Drop for StreamingVoice {
    fn drop(&mut self) {
        if self.active {
            self.loader.stop_note();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_reader::FileReference;
    use crate::metrics::StreamingMetrics;
    use approx::assert_relative_eq;
    use sostenuto_codec::{CompressorOptions, LacWriter};
    use std::fs::File;
    use std::io::BufWriter;
    use tempfile::TempDir;

    fn setup(data: &[i16], config: StreamingConfig) -> (TempDir, Arc<StreamingSound>, StreamingVoice) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v.lac");
        let mut w = LacWriter::new(
            BufWriter::new(File::create(&path).unwrap()),
            1,
            44100,
            CompressorOptions::diff(),
        )
        .unwrap();
        w.write_fixed(&[data]).unwrap();
        w.finish().unwrap();

        let sound = Arc::new(StreamingSound::new(FileReference::file(path), &config));
        let pool = Arc::new(SampleThreadPool::new(&config, Arc::new(StreamingMetrics::new())).unwrap());
        let mut voice = StreamingVoice::new(pool, &config).unwrap();
        voice.prepare_to_play(44100.0, 256).unwrap();
        (dir, sound, voice)
    }

    fn ramp(len: usize) -> Vec<i16> {
        (0..len).map(|i| (i % 20000) as i16).collect()
    }

    #[test]
    fn test_unity_pitch_reproduces_sample() {
        let data = ramp(50_000);
        let config = StreamingConfig::synchronous().with_preload_size(4096);
        let (_dir, sound, mut voice) = setup(&data, config);
        voice.set_pitch_factor(60, 60, &sound, 1.0);
        assert!(voice.start_note(&sound, 0));

        let mut left = vec![0.0f32; 256];
        let mut right = vec![0.0f32; 256];
        for block in 0..100 {
            voice.render_next_block(&mut [left.as_mut_slice(), right.as_mut_slice()], 0, 256);
            for i in 0..256 {
                let expected = data[block * 256 + i] as f32 / 32768.0;
                assert_relative_eq!(left[i], expected, epsilon = 1e-6);
                assert_relative_eq!(right[i], expected, epsilon = 1e-6);
            }
        }
        assert_eq!(voice.uptime(), 25_600.0);
    }

    #[test]
    fn test_octave_up_skips_every_other_sample() {
        let data = ramp(50_000);
        let config = StreamingConfig::synchronous();
        let (_dir, sound, mut voice) = setup(&data, config);
        voice.set_pitch_factor(72, 60, &sound, 1.0);
        assert_relative_eq!(voice.uptime_delta(), 2.0);
        voice.start_note(&sound, 0);

        let mut out = vec![0.0f32; 128];
        voice.render_next_block(&mut [out.as_mut_slice()], 0, 128);
        assert_relative_eq!(out[10], data[20] as f32 / 32768.0, epsilon = 1e-6);
        assert_eq!(voice.uptime(), 256.0);
    }

    #[test]
    fn test_half_speed_interpolates() {
        let data = ramp(50_000);
        let (_dir, sound, mut voice) = setup(&data, StreamingConfig::synchronous());
        voice.set_pitch_factor(48, 60, &sound, 1.0);
        voice.start_note(&sound, 100);

        let mut out = vec![0.0f32; 4];
        voice.render_next_block(&mut [out.as_mut_slice()], 0, 4);
        assert_relative_eq!(out[1], 100.5 / 32768.0, epsilon = 1e-6);
    }

    #[test]
    fn test_pitch_is_clamped() {
        let data = ramp(1000);
        let (_dir, sound, mut voice) = setup(&data, StreamingConfig::synchronous());
        voice.set_pitch_factor(127, 0, &sound, 1.0);
        assert_eq!(voice.uptime_delta(), 16.0);
        voice.set_pitch_factor(60, 60, &sound, -1.0);
        assert_eq!(voice.uptime_delta(), 0.0);
    }

    #[test]
    fn test_voice_stops_at_sample_end() {
        let data = ramp(1000);
        let (_dir, sound, mut voice) = setup(&data, StreamingConfig::synchronous());
        voice.start_note(&sound, 0);
        let mut out = vec![0.0f32; 256];
        // 4096 padded frames
        for _ in 0..16 {
            voice.render_next_block(&mut [out.as_mut_slice()], 0, 256);
        }
        assert!(!voice.is_active());
        assert_eq!(sound.reader().voice_count(), 0);
    }

    #[test]
    fn test_add_mode_mixes_into_output() {
        let data = vec![16384i16; 10_000];
        let config = StreamingConfig {
            overwrite_output: false,
            ..StreamingConfig::synchronous()
        };
        let (_dir, sound, mut voice) = setup(&data, config);
        voice.start_note(&sound, 0);
        let mut out = vec![0.25f32; 8];
        voice.render_next_block(&mut [out.as_mut_slice()], 2, 4);
        assert_eq!(out[0], 0.25);
        assert_relative_eq!(out[3], 0.75);
        assert_eq!(out[7], 0.25);
    }

    #[test]
    fn test_per_sample_pitch() {
        let data = ramp(50_000);
        let (_dir, sound, mut voice) = setup(&data, StreamingConfig::synchronous());
        voice.start_note(&sound, 0);
        let pitch = [2.0f32; 64];
        let mut out = vec![0.0f32; 64];
        voice.render_next_block_with_pitch(&mut [out.as_mut_slice()], 0, 64, Some(&pitch));
        assert_eq!(voice.uptime(), 128.0);
        assert_relative_eq!(out[5], 10.0 / 32768.0, epsilon = 1e-6);
    }
}
