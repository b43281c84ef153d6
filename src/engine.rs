//! StreamingEngine: a fixed bank of streaming voices sharing one sample thread pool.

use crate::{Error, Result};
use sostenuto_sampler::{
    SampleThreadPool, StreamingConfig, StreamingMetrics, StreamingMetricsSnapshot, StreamingSound,
    StreamingVoice,
};
use std::sync::Arc;

/// Polyphonic front end over the streaming sampler.
///
/// Owns one [`SampleThreadPool`] and a fixed number of [`StreamingVoice`]s.
/// Voices always mix into the host buffer; [`render`](Self::render) clears the
/// requested range first.
///
/// ```ignore
/// let mut engine = StreamingEngine::builder().voices(32).build()?;
/// engine.prepare_to_play(48000.0, 512)?;
/// let voice = engine.note_on(&piano, 64, 60, 1.0);
/// engine.render(&mut [left.as_mut_slice(), right.as_mut_slice()], 0, 512);
/// ```
pub struct StreamingEngine {
    config: StreamingConfig,
    pool: Arc<SampleThreadPool>,
    metrics: Arc<StreamingMetrics>,
    voices: Vec<StreamingVoice>,
    sample_rate: f64,
    block_size: usize,
}

impl StreamingEngine {
    pub fn builder() -> StreamingEngineBuilder {
        StreamingEngineBuilder::default()
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<SampleThreadPool> {
        &self.pool
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn num_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn voice(&self, index: usize) -> Option<&StreamingVoice> {
        self.voices.get(index)
    }

    /// Resizes every voice for `block_size` frames at `sample_rate`. Allocates.
    pub fn prepare_to_play(&mut self, sample_rate: f64, block_size: usize) -> Result<()> {
        if sample_rate <= 0.0 || block_size == 0 {
            return Err(Error::Engine(format!(
                "invalid playback setup: {sample_rate} Hz, {block_size} frames"
            )));
        }
        for voice in &mut self.voices {
            voice.prepare_to_play(sample_rate, block_size)?;
        }
        self.sample_rate = sample_rate;
        self.block_size = block_size;
        tracing::debug!(
            "prepared {} voices for {} Hz / {} frames",
            self.voices.len(),
            sample_rate,
            block_size
        );
        Ok(())
    }

    /// Starts `sound` on the first idle voice, pitched from `root_note` to `note`.
    ///
    /// Returns the voice index, or `None` when every voice is busy or the sound
    /// cannot play.
    pub fn note_on(
        &mut self,
        sound: &Arc<StreamingSound>,
        note: i32,
        root_note: i32,
        global_pitch_factor: f64,
    ) -> Option<usize> {
        let index = self.voices.iter().position(|v| !v.is_active())?;
        let voice = &mut self.voices[index];
        voice.set_pitch_factor(note, root_note, sound, global_pitch_factor);
        if voice.start_note(sound, 0) {
            Some(index)
        } else {
            tracing::debug!("note {} rejected by sound {:?}", note, sound.file_reference());
            None
        }
    }

    pub fn note_off(&mut self, voice: usize) {
        if let Some(v) = self.voices.get_mut(voice) {
            v.stop_note();
        }
    }

    pub fn all_notes_off(&mut self) {
        self.voices.iter_mut().for_each(StreamingVoice::stop_note);
    }

    /// Renders the sum of all active voices into `output[..][start..start + num]`.
    pub fn render(&mut self, output: &mut [&mut [f32]], start: usize, num: usize) {
        for channel in output.iter_mut() {
            let end = (start + num).min(channel.len());
            if start < end {
                channel[start..end].fill(0.0);
            }
        }
        for voice in self.voices.iter_mut().filter(|v| v.is_active()) {
            voice.render_next_block(output, start, num);
        }
    }

    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    /// Highest disk load seen since the last call, across the pool and every voice.
    pub fn disk_usage(&self) -> f32 {
        self.voices
            .iter()
            .map(StreamingVoice::disk_usage)
            .fold(self.pool.disk_usage() as f32, f32::max)
    }

    pub fn metrics(&self) -> StreamingMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl Drop for StreamingEngine {
    fn drop(&mut self) {
        self.all_notes_off();
        self.pool.shutdown();
    }
}

/// Builder for [`StreamingEngine`].
pub struct StreamingEngineBuilder {
    config: StreamingConfig,
    voices: usize,
    metrics: Option<Arc<StreamingMetrics>>,
}

impl Default for StreamingEngineBuilder {
    fn default() -> Self {
        Self {
            config: StreamingConfig::default(),
            voices: 16,
            metrics: None,
        }
    }
}

impl StreamingEngineBuilder {
    pub fn config(mut self, config: StreamingConfig) -> Self {
        self.config = config;
        self
    }

    /// Default: 16
    pub fn voices(mut self, count: usize) -> Self {
        self.voices = count;
        self
    }

    /// Shares an existing metrics sink instead of creating one.
    pub fn metrics(mut self, metrics: Arc<StreamingMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<StreamingEngine> {
        if self.voices == 0 {
            return Err(Error::Engine("at least one voice is required".into()));
        }
        self.config.validate()?;

        // Voices are summed, so they must never overwrite each other.
        let config = StreamingConfig {
            overwrite_output: false,
            ..self.config
        };
        let metrics = self.metrics.unwrap_or_default();
        let pool = Arc::new(SampleThreadPool::new(&config, Arc::clone(&metrics))?);
        let voices = (0..self.voices)
            .map(|_| StreamingVoice::new(Arc::clone(&pool), &config))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        tracing::info!(
            "streaming engine ready: {} voices, {} background thread",
            voices.len(),
            if pool.is_synchronous() { "no" } else { "one" }
        );

        Ok(StreamingEngine {
            config,
            pool,
            metrics,
            voices,
            sample_rate: 44100.0,
            block_size: 0,
        })
    }
}
