//! Streaming configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sostenuto_core::SampleFormat;
use std::time::Duration;

/// Runtime switches and sizes for sounds, loaders, voices and the sample thread pool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Ideal streaming buffer length in samples (default: 8192)
    pub buffer_size: usize,
    /// Preload length in samples given to new sounds (default: 8192)
    pub preload_size: usize,
    /// Highest pitch ratio a voice will play (default: 16.0)
    pub max_pitch: f64,
    /// Run jobs on a dedicated thread. When false, jobs run inside `add_job` (default: true)
    pub use_background_thread: bool,
    /// Stop a voice instead of playing silence when its refill is late (default: false)
    pub kill_voices_when_streaming_is_blocked: bool,
    /// Voices replace the host buffer content instead of adding to it (default: true)
    pub overwrite_output: bool,
    /// Capacity of the job queue (default: 2048)
    pub queue_capacity: usize,
    /// Loops shorter than this are cached in memory once (default: 8192)
    pub small_loop_threshold: usize,
    /// Sample type of preload and streaming buffers (default: float)
    pub buffer_format: SampleFormat,
    /// How long the worker blocks on an empty queue before checking for shutdown (default: 500 ms)
    pub idle_wait_ms: u64,
    /// How long shutdown waits for the worker to exit (default: 3000 ms)
    pub shutdown_timeout_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            buffer_size: 8192,
            preload_size: 8192,
            max_pitch: 16.0,
            use_background_thread: true,
            kill_voices_when_streaming_is_blocked: false,
            overwrite_output: true,
            queue_capacity: 2048,
            small_loop_threshold: 8192,
            buffer_format: SampleFormat::Float,
            idle_wait_ms: 500,
            shutdown_timeout_ms: 3000,
        }
    }
}

impl StreamingConfig {
    /// Jobs run synchronously on the calling thread.
    pub fn synchronous() -> Self {
        Self {
            use_background_thread: false,
            ..Default::default()
        }
    }

    pub fn with_buffer_size(mut self, samples: usize) -> Self {
        self.buffer_size = samples;
        self
    }

    pub fn with_preload_size(mut self, samples: usize) -> Self {
        self.preload_size = samples;
        self
    }

    pub fn with_kill_policy(mut self, kill: bool) -> Self {
        self.kill_voices_when_streaming_is_blocked = kill;
        self
    }

    pub fn with_buffer_format(mut self, format: SampleFormat) -> Self {
        self.buffer_format = format;
        self
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::InvalidConfig("buffer_size must be positive".into()));
        }
        if self.max_pitch.is_nan() || self.max_pitch <= 0.0 {
            return Err(Error::InvalidConfig("max_pitch must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig("queue_capacity must be positive".into()));
        }
        Ok(())
    }
}
