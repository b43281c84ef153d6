//! Disk-streaming sampler.
//!
//! Large sample libraries are played straight from disk. Each
//! [`StreamingSound`] keeps a short preload window in memory; a
//! [`StreamingVoice`] starts from that window while its [`SampleLoader`] asks
//! the [`SampleThreadPool`] to stream the rest into two alternating buffers.
//!
//! ```ignore
//! use sostenuto_sampler::*;
//! use std::sync::Arc;
//!
//! let config = StreamingConfig::default();
//! let pool = Arc::new(SampleThreadPool::new(&config, Arc::new(StreamingMetrics::new()))?);
//! let sounds = SoundPool::new(config);
//! let piano = sounds.load(FileReference::file("piano_c4.lac"))?;
//!
//! let mut voice = StreamingVoice::new(Arc::clone(&pool), &config)?;
//! voice.prepare_to_play(48000.0, 512)?;
//! voice.set_pitch_factor(64, 60, &piano, 1.0);
//! voice.start_note(&piano, 0);
//! voice.render_next_block(&mut [left.as_mut_slice(), right.as_mut_slice()], 0, 512);
//! ```

pub mod config;
pub mod error;
pub mod file_reader;
pub mod import;
pub mod loader;
pub mod metrics;
pub mod pool;
pub mod sound;
pub mod sound_pool;
pub mod voice;

pub use config::StreamingConfig;
pub use error::{Error, Result};
pub use file_reader::{FileReader, FileReference, SampleMetadata};
pub use import::{import_wav, import_wav_with_progress, ImportHandle, ImportStatus};
pub use loader::SampleLoader;
pub use metrics::{StreamingMetrics, StreamingMetricsSnapshot};
pub use pool::{Job, JobState, JobStatus, SampleThreadPool};
pub use sound::{
    pitch_factor, BasicMappingData, PreloadSize, SoundSnapshot, StreamingSound, MINIMUM_PRELOAD,
};
pub use sound_pool::{PoolCounters, SoundPool};
pub use voice::StreamingVoice;
