//! # sostenuto
//!
//! Disk-streaming sampler engine.
//!
//! ## Architecture
//!
//! sostenuto is an umbrella crate over:
//! - **sostenuto-core** - Sample buffers and lock-free primitives
//! - **sostenuto-codec** - Lossless block codec and monolith containers
//! - **sostenuto-sampler** - Streaming sounds, double-buffered loaders, voices
//!   and the sample thread pool
//!
//! ## Quick Start
//!
//! ```ignore
//! use sostenuto::prelude::*;
//!
//! let mut engine = StreamingEngine::builder()
//!     .config(StreamingConfig::default())
//!     .voices(32)
//!     .build()?;
//! engine.prepare_to_play(48000.0, 512)?;
//!
//! let sounds = SoundPool::new(*engine.config());
//! let piano = sounds.load(FileReference::file("piano_c4.lac"))?;
//! engine.note_on(&piano, 64, 60, 1.0);
//!
//! engine.render(&mut [left.as_mut_slice(), right.as_mut_slice()], 0, 512);
//! ```

pub mod engine;
pub mod error;

/// Re-export of sostenuto-core for direct access
pub use sostenuto_core as core;

/// Re-export of sostenuto-codec for direct access
pub use sostenuto_codec as codec;

/// Re-export of sostenuto-sampler for direct access
pub use sostenuto_sampler as sampler;

pub use engine::{StreamingEngine, StreamingEngineBuilder};
pub use error::{Error, Result};

pub use sostenuto_core::{SampleBuffer, SampleFormat};

pub use sostenuto_codec::{
    CompressorOptions, LacHeader, LacReader, LacWriter, MonolithInfo, MonolithWriter,
    COMPRESSION_BLOCK_SIZE,
};

pub use sostenuto_sampler::{
    import_wav, BasicMappingData, FileReference, ImportHandle, ImportStatus, PreloadSize,
    SampleLoader, SampleThreadPool, SoundPool, StreamingConfig, StreamingMetrics,
    StreamingMetricsSnapshot, StreamingSound, StreamingVoice,
};

pub mod prelude {
    pub use crate::{
        CompressorOptions, Error, FileReference, PreloadSize, Result, SoundPool, StreamingConfig,
        StreamingEngine, StreamingSound,
    };
}
