//! Error types.

use std::path::PathBuf;
use thiserror::Error;

/// Error type.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Codec error.
    #[error("Codec error: {0}")]
    Codec(#[from] sostenuto_codec::Error),

    /// Buffer error.
    #[error("Buffer error: {0}")]
    Buffer(#[from] sostenuto_core::Error),

    /// Hound error.
    #[error("Hound error: {0}")]
    Wav(#[from] hound::Error),

    /// A sample could not be loaded. The sound reports itself missing afterwards.
    #[error("Loading error for {file}: {reason}")]
    Loading { file: PathBuf, reason: String },

    /// Sample thread pool error.
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// Rejected configuration value.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

/// Result type.
pub type Result<T> = std::result::Result<T, Error>;
