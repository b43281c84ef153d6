//! Error types.

use thiserror::Error;

/// Error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The allocator refused a buffer of the requested size.
    #[error("Failed to allocate {channels} x {samples} sample buffer")]
    AllocationFailed { channels: usize, samples: usize },

    /// Only mono and stereo buffers exist.
    #[error("Unsupported channel count: {0}")]
    InvalidChannelCount(usize),
}

/// Result type.
pub type Result<T> = std::result::Result<T, Error>;
