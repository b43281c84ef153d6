//! Error types.

use thiserror::Error;

/// Error type.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Buffer error.
    #[error("Buffer error: {0}")]
    Buffer(#[from] sostenuto_core::Error),

    /// Header bytes are inconsistent.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Written by a newer codec.
    #[error("Unsupported codec version: {0}")]
    UnsupportedVersion(u8),

    /// Only mono and stereo are supported.
    #[error("Unsupported channel count: {0}")]
    UnsupportedChannelCount(usize),

    /// Encrypted files need a key this reader does not have.
    #[error("Encrypted sample files are not supported")]
    EncryptionUnsupported,

    /// A block record could not be decoded.
    #[error("Corrupt block {index}: {reason}")]
    CorruptBlock { index: usize, reason: &'static str },

    /// Block lookup beyond the index.
    #[error("Block {index} out of range (file has {amount} blocks)")]
    BlockIndexOutOfRange { index: usize, amount: usize },

    /// Compressed payload exceeds the 32-bit offset table.
    #[error("Compressed data exceeds 4 GiB")]
    FileTooLarge,
}

/// Result type.
pub type Result<T> = std::result::Result<T, Error>;
