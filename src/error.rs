//! Error type for the sostenuto umbrella crate.
//!
//! Wraps every subsystem error so `?` works across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] sostenuto_core::Error),

    #[error("Codec: {0}")]
    Codec(#[from] sostenuto_codec::Error),

    #[error("Sampler: {0}")]
    Sampler(#[from] sostenuto_sampler::Error),

    #[error("Engine: {0}")]
    Engine(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
