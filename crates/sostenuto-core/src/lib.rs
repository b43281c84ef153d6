//! Sample buffers and lock-free primitives shared by the sostenuto crates.
//!
//! [`SampleBuffer`] is the planar PCM container every stage of the streaming
//! pipeline reads and writes: codec blocks decode into it, sounds keep their
//! preload window in it and loaders ping-pong between two of them.

pub mod buffer;
pub mod error;
pub mod lockfree;

pub use buffer::{fixed_to_float, float_to_fixed, SampleBuffer, SampleFormat, FIXED_GAIN};
pub use error::{Error, Result};
pub use lockfree::{AtomicDouble, AtomicFlag, AtomicFloat};
