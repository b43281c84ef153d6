//! Lossless block codec for sample libraries.
//!
//! Audio is cut into blocks of [`COMPRESSION_BLOCK_SIZE`] frames. Each block is
//! delta coded and bit packed independently, and the header stores the byte
//! offset of every block so a reader can jump to any sample position without
//! decoding what precedes it.
//!
//! Files whose first byte is `0` or `1` are *monoliths*: one channel-layout
//! byte followed by raw little-endian 16-bit interleaved PCM. They carry no
//! index; offsets are computed arithmetically.
//!
//! ```ignore
//! let mut writer = LacWriter::new(file, 2, 44100, CompressorOptions::diff())?;
//! writer.write_float(&[&left, &right])?;
//! let header = writer.finish()?;
//!
//! let mut reader = LacReader::new(File::open(path)?)?;
//! reader.read(&mut buffer, 0, 10_000, 512)?;
//! ```

mod bits;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod header;
pub mod monolith;
pub mod reader;
pub mod writer;

pub use decoder::BlockDecoder;
pub use encoder::{BlockEncoder, CompressorOptions};
pub use error::{Error, Result};
pub use header::{LacHeader, COMPRESSION_BLOCK_SIZE, CURRENT_VERSION};
pub use monolith::{MonolithEntry, MonolithInfo, MonolithWriter};
pub use reader::LacReader;
pub use writer::LacWriter;
