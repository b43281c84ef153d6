//! File handles behind a streaming sound.
//!
//! A [`FileReader`] owns the open handles of one sample and hands out frame
//! ranges. Handles are opened on demand, shared by every voice playing the
//! sample and only closed once the voice count drops back to zero.

use crate::error::{Error, Result};
use memmap2::Mmap;
use parking_lot::{Mutex, RwLock};
use sostenuto_codec::monolith::read_interleaved;
use sostenuto_codec::{LacReader, MonolithInfo};
use sostenuto_core::SampleBuffer;
use std::collections::hash_map::DefaultHasher;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Where a sample's audio lives.
#[derive(Debug, Clone, PartialEq)]
pub enum FileReference {
    /// A codec or WAV file of its own.
    File(PathBuf),
    /// Entry `index` of a monolith container.
    Monolith {
        info: Arc<MonolithInfo>,
        index: usize,
    },
}

impl FileReference {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        FileReference::File(path.into())
    }

    pub fn is_monolith(&self) -> bool {
        matches!(self, FileReference::Monolith { .. })
    }

    /// Path of the file on disk (the container for monolith entries).
    pub fn path(&self) -> PathBuf {
        match self {
            FileReference::File(path) => path.clone(),
            FileReference::Monolith { info, .. } => info.path.clone().unwrap_or_default(),
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            FileReference::File(path) => path.display().to_string(),
            FileReference::Monolith { info, index } => match info.entry(*index) {
                Some(entry) => format!("{}:{}", self.path().display(), entry.name),
                None => format!("{}:#{}", self.path().display(), index),
            },
        }
    }

    /// Identity used by [`SoundPool`](crate::SoundPool) to share sounds.
    pub fn hash_code(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.path().hash(&mut hasher);
        if let FileReference::Monolith { index, .. } = self {
            index.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Format facts read when the handles are first opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleMetadata {
    pub sample_rate: u32,
    pub num_channels: usize,
    pub length_in_samples: u64,
}

/// Sequential readers. Each needs exclusive access while reading.
enum ReaderKind {
    Codec(LacReader<BufReader<File>>),
    Wav(WavSource),
}

impl ReaderKind {
    fn read(
        &mut self,
        dest: &mut SampleBuffer,
        dest_offset: usize,
        pos: u64,
        num: usize,
    ) -> Result<()> {
        match self {
            ReaderKind::Codec(reader) => Ok(reader.read(dest, dest_offset, pos, num)?),
            ReaderKind::Wav(source) => source.read(dest, dest_offset, pos, num),
        }
    }
}

/// Raw PCM view of an uncompressed file. Reads only need `&self`.
struct MappedSource {
    map: Mmap,
    data_offset: usize,
    num_channels: usize,
    frames: u64,
}

impl MappedSource {
    fn map_range(&self, pos: u64, num: usize) -> bool {
        pos + num as u64 <= self.frames
    }

    fn read(&self, dest: &mut SampleBuffer, dest_offset: usize, pos: u64, num: usize) {
        let frame_bytes = self.num_channels * 2;
        let start = (self.data_offset + pos as usize * frame_bytes).min(self.map.len());
        let end = (start + num * frame_bytes).min(self.map.len());
        read_interleaved(&self.map[start..end], self.num_channels, dest, dest_offset);
    }
}

struct WavSource {
    reader: hound::WavReader<BufReader<File>>,
    spec: hound::WavSpec,
    position: u64,
}

impl WavSource {
    fn open(path: &Path) -> Result<Self> {
        let reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        if spec.channels == 0 || spec.channels > 2 {
            return Err(Error::Loading {
                file: path.to_path_buf(),
                reason: format!("{} channels", spec.channels),
            });
        }
        Ok(Self {
            reader,
            spec,
            position: 0,
        })
    }

    fn read(
        &mut self,
        dest: &mut SampleBuffer,
        dest_offset: usize,
        pos: u64,
        num: usize,
    ) -> Result<()> {
        let frames = (self.reader.duration() as u64).saturating_sub(pos).min(num as u64) as usize;
        if frames == 0 {
            return Ok(());
        }
        if self.position != pos {
            self.reader.seek(pos as u32)?;
        }
        self.position = u64::MAX;

        let channels = self.spec.channels as usize;
        let total = frames * channels;
        match self.spec.sample_format {
            hound::SampleFormat::Float => {
                for (i, s) in self.reader.samples::<f32>().take(total).enumerate() {
                    dest.set_sample(i % channels, dest_offset + i / channels, s?);
                }
            }
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1u32 << (self.spec.bits_per_sample - 1)) as f32;
                for (i, s) in self.reader.samples::<i32>().take(total).enumerate() {
                    dest.set_sample(i % channels, dest_offset + i / channels, s? as f32 * scale);
                }
            }
        }
        if channels == 1 && dest.num_channels() == 2 {
            for i in dest_offset..dest_offset + frames {
                let left = dest.sample(0, i);
                dest.set_sample(1, i, left);
            }
        }
        self.position = pos + frames as u64;
        Ok(())
    }
}

struct Handles {
    streamed: Mutex<ReaderKind>,
    mapped: Option<MappedSource>,
    metadata: SampleMetadata,
    /// Start of the sample inside the file, in frames.
    section_offset: u64,
}

impl Handles {
    fn open(reference: &FileReference) -> Result<Self> {
        let path = reference.path();
        let loading = |reason: String| Error::Loading {
            file: path.clone(),
            reason,
        };

        if !path.exists() {
            return Err(loading("file not found".into()));
        }

        let is_wav = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
        if is_wav && !reference.is_monolith() {
            let source = WavSource::open(&path)?;
            let metadata = SampleMetadata {
                sample_rate: source.spec.sample_rate,
                num_channels: source.spec.channels as usize,
                length_in_samples: source.reader.duration() as u64,
            };
            return Ok(Self {
                streamed: Mutex::new(ReaderKind::Wav(source)),
                mapped: None,
                metadata,
                section_offset: 0,
            });
        }

        let file = File::open(&path)?;
        let mut reader = LacReader::new(BufReader::new(file.try_clone()?))?;
        if let FileReference::Monolith { info, .. } = reference {
            reader = reader.with_sample_rate(info.sample_rate);
        }
        let num_channels = reader.num_channels();

        let (section_offset, length_in_samples) = match reference {
            FileReference::File(_) => (0, reader.length_in_samples()),
            FileReference::Monolith { info, index } => {
                let entry = info
                    .entry(*index)
                    .ok_or_else(|| loading(format!("no monolith entry {index}")))?;
                if !reader.is_monolith() {
                    return Err(loading("container is not a monolith".into()));
                }
                (entry.offset, entry.length)
            }
        };

        let mapped = if reader.is_monolith() {
            // SAFETY: sample files are opened read-only and are not expected to
            // be truncated while mapped.
            match unsafe { Mmap::map(&file) } {
                Ok(map) => Some(MappedSource {
                    map,
                    data_offset: reader.header().header_size() as usize,
                    num_channels,
                    frames: reader.length_in_samples(),
                }),
                Err(e) => {
                    tracing::warn!("memory map of {} failed: {}", path.display(), e);
                    None
                }
            }
        } else {
            None
        };

        let metadata = SampleMetadata {
            sample_rate: reader.sample_rate(),
            num_channels,
            length_in_samples,
        };
        Ok(Self {
            streamed: Mutex::new(ReaderKind::Codec(reader)),
            mapped,
            metadata,
            section_offset,
        })
    }

    fn read(
        &self,
        dest: &mut SampleBuffer,
        dest_offset: usize,
        num: usize,
        pos: u64,
        prefer_memory_mapped: bool,
    ) -> Result<()> {
        let valid = self
            .metadata
            .length_in_samples
            .saturating_sub(pos)
            .min(num as u64) as usize;
        if valid == 0 {
            return Ok(());
        }
        let file_pos = self.section_offset + pos;

        if prefer_memory_mapped {
            if let Some(mapped) = &self.mapped {
                if mapped.map_range(file_pos, valid) {
                    mapped.read(dest, dest_offset, file_pos, valid);
                    return Ok(());
                }
            }
        }
        self.streamed.lock().read(dest, dest_offset, file_pos, valid)
    }
}

/// Shared, reference-counted access to one sample's file.
pub struct FileReader {
    reference: RwLock<FileReference>,
    handles: RwLock<Option<Handles>>,
    voice_count: AtomicUsize,
    open_handles: Arc<AtomicUsize>,
}

impl FileReader {
    /// `open_handles` is bumped while this reader holds an open file.
    pub fn new(reference: FileReference, open_handles: Arc<AtomicUsize>) -> Self {
        Self {
            reference: RwLock::new(reference),
            handles: RwLock::new(None),
            voice_count: AtomicUsize::new(0),
            open_handles,
        }
    }

    pub fn reference(&self) -> FileReference {
        self.reference.read().clone()
    }

    /// Points the reader at another file. Open handles are dropped.
    pub fn set_reference(&self, reference: FileReference) {
        let mut handles = self.handles.write();
        if handles.take().is_some() {
            self.open_handles.fetch_sub(1, Ordering::AcqRel);
        }
        *self.reference.write() = reference;
    }

    pub fn has_open_handles(&self) -> bool {
        self.handles.read().is_some()
    }

    /// Opens the file if it is not open yet.
    pub fn open_file_handles(&self) -> Result<()> {
        if self.handles.read().is_some() {
            return Ok(());
        }
        let mut handles = self.handles.write();
        if handles.is_none() {
            let reference = self.reference();
            *handles = Some(Handles::open(&reference)?);
            self.open_handles.fetch_add(1, Ordering::AcqRel);
            tracing::debug!("opened {}", reference.display_name());
        }
        Ok(())
    }

    /// Closes the file unless a voice still uses it or it is a shared monolith.
    ///
    /// Returns `true` if a handle was closed.
    pub fn close_file_handles(&self) -> bool {
        if self.voice_count() > 0 || self.reference.read().is_monolith() {
            return false;
        }
        let mut handles = self.handles.write();
        // a voice may have started while we waited for the lock
        if self.voice_count() > 0 {
            return false;
        }
        if handles.take().is_some() {
            self.open_handles.fetch_sub(1, Ordering::AcqRel);
            tracing::debug!("closed {}", self.reference.read().display_name());
            true
        } else {
            false
        }
    }

    pub fn metadata(&self) -> Result<SampleMetadata> {
        self.open_file_handles()?;
        self.handles
            .read()
            .as_ref()
            .map(|h| h.metadata)
            .ok_or_else(|| Error::Loading {
                file: self.reference().path(),
                reason: "handles closed while reading metadata".into(),
            })
    }

    pub fn voice_count(&self) -> usize {
        self.voice_count.load(Ordering::Acquire)
    }

    pub fn increase_voice_count(&self) -> usize {
        self.voice_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Never goes below zero. Returns the remaining count.
    pub fn decrease_voice_count(&self) -> usize {
        let previous = self
            .voice_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some(c.saturating_sub(1)))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    /// Reads `num` frames at sample position `pos` into `dest`.
    ///
    /// The destination range is zeroed first, so whatever part of it a failed
    /// or short read did not reach stays silent.
    pub fn read_from_disk(
        &self,
        dest: &mut SampleBuffer,
        dest_offset: usize,
        num: usize,
        pos: u64,
        prefer_memory_mapped: bool,
    ) -> Result<()> {
        dest.clear_range(dest_offset, num);
        self.open_file_handles()?;

        let handles = self.handles.read();
        let Some(handles) = handles.as_ref() else {
            return Ok(());
        };
        let result = handles.read(dest, dest_offset, num, pos, prefer_memory_mapped);
        if result.is_err() {
            dest.clear_range(dest_offset, num);
        }
        result
    }
}

impl Drop for FileReader {
    fn drop(&mut self) {
        if self.handles.get_mut().take().is_some() {
            self.open_handles.fetch_sub(1, Ordering::AcqRel);
        }
    }
}
