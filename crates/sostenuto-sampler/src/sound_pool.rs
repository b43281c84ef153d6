//! Shared sound registry with a preload memory budget.

use crate::config::StreamingConfig;
use crate::error::{Error, Result};
use crate::file_reader::FileReference;
use crate::sound::StreamingSound;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Resource counters shared by every sound of a pool.
#[derive(Debug)]
pub struct PoolCounters {
    open_handles: Arc<AtomicUsize>,
    preload_bytes: AtomicUsize,
    memory_limit: usize,
}

impl Default for PoolCounters {
    fn default() -> Self {
        Self::with_memory_limit(usize::MAX)
    }
}

impl PoolCounters {
    pub fn with_memory_limit(bytes: usize) -> Self {
        Self {
            open_handles: Arc::new(AtomicUsize::new(0)),
            preload_bytes: AtomicUsize::new(0),
            memory_limit: bytes,
        }
    }

    pub(crate) fn open_handle_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.open_handles)
    }

    pub fn open_file_handles(&self) -> usize {
        self.open_handles.load(Ordering::Acquire)
    }

    pub fn preload_bytes(&self) -> usize {
        self.preload_bytes.load(Ordering::Acquire)
    }

    /// Swaps a reservation of `previous` bytes for one of `new` bytes.
    ///
    /// Fails without changing anything when the total would exceed the limit.
    pub(crate) fn try_reserve(&self, previous: usize, new: usize) -> bool {
        self.preload_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |total| {
                let total = total.saturating_sub(previous).saturating_add(new);
                (total <= self.memory_limit).then_some(total)
            })
            .is_ok()
    }

    pub(crate) fn release(&self, bytes: usize) {
        let _ = self
            .preload_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |total| {
                Some(total.saturating_sub(bytes))
            });
    }
}

/// Sounds keyed by file identity, so two instruments mapping the same file
/// share one preload and one set of handles.
pub struct SoundPool {
    config: StreamingConfig,
    sounds: DashMap<u64, Arc<StreamingSound>>,
    counters: Arc<PoolCounters>,
}

impl SoundPool {
    pub fn new(config: StreamingConfig) -> Self {
        Self {
            config,
            sounds: DashMap::new(),
            counters: Arc::new(PoolCounters::default()),
        }
    }

    /// Caps the preload memory of all sounds in the pool.
    pub fn with_memory_limit(config: StreamingConfig, bytes: usize) -> Self {
        Self {
            config,
            sounds: DashMap::new(),
            counters: Arc::new(PoolCounters::with_memory_limit(bytes)),
        }
    }

    /// Returns the pooled sound for `reference`, loading it on first use.
    ///
    /// A sound that cannot be preloaded is not pooled and its loading error is returned.
    pub fn load(&self, reference: FileReference) -> Result<Arc<StreamingSound>> {
        let key = reference.hash_code();
        if let Some(sound) = self.sounds.get(&key) {
            return Ok(Arc::clone(sound.value()));
        }

        let sound = Arc::new(StreamingSound::with_counters(
            reference.clone(),
            &self.config,
            Arc::clone(&self.counters),
        ));
        if sound.is_missing() {
            return Err(Error::Loading {
                file: reference.path(),
                reason: sound.last_error().unwrap_or_else(|| "missing".into()),
            });
        }
        let entry = self.sounds.entry(key).or_insert(sound);
        tracing::debug!("pooled {}", reference.display_name());
        Ok(Arc::clone(entry.value()))
    }

    pub fn get(&self, reference: &FileReference) -> Option<Arc<StreamingSound>> {
        self.sounds
            .get(&reference.hash_code())
            .map(|s| Arc::clone(s.value()))
    }

    pub fn remove(&self, reference: &FileReference) -> Option<Arc<StreamingSound>> {
        self.sounds.remove(&reference.hash_code()).map(|(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.sounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sounds.is_empty()
    }

    pub fn clear(&self) {
        self.sounds.clear();
    }

    pub fn open_file_handles(&self) -> usize {
        self.counters.open_file_handles()
    }

    pub fn preload_bytes(&self) -> usize {
        self.counters.preload_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sostenuto_codec::{CompressorOptions, LacWriter};
    use sostenuto_core::SampleFormat;
    use std::fs::File;
    use std::io::BufWriter;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, frames: usize) -> FileReference {
        let path = dir.path().join(name);
        let data: Vec<i16> = (0..frames).map(|i| (i % 100) as i16).collect();
        let mut w = LacWriter::new(
            BufWriter::new(File::create(&path).unwrap()),
            1,
            44100,
            CompressorOptions::diff(),
        )
        .unwrap();
        w.write_fixed(&[&data]).unwrap();
        w.finish().unwrap();
        FileReference::file(path)
    }

    #[test]
    fn test_same_file_shares_sound() {
        let dir = TempDir::new().unwrap();
        let pool = SoundPool::new(StreamingConfig::default());
        let reference = write_file(&dir, "a.lac", 10_000);

        let a = pool.load(reference.clone()).unwrap();
        let b = pool.load(reference.clone()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);
        // handles are closed again after preloading
        assert_eq!(pool.open_file_handles(), 0);

        let float_bytes = 8192 * 4;
        assert_eq!(pool.preload_bytes(), float_bytes);
        drop((a, b));
        pool.remove(&reference);
        assert_eq!(pool.preload_bytes(), 0);
    }

    #[test]
    fn test_memory_limit() {
        let dir = TempDir::new().unwrap();
        let config = StreamingConfig::default().with_buffer_format(SampleFormat::Fixed16);
        let pool = SoundPool::with_memory_limit(config, 8192 * 2 + 100);

        pool.load(write_file(&dir, "a.lac", 10_000)).unwrap();
        let err = pool.load(write_file(&dir, "b.lac", 10_000)).err().unwrap();
        assert!(err.to_string().contains("Preload error (max memory exceeded)"));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.preload_bytes(), 8192 * 2);
    }

    #[test]
    fn test_missing_file_not_pooled() {
        let pool = SoundPool::new(StreamingConfig::default());
        assert!(pool.load(FileReference::file("/nowhere/x.lac")).is_err());
        assert!(pool.is_empty());
    }
}
