//! WAV to codec conversion, blocking or on a background thread with progress polling.

use crate::error::{Error, Result};
use crossbeam_channel::Receiver;
use sostenuto_codec::{CompressorOptions, LacHeader, LacWriter, COMPRESSION_BLOCK_SIZE};
use sostenuto_core::float_to_fixed;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

/// Converts the WAV file at `src` into a codec file at `dst`.
pub fn import_wav(src: &Path, dst: &Path, options: CompressorOptions) -> Result<LacHeader> {
    import_wav_with_progress(src, dst, options, |_| {})
}

/// Like [`import_wav`], reporting progress in `0.0..=1.0` after every block.
pub fn import_wav_with_progress(
    src: &Path,
    dst: &Path,
    options: CompressorOptions,
    mut progress: impl FnMut(f32),
) -> Result<LacHeader> {
    let mut reader = hound::WavReader::open(src)?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 || channels > 2 {
        return Err(Error::Loading {
            file: src.to_path_buf(),
            reason: format!("{channels} channels"),
        });
    }
    let total_frames = reader.duration() as usize;

    let out = BufWriter::new(File::create(dst)?);
    let mut writer = LacWriter::new(out, channels, spec.sample_rate, options)?;
    let mut planar = vec![Vec::with_capacity(COMPRESSION_BLOCK_SIZE); channels];
    let mut frames_done = 0usize;

    let mut flush = |planar: &mut Vec<Vec<i16>>, writer: &mut LacWriter<BufWriter<File>>| -> Result<()> {
        let slices: Vec<&[i16]> = planar.iter().map(Vec::as_slice).collect();
        writer.write_fixed(&slices)?;
        frames_done += planar[0].len();
        planar.iter_mut().for_each(Vec::clear);
        if total_frames > 0 {
            progress(frames_done as f32 / total_frames as f32);
        }
        Ok(())
    };

    match spec.sample_format {
        hound::SampleFormat::Float => {
            for (i, sample) in reader.samples::<f32>().enumerate() {
                planar[i % channels].push(float_to_fixed(sample?));
                if i % channels == channels - 1 && planar[0].len() == COMPRESSION_BLOCK_SIZE {
                    flush(&mut planar, &mut writer)?;
                }
            }
        }
        hound::SampleFormat::Int => {
            let bits = spec.bits_per_sample as i32;
            for (i, sample) in reader.samples::<i32>().enumerate() {
                let sample = sample?;
                let value = if bits > 16 {
                    sample >> (bits - 16)
                } else {
                    sample << (16 - bits)
                };
                planar[i % channels].push(value as i16);
                if i % channels == channels - 1 && planar[0].len() == COMPRESSION_BLOCK_SIZE {
                    flush(&mut planar, &mut writer)?;
                }
            }
        }
    }
    if !planar[0].is_empty() {
        flush(&mut planar, &mut writer)?;
    }

    let header = writer.finish()?;
    tracing::info!(
        "imported {} ({} frames, {} channels) to {}",
        src.display(),
        total_frames,
        channels,
        dst.display()
    );
    Ok(header)
}

pub enum ImportStatus {
    /// Progress 0.0..1.0.
    Running(f32),
    Complete(LacHeader),
    Failed(String),
    Pending,
}

/// Handle to a background WAV import.
/// Poll with [`progress()`](ImportHandle::progress) from the UI.
pub struct ImportHandle {
    progress_rx: Receiver<f32>,
    thread: Option<JoinHandle<Result<LacHeader>>>,
    last_progress: Option<f32>,
}

impl ImportHandle {
    /// Starts converting `src` to `dst` on a dedicated thread.
    pub fn start(src: impl AsRef<Path>, dst: impl AsRef<Path>, options: CompressorOptions) -> Result<Self> {
        let src: PathBuf = src.as_ref().to_path_buf();
        let dst: PathBuf = dst.as_ref().to_path_buf();
        let (tx, rx) = crossbeam_channel::bounded(64);

        let thread = std::thread::Builder::new()
            .name("sostenuto-import".into())
            .spawn(move || {
                import_wav_with_progress(&src, &dst, options, |p| {
                    let _ = tx.try_send(p);
                })
            })
            .map_err(|e| Error::ThreadPool(format!("failed to spawn import thread: {e}")))?;

        Ok(Self {
            progress_rx: rx,
            thread: Some(thread),
            last_progress: None,
        })
    }

    /// Latest import progress. Never blocks.
    pub fn progress(&mut self) -> ImportStatus {
        while let Ok(p) = self.progress_rx.try_recv() {
            self.last_progress = Some(p);
        }

        let finished = match &self.thread {
            Some(thread) => thread.is_finished(),
            None => return ImportStatus::Failed("import already consumed".into()),
        };
        if finished {
            if let Some(thread) = self.thread.take() {
                return match thread.join() {
                    Ok(Ok(header)) => ImportStatus::Complete(header),
                    Ok(Err(e)) => ImportStatus::Failed(e.to_string()),
                    Err(_) => ImportStatus::Failed("import thread panicked".into()),
                };
            }
        }

        match self.last_progress {
            Some(p) => ImportStatus::Running(p),
            None => ImportStatus::Pending,
        }
    }

    /// Blocks until the import is done.
    pub fn wait(mut self) -> Result<LacHeader> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .unwrap_or_else(|_| Err(Error::ThreadPool("import thread panicked".into()))),
            None => Err(Error::ThreadPool("import already consumed".into())),
        }
    }

    pub fn is_done(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }
}
