//! Double-buffered streaming for one voice.
//!
//! A [`SampleLoader`] plays from one of three sources: the sound's preload
//! window right after a note starts, then alternately from two streaming
//! buffers. While the audio thread reads one buffer the sample thread pool
//! fills the other. Each buffer sits behind a mutex that the audio thread only
//! ever `try_lock`s: a buffer that is being filled reads as silence instead of
//! blocking the callback.
//!
//! Every fill request carries a sequence number. A buffer only becomes the
//! read source once it holds the data of the latest request, so fills that
//! were overtaken by a new note or a stop are never played.

use crate::config::StreamingConfig;
use crate::error::Result;
use crate::metrics::StreamingMetrics;
use crate::pool::{Job, JobState, JobStatus, SampleThreadPool};
use crate::sound::{SoundSnapshot, StreamingSound};
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use sostenuto_core::{AtomicDouble, AtomicFlag, AtomicFloat, SampleBuffer, SampleFormat};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

const SOURCE_PRELOAD: u8 = 2;

/// Streaming buffers are always stereo; mono sounds are duplicated on fill.
const BUFFER_CHANNELS: usize = 2;

struct StreamBuffer {
    data: SampleBuffer,
    /// Voice-local position of `data[0]`.
    start: u64,
    /// Request that produced the current content. Zero means never filled.
    seq: u64,
}

impl StreamBuffer {
    fn covers(&self, pos: u64) -> bool {
        self.seq != 0 && pos >= self.start && pos < self.start + self.data.num_samples() as u64
    }

    fn end(&self) -> u64 {
        self.start + self.data.num_samples() as u64
    }
}

/// Closes the file handles of a sound whose last voice stopped.
struct Unmapper {
    state: JobState,
    sound: ArcSwapOption<StreamingSound>,
}

impl Job for Unmapper {
    fn run_job(&self) -> JobStatus {
        if let Some(sound) = self.sound.swap(None) {
            if sound.reader().voice_count() == 0 {
                sound.reader().close_file_handles();
            }
        }
        JobStatus::Finished
    }

    fn state(&self) -> &JobState {
        &self.state
    }

    fn name(&self) -> &str {
        "unmapper"
    }
}

pub struct SampleLoader {
    this: Weak<SampleLoader>,
    pool: Arc<SampleThreadPool>,
    metrics: Arc<StreamingMetrics>,
    kill_when_blocked: bool,
    job_state: JobState,
    unmapper: Arc<Unmapper>,

    sound: ArcSwapOption<StreamingSound>,
    snapshot: ArcSwapOption<SoundSnapshot>,
    /// Sound whose voice count this loader incremented.
    counted: ArcSwapOption<StreamingSound>,

    buffers: [Mutex<StreamBuffer>; 2],
    ideal_buffer_size: AtomicUsize,
    /// Smallest size that still covers one voice fetch at the highest pitch.
    minimum_buffer_size: AtomicUsize,
    buffer_size: AtomicUsize,

    read_source: AtomicU8,
    read_end: AtomicU64,
    read_index: AtomicDouble,
    last_swap_position: AtomicDouble,
    entire_sample_loaded: AtomicFlag,
    active: AtomicFlag,

    request_seq: AtomicU64,
    request_target: AtomicU8,
    request_position: AtomicU64,
    /// Latest request a completed fill has served.
    filled_seq: AtomicU64,

    last_call: Mutex<Option<Instant>>,
    disk_usage: AtomicFloat,
}

impl SampleLoader {
    pub fn new(pool: Arc<SampleThreadPool>, config: &StreamingConfig) -> Result<Arc<Self>> {
        let size = config.buffer_size;
        let make = || -> Result<Mutex<StreamBuffer>> {
            Ok(Mutex::new(StreamBuffer {
                data: SampleBuffer::new(config.buffer_format, BUFFER_CHANNELS, size)?,
                start: 0,
                seq: 0,
            }))
        };
        let buffers = [make()?, make()?];
        let metrics = pool.metrics();

        Ok(Arc::new_cyclic(|this| Self {
            this: this.clone(),
            pool,
            metrics,
            kill_when_blocked: config.kill_voices_when_streaming_is_blocked,
            job_state: JobState::new(),
            unmapper: Arc::new(Unmapper {
                state: JobState::new(),
                sound: ArcSwapOption::empty(),
            }),
            sound: ArcSwapOption::empty(),
            snapshot: ArcSwapOption::empty(),
            counted: ArcSwapOption::empty(),
            buffers,
            ideal_buffer_size: AtomicUsize::new(size),
            minimum_buffer_size: AtomicUsize::new(0),
            buffer_size: AtomicUsize::new(size),
            read_source: AtomicU8::new(SOURCE_PRELOAD),
            read_end: AtomicU64::new(0),
            read_index: AtomicDouble::new(0.0),
            last_swap_position: AtomicDouble::new(0.0),
            entire_sample_loaded: AtomicFlag::new(false),
            active: AtomicFlag::new(false),
            request_seq: AtomicU64::new(0),
            request_target: AtomicU8::new(0),
            request_position: AtomicU64::new(0),
            filled_seq: AtomicU64::new(0),
            last_call: Mutex::new(None),
            disk_usage: AtomicFloat::new(0.0),
        }))
    }

    /// Changes the ideal buffer length, never going below the asserted minimum.
    /// Not real-time safe.
    pub fn set_buffer_size(&self, samples: usize) -> Result<()> {
        self.ideal_buffer_size.store(samples, Ordering::Release);
        self.refresh_buffer_size()
    }

    /// Keeps the buffers at least `minimum` samples long from now on. Not real-time safe.
    pub fn assert_buffer_size(&self, minimum: usize) -> Result<()> {
        self.minimum_buffer_size.store(minimum, Ordering::Release);
        self.refresh_buffer_size()
    }

    fn refresh_buffer_size(&self) -> Result<()> {
        let size = self
            .ideal_buffer_size
            .load(Ordering::Acquire)
            .max(self.minimum_buffer_size.load(Ordering::Acquire))
            .max(1);
        self.resize_buffers(size)
    }

    /// Switches the buffers between float and 16-bit storage. Not real-time safe.
    pub fn set_streaming_buffer_data_type(&self, format: SampleFormat) -> Result<()> {
        let size = self.buffer_size.load(Ordering::Acquire);
        for buffer in &self.buffers {
            let mut buffer = buffer.lock();
            if buffer.data.format() != format {
                buffer.data = SampleBuffer::new(format, BUFFER_CHANNELS, size)?;
                buffer.seq = 0;
            }
        }
        Ok(())
    }

    fn resize_buffers(&self, size: usize) -> Result<()> {
        if self.buffer_size.load(Ordering::Acquire) == size {
            return Ok(());
        }
        for buffer in &self.buffers {
            let mut buffer = buffer.lock();
            let format = buffer.data.format();
            buffer.data = SampleBuffer::new(format, BUFFER_CHANNELS, size)?;
            buffer.seq = 0;
        }
        self.buffer_size.store(size, Ordering::Release);
        Ok(())
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size.load(Ordering::Acquire)
    }

    /// Bytes held by both streaming buffers.
    pub fn actual_streaming_buffer_size(&self) -> usize {
        self.buffers
            .iter()
            .map(|b| b.lock().data.size_in_bytes())
            .sum()
    }

    pub fn loaded_sound(&self) -> Option<Arc<StreamingSound>> {
        self.sound.load_full()
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub fn is_entire_sample_loaded(&self) -> bool {
        self.entire_sample_loaded.get()
    }

    /// Position (relative to the sample start) the next read begins at.
    pub fn read_index(&self) -> f64 {
        self.read_index.get()
    }

    pub fn last_swap_position(&self) -> f64 {
        self.last_swap_position.get()
    }

    /// Highest `read time / time between refills` ratio since the last call. Resets it.
    pub fn get_disk_usage(&self) -> f32 {
        self.disk_usage.swap(0.0)
    }

    /// Begins playback of `sound` at `start_offset` samples past its start.
    ///
    /// The first window plays from the preload, so nothing waits on the disk.
    /// Returns false if the sound is purged or missing, or the first refill
    /// could not be queued.
    pub fn start_note(&self, sound: &Arc<StreamingSound>, start_offset: u64) -> bool {
        self.release_voice();
        if !sound.has_active_state() {
            self.active.set(false);
            return false;
        }

        let snapshot = sound.snapshot();
        sound.reader().increase_voice_count();
        self.counted.store(Some(Arc::clone(sound)));
        self.sound.store(Some(Arc::clone(sound)));

        let preload_end = snapshot.preload.num_samples() as u64;
        let entire = snapshot.entire_sample_loaded;
        self.read_source.store(SOURCE_PRELOAD, Ordering::Release);
        self.read_end.store(preload_end, Ordering::Release);
        self.read_index.set(start_offset as f64);
        self.last_swap_position.set(start_offset as f64);
        self.entire_sample_loaded.set(entire);
        self.snapshot.store(Some(snapshot));
        self.active.set(true);

        if entire {
            // invalidate whatever an earlier note still has in flight
            self.request_seq.fetch_add(1, Ordering::AcqRel);
            return true;
        }
        self.request_fill(0, preload_end.max(start_offset))
    }

    /// Ends playback. File handles are released on the pool thread.
    pub fn stop_note(&self) {
        self.active.set(false);
        self.request_seq.fetch_add(1, Ordering::AcqRel);
        self.release_voice();
    }

    fn release_voice(&self) {
        let Some(sound) = self.counted.swap(None) else {
            return;
        };
        if sound.reader().decrease_voice_count() == 0 {
            self.unmapper.sound.store(Some(sound));
            let job: Weak<dyn Job> = Arc::<Unmapper>::downgrade(&self.unmapper);
            self.pool.add_job(job);
        }
    }

    /// Copies `num` frames starting at the current read index into `dest`.
    ///
    /// A span running past the read source continues in the other buffer if
    /// that already holds the next window. Anything not available is silence.
    pub fn fill_voice_buffer(&self, dest: &mut SampleBuffer, num: usize) {
        let num = num.min(dest.num_samples());
        let pos = self.read_index.get().max(0.0) as u64;

        let source = self.read_source.load(Ordering::Acquire);
        let mut written = self.copy_from_source(source, dest, 0, pos, num);
        if written < num && !self.entire_sample_loaded.get() {
            let target = self.request_target.load(Ordering::Acquire) as usize;
            let seq = self.request_seq.load(Ordering::Acquire);
            if let Some(buffer) = self.buffers[target].try_lock() {
                let next = pos + written as u64;
                if buffer.seq == seq && buffer.covers(next) {
                    written += dest.copy_from(
                        written,
                        &buffer.data,
                        (next - buffer.start) as usize,
                        num - written,
                    );
                }
            }
        }
        dest.clear_range(written, num - written);
    }

    fn copy_from_source(
        &self,
        source: u8,
        dest: &mut SampleBuffer,
        offset: usize,
        pos: u64,
        num: usize,
    ) -> usize {
        if source == SOURCE_PRELOAD {
            let snapshot = self.snapshot.load();
            return match &*snapshot {
                Some(s) if pos < s.preload.num_samples() as u64 => {
                    dest.copy_from(offset, &s.preload, pos as usize, num)
                }
                _ => 0,
            };
        }
        match self.buffers[source as usize].try_lock() {
            Some(buffer) if buffer.covers(pos) => {
                dest.copy_from(offset, &buffer.data, (pos - buffer.start) as usize, num)
            }
            _ => 0,
        }
    }

    /// Moves the read index to `uptime` and swaps buffers once the read source is used up.
    ///
    /// Returns false when streaming cannot keep up and the config asks for the
    /// voice to be killed. Otherwise a late buffer just plays as silence.
    pub fn advance_read_index(&self, uptime: f64) -> bool {
        self.read_index.set(uptime);
        if self.entire_sample_loaded.get() || !self.active.get() {
            return true;
        }

        let pos = uptime.max(0.0) as u64;
        if pos < self.read_end.load(Ordering::Acquire) {
            return true;
        }

        let target = self.request_target.load(Ordering::Acquire);
        let seq = self.request_seq.load(Ordering::Acquire);
        let swapped_end = match self.buffers[target as usize].try_lock() {
            Some(buffer) if buffer.seq == seq && buffer.covers(pos) => Some(buffer.end()),
            _ => None,
        };

        match swapped_end {
            Some(end) => {
                self.read_source.store(target, Ordering::Release);
                self.read_end.store(end, Ordering::Release);
                self.last_swap_position.set(uptime);
                if self.kill_when_blocked && self.job_state.is_queued() {
                    return self.starved();
                }
                let accepted = self.request_fill(1 - target, end);
                accepted || !self.kill_when_blocked
            }
            None => {
                if self.kill_when_blocked {
                    return self.starved();
                }
                self.metrics.record_starvation();
                // the pending fill fell behind the read position: ask for the current window
                if !self.job_state.is_queued() && !self.job_state.is_running() {
                    self.request_fill(target, pos);
                }
                true
            }
        }
    }

    fn starved(&self) -> bool {
        self.metrics.record_starvation();
        self.metrics.record_voice_killed();
        false
    }

    fn request_fill(&self, target: u8, position: u64) -> bool {
        self.request_target.store(target, Ordering::Release);
        self.request_position.store(position, Ordering::Release);
        self.request_seq.fetch_add(1, Ordering::AcqRel);
        let job: Weak<dyn Job> = self.this.clone();
        self.pool.add_job(job)
    }

    fn record_disk_usage(&self, started: Instant, read_secs: f64) {
        let mut last = self.last_call.lock();
        if let Some(previous) = last.replace(started) {
            let since = started.duration_since(previous).as_secs_f64();
            if since > 0.0 {
                self.disk_usage.fetch_max((read_secs / since).min(1.0) as f32);
            }
        }
    }
}

impl Job for SampleLoader {
    /// Fills the requested buffer from the sound. Runs on the pool thread.
    fn run_job(&self) -> JobStatus {
        if !self.active.get() || self.job_state.should_exit() {
            return JobStatus::Finished;
        }
        let seq = self.request_seq.load(Ordering::Acquire);
        let target = self.request_target.load(Ordering::Acquire) as usize;
        let position = self.request_position.load(Ordering::Acquire);
        // re-queued while the previous run was already serving this request
        if self.filled_seq.load(Ordering::Acquire) == seq {
            return JobStatus::Finished;
        }
        let Some(sound) = self.sound.load_full() else {
            return JobStatus::Finished;
        };

        let Some(mut buffer) = self.buffers[target].try_lock() else {
            return JobStatus::NeedsRunningAgain;
        };

        let started = Instant::now();
        let num = buffer.data.num_samples();
        let from_disk = sound.fill_sample_buffer(&mut buffer.data, num, position);
        let read_secs = started.elapsed().as_secs_f64();

        if seq == self.request_seq.load(Ordering::Acquire) {
            buffer.start = position;
            buffer.seq = seq;
            self.filled_seq.store(seq, Ordering::Release);
        }
        let bytes = buffer.data.size_in_bytes() as u64;
        drop(buffer);

        self.metrics.record_refill(bytes);
        if from_disk {
            self.metrics.record_disk_read();
        }
        self.record_disk_usage(started, read_secs);
        JobStatus::Finished
    }

    fn state(&self) -> &JobState {
        &self.job_state
    }

    fn name(&self) -> &str {
        "sample loader"
    }
}

impl Drop for SampleLoader {
    fn drop(&mut self) {
        if let Some(sound) = self.counted.swap(None) {
            if sound.reader().decrease_voice_count() == 0 {
                sound.reader().close_file_handles();
            }
        }
    }
}
