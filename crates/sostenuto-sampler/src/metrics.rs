//! Streaming statistics.
//!
//! Counters are bumped from the audio thread and the sample thread pool, so
//! everything is a relaxed atomic and nothing here allocates.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct StreamingMetrics {
    /// Bytes copied into streaming buffers by refill jobs
    bytes_streamed: AtomicU64,
    /// Refill jobs that completed
    refills: AtomicU64,
    /// Reads that had to hit the file reader instead of the preload
    disk_reads: AtomicU64,
    /// A voice needed the next buffer before it was ready
    starvation_events: AtomicU64,
    /// Voices stopped because of starvation
    voices_killed: AtomicU64,
    /// Jobs pushed back onto the queue after asking to run again
    jobs_requeued: AtomicU64,
    /// Queue entries whose owner was gone by the time they were popped
    expired_jobs: AtomicU64,
    /// Jobs refused because the queue was full
    jobs_rejected: AtomicU64,
}

impl StreamingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_refill(&self, bytes: u64) {
        self.bytes_streamed.fetch_add(bytes, Ordering::Relaxed);
        self.refills.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_disk_read(&self) {
        self.disk_reads.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_starvation(&self) {
        self.starvation_events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_voice_killed(&self) {
        self.voices_killed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_requeue(&self) {
        self.jobs_requeued.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_expired_job(&self) {
        self.expired_jobs.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_rejected_job(&self) {
        self.jobs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StreamingMetricsSnapshot {
        StreamingMetricsSnapshot {
            bytes_streamed: self.bytes_streamed.load(Ordering::Relaxed),
            refills: self.refills.load(Ordering::Relaxed),
            disk_reads: self.disk_reads.load(Ordering::Relaxed),
            starvation_events: self.starvation_events.load(Ordering::Relaxed),
            voices_killed: self.voices_killed.load(Ordering::Relaxed),
            jobs_requeued: self.jobs_requeued.load(Ordering::Relaxed),
            expired_jobs: self.expired_jobs.load(Ordering::Relaxed),
            jobs_rejected: self.jobs_rejected.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.bytes_streamed,
            &self.refills,
            &self.disk_reads,
            &self.starvation_events,
            &self.voices_killed,
            &self.jobs_requeued,
            &self.expired_jobs,
            &self.jobs_rejected,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of [`StreamingMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamingMetricsSnapshot {
    pub bytes_streamed: u64,
    pub refills: u64,
    pub disk_reads: u64,
    pub starvation_events: u64,
    pub voices_killed: u64,
    pub jobs_requeued: u64,
    pub expired_jobs: u64,
    pub jobs_rejected: u64,
}
