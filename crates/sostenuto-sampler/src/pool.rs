//! Single background thread executing disk jobs.
//!
//! The queue holds weak references: an owner may drop its job at any time and
//! the worker simply skips entries that no longer upgrade. Jobs that report
//! [`JobStatus::NeedsRunningAgain`] go to the back of a local backlog instead
//! of failing.

use crate::config::StreamingConfig;
use crate::error::{Error, Result};
use crate::metrics::StreamingMetrics;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;
use sostenuto_core::{AtomicDouble, AtomicFlag};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thread_priority::ThreadPriority;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Finished,
    NeedsRunningAgain,
}

/// Lifecycle flags every job carries.
#[derive(Debug, Default)]
pub struct JobState {
    queued: AtomicFlag,
    running: AtomicFlag,
    should_exit: AtomicFlag,
}

impl JobState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_queued(&self) -> bool {
        self.queued.get()
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Long jobs poll this and return early once it is set.
    pub fn should_exit(&self) -> bool {
        self.should_exit.get()
    }

    pub fn signal_exit(&self) {
        self.should_exit.set(true);
    }

    pub fn reset_exit(&self) {
        self.should_exit.set(false);
    }
}

/// Work executed on the pool thread.
pub trait Job: Send + Sync {
    fn run_job(&self) -> JobStatus;

    fn state(&self) -> &JobState;

    fn name(&self) -> &str {
        "job"
    }
}

enum Message {
    Run(Weak<dyn Job>),
    Shutdown,
}

struct Shared {
    exit: AtomicFlag,
    current: Mutex<Option<Arc<dyn Job>>>,
    disk_usage: AtomicDouble,
    /// Jobs queued, backlogged or running.
    outstanding: AtomicUsize,
    metrics: Arc<StreamingMetrics>,
}

impl Shared {
    fn job_done(&self) {
        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));
    }
}

struct Worker {
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

pub struct SampleThreadPool {
    sender: Sender<Message>,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
    synchronous: bool,
    shutdown_timeout: Duration,
}

impl SampleThreadPool {
    /// Starts the worker thread, or runs jobs inline when the config disables it.
    pub fn new(config: &StreamingConfig, metrics: Arc<StreamingMetrics>) -> Result<Self> {
        config.validate()?;
        let (sender, receiver) = bounded(config.queue_capacity);
        let shared = Arc::new(Shared {
            exit: AtomicFlag::new(false),
            current: Mutex::new(None),
            disk_usage: AtomicDouble::new(0.0),
            outstanding: AtomicUsize::new(0),
            metrics,
        });

        let worker = if config.use_background_thread {
            let (done_tx, done_rx) = bounded(1);
            let shared = Arc::clone(&shared);
            let idle_wait = config.idle_wait();
            let handle = thread::Builder::new()
                .name("sostenuto-sample-pool".into())
                .spawn(move || {
                    let _ = thread_priority::set_current_thread_priority(ThreadPriority::Max);
                    worker_loop(receiver, &shared, idle_wait);
                    let _ = done_tx.send(());
                })
                .map_err(|e| Error::ThreadPool(format!("failed to spawn worker: {e}")))?;
            tracing::info!("sample thread pool started");
            Some(Worker {
                handle,
                done: done_rx,
            })
        } else {
            None
        };

        Ok(Self {
            sender,
            shared,
            worker: Mutex::new(worker),
            synchronous: !config.use_background_thread,
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    /// Queues `job` unless it is already queued.
    ///
    /// Returns false if the job is gone, the pool is shutting down, or the
    /// queue is full. Never blocks in background mode.
    pub fn add_job(&self, job: Weak<dyn Job>) -> bool {
        let Some(strong) = job.upgrade() else {
            self.shared.metrics.record_expired_job();
            return false;
        };
        if self.shared.exit.get() {
            return false;
        }
        if strong.state().queued.swap(true) {
            return true;
        }

        if self.synchronous {
            run_inline(strong.as_ref());
            return true;
        }

        self.shared.outstanding.fetch_add(1, Ordering::AcqRel);
        match self.sender.try_send(Message::Run(job)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                strong.state().queued.set(false);
                self.shared.job_done();
                self.shared.metrics.record_rejected_job();
                false
            }
        }
    }

    pub fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    /// Jobs waiting or running.
    pub fn pending_jobs(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    /// Busy share of the worker's time over the last job cycle, `0..=1`.
    pub fn disk_usage(&self) -> f64 {
        self.shared.disk_usage.get()
    }

    pub fn metrics(&self) -> Arc<StreamingMetrics> {
        Arc::clone(&self.shared.metrics)
    }

    /// Blocks the calling thread until no job is outstanding or `timeout` elapses.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending_jobs() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    /// Stops the worker.
    ///
    /// The running job is asked to exit. If the worker does not finish within
    /// the shutdown timeout it is detached and keeps running until its job
    /// returns.
    pub fn shutdown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            self.shared.exit.set(true);
            return;
        };
        self.shared.exit.set(true);
        if let Some(job) = self.shared.current.lock().as_ref() {
            job.state().signal_exit();
        }
        let _ = self.sender.try_send(Message::Shutdown);

        match worker.done.recv_timeout(self.shutdown_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = worker.handle.join();
                tracing::info!("sample thread pool stopped");
            }
            Err(RecvTimeoutError::Timeout) => {
                let name = self
                    .shared
                    .current
                    .lock()
                    .as_ref()
                    .map(|j| j.name().to_string())
                    .unwrap_or_default();
                tracing::warn!(
                    "sample thread pool worker did not exit within {:?} (running: {})",
                    self.shutdown_timeout,
                    name
                );
            }
        }
    }
}

impl Drop for SampleThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_inline(job: &dyn Job) {
    job.state().queued.set(false);
    job.state().running.set(true);
    while job.run_job() == JobStatus::NeedsRunningAgain && !job.state().should_exit() {
        thread::yield_now();
    }
    job.state().running.set(false);
}

fn worker_loop(receiver: Receiver<Message>, shared: &Shared, idle_wait: Duration) {
    let mut backlog: VecDeque<Weak<dyn Job>> = VecDeque::new();
    let mut idle = Duration::ZERO;

    while !shared.exit.get() {
        let next = match receiver.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => match backlog.pop_front() {
                Some(job) => Some(Message::Run(job)),
                None => {
                    let wait_start = Instant::now();
                    let message = match receiver.recv_timeout(idle_wait) {
                        Ok(message) => Some(message),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    };
                    idle += wait_start.elapsed();
                    message
                }
            },
        };

        let job = match next {
            Some(Message::Run(job)) => job,
            Some(Message::Shutdown) => break,
            None => continue,
        };
        let Some(job) = job.upgrade() else {
            shared.metrics.record_expired_job();
            shared.job_done();
            continue;
        };

        let state = job.state();
        state.queued.set(false);
        state.running.set(true);
        *shared.current.lock() = Some(Arc::clone(&job));

        let busy_start = Instant::now();
        let status = job.run_job();
        let busy = busy_start.elapsed();

        *shared.current.lock() = None;
        state.running.set(false);

        let total = (idle + busy).as_secs_f64();
        if total > 0.0 {
            shared.disk_usage.set(busy.as_secs_f64() / total);
        }
        idle = Duration::ZERO;

        if status == JobStatus::NeedsRunningAgain && !state.should_exit() {
            shared.metrics.record_requeue();
            if state.queued.swap(true) {
                // re-added while running; the fresh queue entry covers it
                shared.job_done();
            } else {
                backlog.push_back(Arc::downgrade(&job));
            }
        } else {
            shared.job_done();
        }
    }

    for job in backlog.drain(..) {
        if let Some(job) = job.upgrade() {
            job.state().queued.set(false);
        }
    }
}
