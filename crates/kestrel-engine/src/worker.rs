//! Fixed-size worker thread pool with batched dispatch.
//!
//! The [`WorkerPool`] runs boxed tasks on N named threads that share one FIFO
//! queue guarded by a `parking_lot` mutex. Idle workers sleep on a condition
//! variable; [`pause`](WorkerPool::pause) makes them sleep after finishing
//! their current task while the queue keeps accepting work.
//!
//! Results come back through one-shot `crossbeam-channel` handles. A task
//! that panics is caught at the worker boundary and logged, the worker keeps
//! running, and the task's handle reports [`PoolError::TaskPanicked`].
//!
//! Batch helpers split a shared `Arc<Vec<T>>` into chunks, one task per
//! chunk. They block until every chunk finishes and must not be called from
//! inside a task running on the same pool.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use kestrel_engine::worker::WorkerPool;
//!
//! let pool = WorkerPool::new(4).unwrap();
//! let answer = pool.submit(|| 6 * 7).unwrap();
//! assert_eq!(answer.wait().unwrap(), 42);
//!
//! let items = Arc::new((0..1000).collect::<Vec<usize>>());
//! let sum = Arc::new(AtomicUsize::new(0));
//! let acc = Arc::clone(&sum);
//! pool.process_batch(&items, move |n| { acc.fetch_add(*n, Ordering::Relaxed); }, 0)
//!     .unwrap();
//! assert_eq!(sum.load(Ordering::Relaxed), 499_500);
//! ```

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, TryRecvError};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

/// Largest chunk the automatic batch sizing will produce.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Chunks per worker targeted by the automatic batch sizing.
const BATCHES_PER_WORKER: usize = 3;

type Job = Box<dyn FnOnce() + Send + 'static>;

// ---------------------------------------------------------------------------
// PoolError
// ---------------------------------------------------------------------------

/// Errors surfaced by the worker pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The pool has been shut down, or the task was discarded by shutdown
    /// before it ran.
    #[error("worker pool is stopped")]
    Stopped,

    /// The task panicked on its worker.
    #[error("worker task panicked: {message}")]
    TaskPanicked { message: String },

    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Number of workers to use for a requested count of `0`.
pub fn hardware_parallelism() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

// ---------------------------------------------------------------------------
// TaskHandle
// ---------------------------------------------------------------------------

/// One-shot handle to a submitted task's result.
#[derive(Debug)]
pub struct TaskHandle<R> {
    rx: Receiver<Result<R, PoolError>>,
}

impl<R> TaskHandle<R> {
    /// Block until the task finishes.
    pub fn wait(self) -> Result<R, PoolError> {
        self.rx.recv().unwrap_or(Err(PoolError::Stopped))
    }

    /// The result if the task has already finished.
    pub fn try_wait(&self) -> Option<Result<R, PoolError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(PoolError::Stopped)),
        }
    }
}

// ---------------------------------------------------------------------------
// BatchHandle
// ---------------------------------------------------------------------------

/// Handles for every chunk of one submitted batch.
#[derive(Debug)]
#[must_use = "a batch runs detached unless waited on"]
pub struct BatchHandle<R = ()> {
    chunks: Vec<TaskHandle<R>>,
}

impl<R> BatchHandle<R> {
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Wait for every chunk, in submission order. All chunks are awaited even
    /// if one fails; the first failure is returned.
    pub fn wait(self) -> Result<Vec<R>, PoolError> {
        let mut out = Vec::with_capacity(self.chunks.len());
        let mut first_error = None;
        for chunk in self.chunks {
            match chunk.wait() {
                Ok(r) => out.push(r),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }

    /// Chain another batch so one `wait` covers both.
    pub fn join(mut self, other: BatchHandle<R>) -> Self {
        self.chunks.extend(other.chunks);
        self
    }
}

impl<R> Default for BatchHandle<R> {
    fn default() -> Self {
        Self { chunks: Vec::new() }
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Job>,
    active: usize,
    paused: bool,
    stopped: bool,
    panicked: u64,
}

struct Shared {
    queue: Mutex<Queue>,
    /// Signalled on new work, resume and stop.
    work: Condvar,
    /// Signalled when the pool drains.
    idle: Condvar,
}

impl Shared {
    fn worker_loop(&self, index: usize) {
        loop {
            let job = {
                let mut q = self.queue.lock();
                loop {
                    if q.stopped && (q.paused || q.jobs.is_empty()) {
                        debug!(worker = index, "worker exiting");
                        return;
                    }
                    if !q.paused {
                        if let Some(job) = q.jobs.pop_front() {
                            q.active += 1;
                            break job;
                        }
                    }
                    self.work.wait(&mut q);
                }
            };

            let outcome = catch_unwind(AssertUnwindSafe(job));

            let mut q = self.queue.lock();
            q.active -= 1;
            if let Err(payload) = outcome {
                q.panicked += 1;
                error!(
                    worker = index,
                    panic = %panic_message(payload.as_ref()),
                    "worker task panicked"
                );
            }
            if q.active == 0 && q.jobs.is_empty() {
                self.idle.notify_all();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl WorkerPool {
    /// Start `workers` threads; `0` means [`hardware_parallelism`].
    pub fn new(workers: usize) -> Result<Self, PoolError> {
        let worker_count = if workers == 0 {
            hardware_parallelism()
        } else {
            workers
        };
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            work: Condvar::new(),
            idle: Condvar::new(),
        });

        let pool = Self {
            shared,
            handles: Mutex::new(Vec::with_capacity(worker_count)),
            worker_count,
        };
        for index in 0..worker_count {
            let shared = Arc::clone(&pool.shared);
            let handle = thread::Builder::new()
                .name(format!("kestrel-worker-{index}"))
                .spawn(move || shared.worker_loop(index))?;
            pool.handles.lock().push(handle);
        }
        info!(workers = worker_count, "worker pool started");
        Ok(pool)
    }

    // -- submission -----------------------------------------------------------

    fn enqueue(&self, job: Job) -> Result<(), PoolError> {
        let mut q = self.shared.queue.lock();
        if q.stopped {
            return Err(PoolError::Stopped);
        }
        q.jobs.push_back(job);
        drop(q);
        self.shared.work.notify_one();
        Ok(())
    }

    /// Queue a task whose result can be awaited.
    pub fn submit<F, R>(&self, f: F) -> Result<TaskHandle<R>, PoolError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = bounded(1);
        self.enqueue(Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
                let message = panic_message(payload.as_ref());
                error!(panic = %message, "worker task panicked");
                PoolError::TaskPanicked { message }
            });
            // The caller may have dropped the handle.
            let _ = tx.send(result);
        }))?;
        Ok(TaskHandle { rx })
    }

    /// Queue a fire-and-forget task. Panics are logged and counted.
    pub fn submit_task(&self, f: impl FnOnce() + Send + 'static) -> Result<(), PoolError> {
        self.enqueue(Box::new(f))
    }

    // -- batches --------------------------------------------------------------

    /// Chunk size that gives about three chunks per worker, clamped to
    /// `[1, MAX_BATCH_SIZE]`.
    pub fn optimal_batch_size(&self, total: usize) -> usize {
        (total / (self.worker_count * BATCHES_PER_WORKER)).clamp(1, MAX_BATCH_SIZE)
    }

    fn chunk_bounds(&self, len: usize, chunk: usize) -> impl Iterator<Item = (usize, usize)> {
        let size = if chunk == 0 {
            self.optimal_batch_size(len)
        } else {
            chunk
        };
        (0..len)
            .step_by(size)
            .map(move |lo| (lo, (lo + size).min(len)))
    }

    /// Submit `g(items, lo, hi)` for every chunk without waiting.
    pub fn submit_batch_range<T, G, R>(
        &self,
        items: &Arc<Vec<T>>,
        g: G,
        chunk: usize,
    ) -> Result<BatchHandle<R>, PoolError>
    where
        T: Send + Sync + 'static,
        G: Fn(&[T], usize, usize) -> R + Send + Sync + 'static,
        R: Send + 'static,
    {
        let g = Arc::new(g);
        let mut batch = BatchHandle::default();
        for (lo, hi) in self.chunk_bounds(items.len(), chunk) {
            let items = Arc::clone(items);
            let g = Arc::clone(&g);
            batch.chunks.push(self.submit(move || (*g)(&items[..], lo, hi))?);
        }
        Ok(batch)
    }

    /// Submit `f(item)` for every item without waiting.
    pub fn submit_batch<T, F>(
        &self,
        items: &Arc<Vec<T>>,
        f: F,
        chunk: usize,
    ) -> Result<BatchHandle, PoolError>
    where
        T: Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.submit_batch_range(
            items,
            move |all: &[T], lo, hi| all[lo..hi].iter().for_each(&f),
            chunk,
        )
    }

    /// Run `f` over every item in parallel chunks and wait for all of them.
    /// `chunk == 0` picks [`optimal_batch_size`](Self::optimal_batch_size).
    pub fn process_batch<T, F>(&self, items: &Arc<Vec<T>>, f: F, chunk: usize) -> Result<(), PoolError>
    where
        T: Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        if items.is_empty() {
            return Ok(());
        }
        self.submit_batch(items, f, chunk)?.wait().map(drop)
    }

    /// Like [`process_batch`](Self::process_batch), but `g` receives the
    /// whole slice and its chunk's `lo..hi` bounds.
    pub fn process_batch_range<T, G>(
        &self,
        items: &Arc<Vec<T>>,
        g: G,
        chunk: usize,
    ) -> Result<(), PoolError>
    where
        T: Send + Sync + 'static,
        G: Fn(&[T], usize, usize) + Send + Sync + 'static,
    {
        if items.is_empty() {
            return Ok(());
        }
        self.submit_batch_range(items, g, chunk)?.wait().map(drop)
    }

    /// Map every item in parallel, preserving order.
    pub fn map_batch<T, F, R>(&self, items: &Arc<Vec<T>>, f: F, chunk: usize) -> Result<Vec<R>, PoolError>
    where
        T: Send + Sync + 'static,
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: Send + 'static,
    {
        let chunks = self
            .submit_batch_range(
                items,
                move |all: &[T], lo, hi| all[lo..hi].iter().map(&f).collect::<Vec<R>>(),
                chunk,
            )?
            .wait()?;
        Ok(chunks.into_iter().flatten().collect())
    }

    // -- control --------------------------------------------------------------

    /// Block until the queue is empty and no task is running. Returns at once
    /// if the pool is stopped. Never returns while paused with queued work.
    pub fn wait_idle(&self) {
        let mut q = self.shared.queue.lock();
        while !q.stopped && (q.active > 0 || !q.jobs.is_empty()) {
            self.shared.idle.wait(&mut q);
        }
    }

    /// Workers finish their current task, then sleep until resumed.
    pub fn pause(&self) {
        self.shared.queue.lock().paused = true;
        debug!("worker pool paused");
    }

    pub fn resume(&self) {
        self.shared.queue.lock().paused = false;
        self.shared.work.notify_all();
        debug!("worker pool resumed");
    }

    /// Stop accepting work, let workers drain the queue (unless paused) and
    /// join them. Queued tasks left behind are dropped and their handles
    /// report [`PoolError::Stopped`]. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut q = self.shared.queue.lock();
            if q.stopped {
                return;
            }
            q.stopped = true;
        }
        self.shared.work.notify_all();
        self.shared.idle.notify_all();

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if handle.join().is_err() {
                error!("worker thread terminated abnormally");
            }
        }
        let dropped = {
            let mut q = self.shared.queue.lock();
            let n = q.jobs.len();
            q.jobs.clear();
            n
        };
        info!(workers = self.worker_count, dropped, "worker pool stopped");
    }

    // -- accessors ------------------------------------------------------------

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Tasks currently executing.
    pub fn active_tasks(&self) -> usize {
        self.shared.queue.lock().active
    }

    /// Tasks waiting in the queue.
    pub fn queued_tasks(&self) -> usize {
        self.shared.queue.lock().jobs.len()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.queue.lock().paused
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.queue.lock().stopped
    }

    /// Fire-and-forget tasks that panicked since startup.
    pub fn panicked_tasks(&self) -> u64 {
        self.shared.queue.lock().panicked
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let q = self.shared.queue.lock();
        f.debug_struct("WorkerPool")
            .field("workers", &self.worker_count)
            .field("queued", &q.jobs.len())
            .field("active", &q.active)
            .field("paused", &q.paused)
            .field("stopped", &q.stopped)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
