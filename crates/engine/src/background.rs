//! Worker pool behind the async facade
//!
//! A fixed set of threads pulls closures from a bounded priority queue.
//! Timed reads jump ahead of writes, and bulk persistence runs last. Within
//! one priority tasks start in submission order.
//!
//! Workers are plain OS threads, never tokio tasks, so backends that block on
//! their own runtime can be called from them.

use crate::pending::{pending, Pending};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tessera_core::{Error, Result};
use tracing::error;

/// Scheduling class of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskPriority {
    /// Batch saves, schema migration
    Maintenance = 0,
    /// Single-attribute mutations
    Write = 1,
    /// Reads a caller is waiting on
    Read = 2,
}

/// The queue is full or the pool has shut down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackpressureError;

impl fmt::Display for BackpressureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "background queue is full or shut down")
    }
}

impl std::error::Error for BackpressureError {}

impl From<BackpressureError> for Error {
    fn from(err: BackpressureError) -> Self {
        Error::Scheduler(err.to_string())
    }
}

/// Point-in-time scheduler counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Tasks waiting to start
    pub queue_depth: usize,
    /// Tasks currently running
    pub active_tasks: usize,
    /// Tasks finished since creation, panicked ones included
    pub tasks_completed: u64,
    /// Worker threads
    pub worker_count: usize,
}

impl fmt::Display for SchedulerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} workers, {} queued, {} active, {} completed",
            self.worker_count, self.queue_depth, self.active_tasks, self.tasks_completed
        )
    }
}

struct Job {
    priority: TaskPriority,
    sequence: u64,
    run: Box<dyn FnOnce() + Send>,
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for Job {}

// Max-heap: higher priority first, then the older sequence number.
impl Ord for Job {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Shared {
    queue: Mutex<BinaryHeap<Job>>,
    work_ready: Condvar,
    idle: Condvar,
    closed: AtomicBool,
    next_sequence: AtomicU64,
    queued: AtomicUsize,
    running: AtomicUsize,
    completed: AtomicU64,
    capacity: usize,
}

/// Fixed-size pool of worker threads with a bounded priority queue
pub struct BackgroundScheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl BackgroundScheduler {
    /// Start `worker_count` threads named `tessera-bg-N`
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if a thread cannot be spawned; threads already
    /// started are stopped again.
    pub fn new(worker_count: usize, capacity: usize) -> Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(BinaryHeap::new()),
            work_ready: Condvar::new(),
            idle: Condvar::new(),
            closed: AtomicBool::new(false),
            next_sequence: AtomicU64::new(0),
            queued: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            capacity,
        });

        let scheduler = Self {
            shared: Arc::clone(&shared),
            workers: Mutex::new(Vec::with_capacity(worker_count)),
            worker_count,
        };
        for i in 0..worker_count {
            let worker_shared = Arc::clone(&shared);
            let spawned = std::thread::Builder::new()
                .name(format!("tessera-bg-{}", i))
                .spawn(move || worker_loop(&worker_shared));
            match spawned {
                Ok(handle) => scheduler.workers.lock().push(handle),
                Err(e) => {
                    scheduler.shutdown();
                    return Err(Error::Io(e));
                }
            }
        }
        Ok(scheduler)
    }

    /// Queue a closure
    pub fn submit(
        &self,
        priority: TaskPriority,
        work: impl FnOnce() + Send + 'static,
    ) -> std::result::Result<(), BackpressureError> {
        if self.shared.closed.load(AtomicOrdering::Acquire) {
            return Err(BackpressureError);
        }

        let run: Box<dyn FnOnce() + Send> = Box::new(work);
        {
            // Capacity is checked under the same lock as the push
            let mut queue = self.shared.queue.lock();
            if self.shared.closed.load(AtomicOrdering::Acquire)
                || self.shared.queued.load(AtomicOrdering::Acquire) >= self.shared.capacity
            {
                return Err(BackpressureError);
            }
            queue.push(Job {
                priority,
                sequence: self.shared.next_sequence.fetch_add(1, AtomicOrdering::Relaxed),
                run,
            });
            self.shared.queued.fetch_add(1, AtomicOrdering::Release);
        }
        self.shared.work_ready.notify_one();
        Ok(())
    }

    /// Queue a closure and get a handle to its return value
    ///
    /// A rejected submission yields a handle that already failed with
    /// `Error::Scheduler`.
    pub fn spawn<T, F>(&self, priority: TaskPriority, work: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (handle, completer) = pending();
        match self.submit(priority, move || completer.complete(work())) {
            Ok(()) => handle,
            Err(err) => Pending::failed(err.into()),
        }
    }

    /// Block until the queue is empty and no task is running
    ///
    /// Workers keep running afterwards.
    pub fn drain(&self) {
        let mut queue = self.shared.queue.lock();
        while self.shared.queued.load(AtomicOrdering::Acquire) > 0
            || self.shared.running.load(AtomicOrdering::Acquire) > 0
        {
            self.shared.idle.wait(&mut queue);
        }
    }

    /// Stop accepting work, let workers finish the queue, then join them
    ///
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        self.shared.closed.store(true, AtomicOrdering::Release);
        {
            // Taking the queue lock orders this wakeup after any worker's
            // closed-check, so no worker sleeps through it.
            let _queue = self.shared.queue.lock();
            self.shared.work_ready.notify_all();
        }
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// Whether `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.shared.closed.load(AtomicOrdering::Acquire)
    }

    /// Current counters
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queue_depth: self.shared.queued.load(AtomicOrdering::Relaxed),
            active_tasks: self.shared.running.load(AtomicOrdering::Relaxed),
            tasks_completed: self.shared.completed.load(AtomicOrdering::Relaxed),
            worker_count: self.worker_count,
        }
    }
}

impl Drop for BackgroundScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Decrements `running` on drop, so a panicking task cannot wedge `drain`
struct RunningGuard<'a> {
    shared: &'a Shared,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let before = self.shared.running.fetch_sub(1, AtomicOrdering::Release);
        self.shared.completed.fetch_add(1, AtomicOrdering::Relaxed);
        if before == 1 && self.shared.queued.load(AtomicOrdering::Acquire) == 0 {
            let _queue = self.shared.queue.lock();
            self.shared.idle.notify_all();
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.pop() {
                    shared.queued.fetch_sub(1, AtomicOrdering::Release);
                    shared.running.fetch_add(1, AtomicOrdering::Release);
                    break job;
                }
                if shared.closed.load(AtomicOrdering::Acquire) {
                    return;
                }
                shared.work_ready.wait(&mut queue);
            }
        };

        let _running = RunningGuard { shared };
        if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job.run)) {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic".to_string());
            error!(target: "tessera::engine", panic = %message, "Background task panicked");
        }
    }
}
