//! Bounded worker pool for job execution.
//!
//! A fixed set of worker threads pulls tasks from a FIFO queue. The pool has
//! a fixed number of slots (workers plus queue capacity); the acquisition
//! loop asks [`WorkerPool::remaining_capacity`] before locking jobs so it
//! never locks more than the pool can absorb.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::error;

/// Errors raised by the worker pool
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every slot is taken
    #[error("job worker pool is full ({capacity} slots)")]
    RejectedExecution {
        /// Total slots of the pool
        capacity: usize,
    },
    /// The pool no longer accepts work
    #[error("job worker pool is shut down")]
    ShutDown,
    /// A worker thread could not be started
    #[error("failed to spawn job worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Pool metrics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Tasks waiting for a worker
    pub queue_depth: usize,
    /// Tasks being executed
    pub active_tasks: usize,
    /// Tasks finished since creation (including panicked ones)
    pub tasks_completed: u64,
    /// Worker threads
    pub worker_count: usize,
}

type Task = Box<dyn FnOnce() + Send>;

struct PoolInner {
    queue: Mutex<VecDeque<Task>>,
    work_ready: Condvar,
    idle_cond: Condvar,
    shutdown: AtomicBool,
    abandoned: AtomicBool,
    active_tasks: AtomicUsize,
    tasks_completed: AtomicU64,
    max_queue_depth: usize,
}

/// Fixed-size thread pool with a bounded FIFO queue
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_threads: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("stats", &self.stats())
            .field("max_queue_depth", &self.inner.max_queue_depth)
            .finish()
    }
}

impl WorkerPool {
    /// Start `num_threads` workers named `{name}-0`, `{name}-1`, ...
    pub fn new(name: &str, num_threads: usize, max_queue_depth: usize) -> Result<Self, PoolError> {
        let inner = Arc::new(PoolInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            idle_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            abandoned: AtomicBool::new(false),
            active_tasks: AtomicUsize::new(0),
            tasks_completed: AtomicU64::new(0),
            max_queue_depth,
        });

        let pool = Self {
            inner,
            workers: Mutex::new(Vec::with_capacity(num_threads)),
            num_threads,
        };
        for i in 0..num_threads {
            let inner = Arc::clone(&pool.inner);
            let spawned = std::thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || worker_loop(&inner));
            match spawned {
                Ok(handle) => pool.workers.lock().push(handle),
                Err(e) => {
                    pool.shutdown(Duration::ZERO);
                    return Err(PoolError::Spawn(e));
                }
            }
        }
        Ok(pool)
    }

    /// Total slots: workers plus queue capacity
    pub fn capacity(&self) -> usize {
        self.num_threads + self.inner.max_queue_depth
    }

    /// Slots currently free
    pub fn remaining_capacity(&self) -> usize {
        if self.is_shutdown() {
            return 0;
        }
        let queued = self.inner.queue.lock().len();
        let active = self.inner.active_tasks.load(Ordering::Acquire);
        self.capacity().saturating_sub(queued + active)
    }

    /// True once shutdown started
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Queue a task.
    ///
    /// Returns [`PoolError::RejectedExecution`] when every slot is taken and
    /// [`PoolError::ShutDown`] after shutdown.
    pub fn submit(&self, work: impl FnOnce() + Send + 'static) -> Result<(), PoolError> {
        {
            let mut queue = self.inner.queue.lock();
            if self.is_shutdown() {
                return Err(PoolError::ShutDown);
            }
            let active = self.inner.active_tasks.load(Ordering::Acquire);
            if queue.len() + active >= self.capacity() {
                return Err(PoolError::RejectedExecution {
                    capacity: self.capacity(),
                });
            }
            queue.push_back(Box::new(work));
        }
        self.inner.work_ready.notify_one();
        Ok(())
    }

    /// Block until the queue is empty and no task runs, or `timeout` passes.
    ///
    /// Returns true when the pool became idle in time.
    pub fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.inner.queue.lock();
        while !queue.is_empty() || self.inner.active_tasks.load(Ordering::Acquire) > 0 {
            if self.inner.idle_cond.wait_until(&mut queue, deadline).timed_out() {
                return queue.is_empty() && self.inner.active_tasks.load(Ordering::Acquire) == 0;
            }
        }
        true
    }

    /// Stop accepting work and wait up to `grace` for queued and running
    /// tasks.
    ///
    /// Returns true when the pool became idle in time. Otherwise tasks that
    /// have not started are dropped and workers still busy are detached, not
    /// joined.
    pub fn shutdown(&self, grace: Duration) -> bool {
        {
            let _queue = self.inner.queue.lock();
            self.inner.shutdown.store(true, Ordering::Release);
            self.inner.work_ready.notify_all();
        }

        let idle = self.drain(grace);
        if !idle {
            let dropped = {
                let mut queue = self.inner.queue.lock();
                self.inner.abandoned.store(true, Ordering::Release);
                let dropped = queue.len();
                queue.clear();
                self.inner.work_ready.notify_all();
                dropped
            };
            if dropped > 0 {
                tracing::debug!(
                    target: "kestrel::jobs",
                    dropped,
                    "Dropped queued job tasks after shutdown grace"
                );
            }
        }

        let mut workers = self.workers.lock();
        if idle {
            for handle in workers.drain(..) {
                let _ = handle.join();
            }
        } else {
            workers.clear();
        }
        idle
    }

    /// Return a snapshot of pool metrics.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            queue_depth: self.inner.queue.lock().len(),
            active_tasks: self.inner.active_tasks.load(Ordering::Relaxed),
            tasks_completed: self.inner.tasks_completed.load(Ordering::Relaxed),
            worker_count: self.num_threads,
        }
    }
}

/// Decrements `active_tasks` and wakes drain waiters, even if the task panics.
struct ActiveTaskGuard<'a> {
    inner: &'a PoolInner,
}

impl Drop for ActiveTaskGuard<'_> {
    fn drop(&mut self) {
        let prev_active = self.inner.active_tasks.fetch_sub(1, Ordering::Release);
        self.inner.tasks_completed.fetch_add(1, Ordering::Relaxed);

        if prev_active == 1 {
            let queue = self.inner.queue.lock();
            if queue.is_empty() {
                self.inner.idle_cond.notify_all();
            }
        }
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if inner.abandoned.load(Ordering::Acquire) {
                    return;
                }
                if let Some(task) = queue.pop_front() {
                    inner.active_tasks.fetch_add(1, Ordering::Release);
                    break task;
                }
                // Queue is empty: after shutdown nothing more arrives
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveTaskGuard { inner };

        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
            error!(
                target: "kestrel::jobs",
                "job task panicked: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
    }
}
