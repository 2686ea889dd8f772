//! The async executor
//!
//! One acquisition thread per engine selects due jobs, locks as many as the
//! worker pool can absorb and hands them to the pool. Workers execute each
//! job through the command executor; a failed execution is recorded by a
//! second, retrying command once the first rolled back.
//!
//! Several engines sharing one store each run their own async executor under
//! a distinct lock owner. The revision check on [`LockJob`] is the only
//! arbitration between them.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use kestrel_core::{EngineError, EngineEvent, Job, JobId, Result};
use kestrel_executor::{CommandConfig, CommandExecutor, CommitListener, RetryConfig};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::commands::{AcquireJobs, ExecuteJob, FailJob, JobOutcome, LockJob, UnlockJob};
use super::handler::JobHandlerRegistry;
use super::pool::{PoolStats, WorkerPool};
use crate::engine::config::AsyncExecutorConfig;

/// Counters of one async executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncExecutorStats {
    /// Acquisition loop running
    pub active: bool,
    /// Jobs locked by this executor
    pub acquired: u64,
    /// Jobs executed successfully
    pub executed: u64,
    /// Failed executions recorded
    pub failed: u64,
    /// Lock attempts lost to another owner
    pub lock_conflicts: u64,
    /// Worker pool snapshot while active
    pub pool: Option<PoolStats>,
}

/// Wakes the acquisition loop early when a commit staged new jobs
#[derive(Default)]
struct Wakeup {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl Wakeup {
    fn notify(&self) {
        *self.pending.lock() = true;
        self.cond.notify_all();
    }

    /// Sleep until notified or `timeout` passes
    fn wait(&self, timeout: Duration) {
        let mut pending = self.pending.lock();
        if !*pending {
            let _ = self.cond.wait_for(&mut pending, timeout);
        }
        *pending = false;
    }
}

impl CommitListener for Wakeup {
    fn on_commit(&self, _events: &[EngineEvent], jobs_added: usize) {
        if jobs_added > 0 {
            self.notify();
        }
    }
}

struct Inner {
    commands: Arc<CommandExecutor>,
    handlers: Arc<JobHandlerRegistry>,
    config: AsyncExecutorConfig,
    bookkeeping: CommandConfig,
    backoff: RetryConfig,
    lock_owner: String,
    active: AtomicBool,
    wakeup: Arc<Wakeup>,
    /// Locked jobs queued in the pool that no worker has started yet
    handed_off: Mutex<HashSet<JobId>>,
    acquired: AtomicU64,
    executed: AtomicU64,
    failed: AtomicU64,
    lock_conflicts: AtomicU64,
}

impl Inner {
    fn acquire(&self, limit: usize) -> Result<Vec<Job>> {
        let candidates = self.commands.run(&AcquireJobs { limit })?;

        let mut locked = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let lock = LockJob {
                job_id: candidate.id.clone(),
                lock_owner: self.lock_owner.clone(),
                lock_time: self.config.lock_time(),
            };
            match self.commands.run(&lock) {
                Ok(Some(job)) => locked.push(job),
                Ok(None) => {}
                Err(e) if e.is_conflict() => {
                    self.lock_conflicts.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        target: "kestrel::jobs",
                        job_id = %candidate.id,
                        lock_owner = %self.lock_owner,
                        "Job already taken"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        self.acquired
            .fetch_add(locked.len() as u64, Ordering::Relaxed);
        Ok(locked)
    }

    fn execute(&self, job_id: &JobId, lock_owner: Option<&str>) -> Result<JobOutcome> {
        let command = ExecuteJob {
            job_id: job_id.clone(),
            lock_owner: lock_owner.map(str::to_string),
            handlers: Arc::clone(&self.handlers),
        };
        match self.commands.run(&command) {
            Ok(outcome) => {
                if outcome == JobOutcome::Executed {
                    self.executed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(outcome)
            }
            Err(e @ EngineError::NotFound { .. }) => Err(e),
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target: "kestrel::jobs",
                    job_id = %job_id,
                    error = %e,
                    "Job execution failed"
                );
                self.record_failure(job_id, lock_owner, &e);
                Err(e)
            }
        }
    }

    fn record_failure(&self, job_id: &JobId, lock_owner: Option<&str>, cause: &EngineError) {
        let message = match cause {
            EngineError::JobExecution { message, .. } => message.clone(),
            other => other.to_string(),
        };
        let command = FailJob {
            job_id: job_id.clone(),
            lock_owner: lock_owner.map(str::to_string),
            message,
            backoff: self.backoff.clone(),
        };
        match self.commands.execute(&self.bookkeeping, &command) {
            Ok(Some(job)) if job.is_dead_letter() => warn!(
                target: "kestrel::jobs",
                job_id = %job_id,
                "Job exhausted its retries and moved to dead-letter"
            ),
            Ok(Some(job)) => debug!(
                target: "kestrel::jobs",
                job_id = %job_id,
                retries = job.retries,
                due_time = %job.due_time,
                "Job rescheduled"
            ),
            Ok(None) => debug!(
                target: "kestrel::jobs",
                job_id = %job_id,
                "Job gone or taken over before failure was recorded"
            ),
            Err(e) => error!(
                target: "kestrel::jobs",
                job_id = %job_id,
                error = %e,
                "Failed to record job failure; lock will expire"
            ),
        }
    }

    /// One acquisition cycle. Returns true when the cycle filled its batch.
    fn cycle(self: &Arc<Self>, pool: &WorkerPool) -> bool {
        let capacity = pool
            .remaining_capacity()
            .min(self.config.max_jobs_per_acquisition);
        if capacity == 0 {
            debug!(target: "kestrel::jobs", "Worker pool saturated, skipping acquisition");
            return false;
        }

        let jobs = match self.acquire(capacity) {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(target: "kestrel::jobs", error = %e, "Job acquisition failed");
                return false;
            }
        };
        let acquired = jobs.len();
        for job in jobs {
            let inner = Arc::clone(self);
            let job_id = job.id.clone();
            self.handed_off.lock().insert(job_id.clone());
            let submitted = pool.submit(move || {
                // Already released by shutdown
                if !inner.handed_off.lock().remove(&job.id) {
                    return;
                }
                let _ = inner.execute(&job.id, Some(inner.lock_owner.as_str()));
            });
            if let Err(e) = submitted {
                warn!(
                    target: "kestrel::jobs",
                    job_id = %job_id,
                    error = %e,
                    "Acquired job not submitted, releasing lock"
                );
                self.handed_off.lock().remove(&job_id);
                self.release(&job_id);
            }
        }
        acquired == capacity
    }

    /// Drop this executor's lock on a job it will not run
    fn release(&self, job_id: &JobId) {
        let command = UnlockJob {
            job_id: job_id.clone(),
            lock_owner: self.lock_owner.clone(),
        };
        match self.commands.execute(&self.bookkeeping, &command) {
            Ok(Some(_)) => debug!(target: "kestrel::jobs", job_id = %job_id, "Job lock released"),
            Ok(None) => {}
            Err(e) => warn!(
                target: "kestrel::jobs",
                job_id = %job_id,
                error = %e,
                "Failed to release job lock; it will expire"
            ),
        }
    }

    fn acquisition_loop(self: Arc<Self>, pool: Arc<WorkerPool>) {
        info!(target: "kestrel::jobs", lock_owner = %self.lock_owner, "Acquisition loop started");
        while self.active.load(Ordering::Acquire) {
            let full = self.cycle(&pool);
            if !full && self.active.load(Ordering::Acquire) {
                self.wakeup.wait(self.config.acquire_interval());
            }
        }
        info!(target: "kestrel::jobs", lock_owner = %self.lock_owner, "Acquisition loop stopped");
    }
}

/// Background acquisition and execution of due jobs
pub struct AsyncExecutor {
    inner: Arc<Inner>,
    runtime: Mutex<Option<(JoinHandle<()>, Arc<WorkerPool>)>>,
}

impl std::fmt::Debug for AsyncExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncExecutor")
            .field("lock_owner", &self.inner.lock_owner)
            .field("stats", &self.stats())
            .finish()
    }
}

impl AsyncExecutor {
    /// Create an inactive executor with a fresh lock owner id
    pub fn new(
        commands: Arc<CommandExecutor>,
        handlers: Arc<JobHandlerRegistry>,
        config: AsyncExecutorConfig,
        command_retry: RetryConfig,
    ) -> Self {
        let backoff = config.job_backoff();
        Self {
            inner: Arc::new(Inner {
                commands,
                handlers,
                config,
                bookkeeping: CommandConfig::new().with_retry(command_retry),
                backoff,
                lock_owner: Uuid::new_v4().to_string(),
                active: AtomicBool::new(false),
                wakeup: Arc::new(Wakeup::default()),
                handed_off: Mutex::new(HashSet::new()),
                acquired: AtomicU64::new(0),
                executed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                lock_conflicts: AtomicU64::new(0),
            }),
            runtime: Mutex::new(None),
        }
    }

    /// Id stamped on every lock this executor takes
    pub fn lock_owner(&self) -> &str {
        &self.inner.lock_owner
    }

    /// Settings in use
    pub fn config(&self) -> &AsyncExecutorConfig {
        &self.inner.config
    }

    /// True while the acquisition loop runs
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Post-commit hook waking the acquisition loop when jobs were added
    pub fn job_added_listener(&self) -> Arc<dyn CommitListener> {
        self.inner.wakeup.clone()
    }

    /// Start the worker pool and the acquisition thread. No-op when active.
    pub fn start(&self) -> Result<()> {
        let mut runtime = self.runtime.lock();
        if runtime.is_some() {
            return Ok(());
        }

        let pool = Arc::new(
            WorkerPool::new(
                "kestrel-job",
                self.inner.config.worker_threads,
                self.inner.config.queue_capacity,
            )
            .map_err(|e| EngineError::internal(e.to_string()))?,
        );
        self.inner.active.store(true, Ordering::Release);

        let inner = Arc::clone(&self.inner);
        let loop_pool = Arc::clone(&pool);
        let spawned = std::thread::Builder::new()
            .name("kestrel-acquire".to_string())
            .spawn(move || inner.acquisition_loop(loop_pool));
        match spawned {
            Ok(handle) => {
                *runtime = Some((handle, pool));
                Ok(())
            }
            Err(e) => {
                self.inner.active.store(false, Ordering::Release);
                pool.shutdown(Duration::ZERO);
                Err(EngineError::internal(format!(
                    "failed to spawn acquisition thread: {}",
                    e
                )))
            }
        }
    }

    /// Stop acquiring and wait up to the configured grace period for queued
    /// and running jobs. No-op when inactive.
    ///
    /// Jobs that did not start within the grace period are unlocked right
    /// away. Returns false when jobs were still running after the grace
    /// period; their locks expire and another acquirer picks them up.
    pub fn shutdown(&self) -> bool {
        let Some((handle, pool)) = self.runtime.lock().take() else {
            return true;
        };
        self.inner.active.store(false, Ordering::Release);
        self.inner.wakeup.notify();
        if handle.join().is_err() {
            error!(target: "kestrel::jobs", "Acquisition thread panicked");
        }

        let drained = pool.shutdown(self.inner.config.shutdown_grace());
        let unstarted: Vec<JobId> = self.inner.handed_off.lock().drain().collect();
        for job_id in &unstarted {
            self.inner.release(job_id);
        }
        if drained {
            info!(target: "kestrel::jobs", lock_owner = %self.inner.lock_owner, "Async executor shut down");
        } else {
            warn!(
                target: "kestrel::jobs",
                lock_owner = %self.inner.lock_owner,
                "Shutdown grace period elapsed with jobs still running"
            );
        }
        drained
    }

    /// Lock up to `limit` due jobs for this executor without executing them
    pub fn acquire_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        self.inner.acquire(limit)
    }

    /// Execute a job this executor locked, recording a failure if it fails
    pub fn execute_locked_job(&self, job_id: &JobId) -> Result<JobOutcome> {
        self.inner.execute(job_id, Some(self.inner.lock_owner.as_str()))
    }

    /// Execute a job now regardless of its due time and lock.
    ///
    /// A failure is recorded on the job (retries, backoff, dead-letter) and
    /// then returned.
    pub fn execute_job(&self, job_id: &JobId) -> Result<()> {
        self.inner.execute(job_id, None).map(|_| ())
    }

    /// Counters and pool snapshot
    pub fn stats(&self) -> AsyncExecutorStats {
        AsyncExecutorStats {
            active: self.is_active(),
            acquired: self.inner.acquired.load(Ordering::Relaxed),
            executed: self.inner.executed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            lock_conflicts: self.inner.lock_conflicts.load(Ordering::Relaxed),
            pool: self.runtime.lock().as_ref().map(|(_, pool)| pool.stats()),
        }
    }
}

impl Drop for AsyncExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
