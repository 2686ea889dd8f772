//! Job commands
//!
//! Every state change of a job goes through one of these commands, so job
//! bookkeeping runs under the same transaction and revision checks as any
//! other unit of work. The lock is a plain revision-conditioned update: two
//! executors racing for one job both stage an update against the same
//! revision and only the first commit lands.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Duration;
use kestrel_core::{EngineError, EngineEvent, Job, JobId, JobState, Result};
use kestrel_executor::{Command, CommandContext, RetryConfig};
use tracing::{debug, error};

use super::handler::JobHandlerRegistry;

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}

fn load_job(ctx: &mut CommandContext, id: &JobId) -> Result<Job> {
    ctx.jobs()?
        .find(id)?
        .ok_or_else(|| EngineError::not_found("Job", id.as_str()))
}

/// Due, unlocked executable jobs in due-time order
#[derive(Debug, Clone)]
pub struct AcquireJobs {
    /// Upper bound of jobs returned
    pub limit: usize,
}

impl Command for AcquireJobs {
    type Output = Vec<Job>;

    fn execute(&self, ctx: &mut CommandContext) -> Result<Vec<Job>> {
        let now = ctx.now();
        ctx.jobs()?.due(now, self.limit)
    }
}

/// Stamp lock owner and expiration on one job.
///
/// Returns `None` when the job is gone or no longer acquirable. A concurrent
/// locker surfaces as an optimistic-lock error at commit.
#[derive(Debug, Clone)]
pub struct LockJob {
    /// Job to lock
    pub job_id: JobId,
    /// Executor claiming the job
    pub lock_owner: String,
    /// How long the lock stays valid
    pub lock_time: Duration,
}

impl Command for LockJob {
    type Output = Option<Job>;

    fn execute(&self, ctx: &mut CommandContext) -> Result<Option<Job>> {
        let now = ctx.now();
        let jobs = ctx.jobs()?;
        let mut job = match jobs.find(&self.job_id)? {
            Some(job) if job.is_acquirable_at(now) => job,
            _ => return Ok(None),
        };

        job.lock_owner = Some(self.lock_owner.clone());
        job.lock_expiration = Some(now + self.lock_time);
        jobs.update(job.clone());
        job.revision += 1;
        Ok(Some(job))
    }
}

/// What happened to a job handed to [`ExecuteJob`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The handler ran and the job was deleted
    Executed,
    /// The executor no longer holds the lock; nothing ran
    Skipped,
}

/// Run a job's handler and delete the job in the same transaction
pub struct ExecuteJob {
    /// Job to run
    pub job_id: JobId,
    /// Owner that must still hold the lock; `None` runs unconditionally
    pub lock_owner: Option<String>,
    /// Handlers by type
    pub handlers: Arc<JobHandlerRegistry>,
}

impl Command for ExecuteJob {
    type Output = JobOutcome;

    fn execute(&self, ctx: &mut CommandContext) -> Result<JobOutcome> {
        let job = load_job(ctx, &self.job_id)?;
        if let Some(owner) = &self.lock_owner {
            if !job.is_locked_by(owner, ctx.now()) {
                debug!(
                    target: "kestrel::jobs",
                    job_id = %job.id,
                    lock_owner = %owner,
                    "Lock lost before execution, skipping"
                );
                return Ok(JobOutcome::Skipped);
            }
        }

        let handler = self.handlers.get(&job.handler_type).ok_or_else(|| {
            EngineError::job_execution(
                job.id.as_str(),
                format!("no handler registered for type '{}'", job.handler_type),
            )
        })?;
        // A panicking handler counts as a failed attempt
        let outcome = catch_unwind(AssertUnwindSafe(|| handler.execute(&job, ctx)))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                error!(target: "kestrel::jobs", job_id = %job.id, "{}", message);
                Err(EngineError::job_execution(job.id.as_str(), message))
            });
        outcome.map_err(|e| match e {
            EngineError::JobExecution { .. } => e,
            other if other.is_conflict() => other,
            other => EngineError::job_execution(job.id.as_str(), other.to_string()),
        })?;

        ctx.jobs()?.delete(&job);
        ctx.add_event(EngineEvent::JobExecutionSuccess {
            job_id: job.id.clone(),
        });
        Ok(JobOutcome::Executed)
    }
}

/// Record a failed execution: decrement retries, back off or dead-letter.
///
/// Returns the updated job, or `None` when the job is gone or another
/// executor took it over in the meantime.
#[derive(Debug, Clone)]
pub struct FailJob {
    /// Job that failed
    pub job_id: JobId,
    /// Owner that ran the job; `None` skips the ownership check
    pub lock_owner: Option<String>,
    /// Failure summary stored on the job
    pub message: String,
    /// Backoff curve, indexed by failed attempts
    pub backoff: RetryConfig,
}

impl Command for FailJob {
    type Output = Option<Job>;

    fn execute(&self, ctx: &mut CommandContext) -> Result<Option<Job>> {
        let now = ctx.now();
        let Some(mut job) = ctx.jobs()?.find(&self.job_id)? else {
            return Ok(None);
        };
        if let Some(owner) = &self.lock_owner {
            if job.lock_owner.as_deref() != Some(owner.as_str()) {
                return Ok(None);
            }
        }

        job.retries = job.retries.saturating_sub(1);
        job.failed_attempts = job.failed_attempts.saturating_add(1);
        job.exception_message = Some(self.message.clone());
        job.lock_owner = None;
        job.lock_expiration = None;

        ctx.add_event(EngineEvent::JobExecutionFailure {
            job_id: job.id.clone(),
            message: self.message.clone(),
        });
        if job.retries == 0 {
            job.state = JobState::DeadLetter;
            ctx.add_event(EngineEvent::JobMovedToDeadLetter {
                job_id: job.id.clone(),
            });
        } else {
            let attempt = job.failed_attempts.saturating_sub(1) as usize;
            let delay = Duration::from_std(self.backoff.calculate_delay(attempt))
                .map_err(|e| EngineError::internal(format!("backoff out of range: {}", e)))?;
            job.due_time = now + delay;
            ctx.add_event(EngineEvent::JobRetriesDecremented {
                job_id: job.id.clone(),
                retries: job.retries,
            });
        }

        ctx.jobs()?.update(job.clone());
        job.revision += 1;
        Ok(Some(job))
    }
}

/// Release a lock without running the job.
///
/// Returns the unlocked job, or `None` when the job is gone or held by a
/// different owner.
#[derive(Debug, Clone)]
pub struct UnlockJob {
    /// Job to release
    pub job_id: JobId,
    /// Owner that must still hold the lock
    pub lock_owner: String,
}

impl Command for UnlockJob {
    type Output = Option<Job>;

    fn execute(&self, ctx: &mut CommandContext) -> Result<Option<Job>> {
        let jobs = ctx.jobs()?;
        let mut job = match jobs.find(&self.job_id)? {
            Some(job) if job.lock_owner.as_deref() == Some(self.lock_owner.as_str()) => job,
            _ => return Ok(None),
        };

        job.lock_owner = None;
        job.lock_expiration = None;
        jobs.update(job.clone());
        job.revision += 1;
        Ok(Some(job))
    }
}

/// Overwrite the retry budget of an executable job
#[derive(Debug, Clone)]
pub struct SetJobRetries {
    /// Job to change
    pub job_id: JobId,
    /// New retry budget
    pub retries: u32,
}

impl Command for SetJobRetries {
    type Output = Job;

    fn execute(&self, ctx: &mut CommandContext) -> Result<Job> {
        let mut job = load_job(ctx, &self.job_id)?;
        if job.is_dead_letter() {
            return Err(EngineError::validation(format!(
                "job {} is dead-lettered; move it to executable instead",
                job.id
            )));
        }
        job.retries = self.retries;
        ctx.jobs()?.update(job.clone());
        job.revision += 1;
        Ok(job)
    }
}

/// Bring a dead-lettered job back into acquisition, due now
#[derive(Debug, Clone)]
pub struct MoveDeadLetterJobToExecutable {
    /// Dead-lettered job
    pub job_id: JobId,
    /// Retry budget it restarts with
    pub retries: u32,
}

impl Command for MoveDeadLetterJobToExecutable {
    type Output = Job;

    fn execute(&self, ctx: &mut CommandContext) -> Result<Job> {
        if self.retries == 0 {
            return Err(EngineError::validation("retries must be at least 1"));
        }
        let now = ctx.now();
        let mut job = load_job(ctx, &self.job_id)?;
        if !job.is_dead_letter() {
            return Err(EngineError::validation(format!(
                "job {} is not dead-lettered",
                job.id
            )));
        }

        job.state = JobState::Executable;
        job.retries = self.retries;
        job.failed_attempts = 0;
        job.due_time = now;
        job.lock_owner = None;
        job.lock_expiration = None;
        ctx.jobs()?.update(job.clone());
        job.revision += 1;
        Ok(job)
    }
}
