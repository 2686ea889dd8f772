//! Background job execution
//!
//! - [`AsyncExecutor`]: acquisition loop, locking and worker dispatch
//! - [`WorkerPool`]: bounded threads executing acquired jobs
//! - [`JobHandler`] / [`JobHandlerRegistry`]: what a job does, by type
//! - job commands: lock, execute, fail, retry management

pub mod activation;
pub mod commands;
pub mod executor;
pub mod handler;
pub mod pool;

pub use activation::{ActivateProcessDefinitionHandler, ActivationPayload, ACTIVATE_PROCESS_DEFINITION};
pub use commands::{
    AcquireJobs, ExecuteJob, FailJob, JobOutcome, LockJob, MoveDeadLetterJobToExecutable,
    SetJobRetries, UnlockJob,
};
pub use executor::{AsyncExecutor, AsyncExecutorStats};
pub use handler::{JobHandler, JobHandlerRegistry};
pub use pool::{PoolError, PoolStats, WorkerPool};
