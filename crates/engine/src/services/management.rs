//! Management service: jobs and schema inspection

use std::sync::Arc;

use kestrel_concurrency::TransactionStats;
use kestrel_core::{Job, JobId, JobSpec, Result};
use kestrel_executor::{CommandConfig, CommandContext, CommandExecutor};

use crate::jobs::{AsyncExecutor, MoveDeadLetterJobToExecutable, SetJobRetries};

/// Job inspection and manual job control
#[derive(Debug, Clone)]
pub struct ManagementService {
    commands: Arc<CommandExecutor>,
    async_executor: Arc<AsyncExecutor>,
    retrying: CommandConfig,
}

impl ManagementService {
    pub(crate) fn new(
        commands: Arc<CommandExecutor>,
        async_executor: Arc<AsyncExecutor>,
        retrying: CommandConfig,
    ) -> Self {
        Self {
            commands,
            async_executor,
            retrying,
        }
    }

    fn all_jobs(&self) -> Result<Vec<Job>> {
        self.commands
            .run(&|ctx: &mut CommandContext| -> Result<Vec<Job>> { ctx.jobs()?.all() })
    }

    /// Executable jobs in due-time order
    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        Ok(self
            .all_jobs()?
            .into_iter()
            .filter(|j| !j.is_dead_letter())
            .collect())
    }

    /// Dead-lettered jobs in due-time order
    pub fn list_dead_letter_jobs(&self) -> Result<Vec<Job>> {
        Ok(self
            .all_jobs()?
            .into_iter()
            .filter(Job::is_dead_letter)
            .collect())
    }

    /// Job by id, executable or dead-lettered
    pub fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        self.commands
            .run(&|ctx: &mut CommandContext| -> Result<Option<Job>> {
                ctx.jobs()?.find(id)
            })
    }

    /// Run a job now, ignoring due time and locks.
    ///
    /// A failure is recorded on the job exactly as for background execution
    /// and then returned.
    pub fn execute_job(&self, id: &JobId) -> Result<()> {
        self.async_executor.execute_job(id)
    }

    /// Put a dead-lettered job back into acquisition with `retries` attempts
    pub fn move_dead_letter_job_to_executable(&self, id: &JobId, retries: u32) -> Result<Job> {
        self.commands.execute(
            &self.retrying,
            &MoveDeadLetterJobToExecutable {
                job_id: id.clone(),
                retries,
            },
        )
    }

    /// Overwrite the retry budget of an executable job
    pub fn set_job_retries(&self, id: &JobId, retries: u32) -> Result<Job> {
        self.commands.execute(
            &self.retrying,
            &SetJobRetries {
                job_id: id.clone(),
                retries,
            },
        )
    }

    /// Create a job
    pub fn schedule_job(&self, spec: JobSpec) -> Result<JobId> {
        self.commands
            .run(&|ctx: &mut CommandContext| -> Result<JobId> {
                Ok(ctx.schedule_job(spec.clone()))
            })
    }

    /// Installed schema version
    pub fn schema_version(&self) -> Option<String> {
        self.commands.store().schema_version()
    }

    /// Transactions started, committed and rolled back by this engine
    pub fn transaction_stats(&self) -> TransactionStats {
        self.commands.transaction_stats()
    }
}
