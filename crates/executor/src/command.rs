//! Commands and their configuration
//!
//! A [`Command`] is an opaque unit of work executed inside a fresh
//! [`CommandContext`](crate::CommandContext). Closures of the right shape are
//! commands too, so one-off work does not need a named type.

use crate::context::CommandContext;
use crate::retry::RetryConfig;
use kestrel_core::Result;

/// A unit of work executed through the interceptor chain
pub trait Command {
    /// Value produced on success
    type Output;

    /// Name used in logs and spans
    fn name(&self) -> &str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }

    /// Run the command
    ///
    /// The command may be run more than once when its configuration asks for
    /// conflict retry, each time against a fresh context and transaction.
    fn execute(&self, ctx: &mut CommandContext) -> Result<Self::Output>;
}

impl<F, T> Command for F
where
    F: Fn(&mut CommandContext) -> Result<T>,
{
    type Output = T;

    fn name(&self) -> &str {
        "closure"
    }

    fn execute(&self, ctx: &mut CommandContext) -> Result<T> {
        self(ctx)
    }
}

/// Per-invocation selection of interceptor behavior
///
/// Business commands run once. Schema-management and job commands opt into
/// optimistic-lock retry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandConfig {
    /// Retry the whole chain below the retry interceptor on conflicts
    pub retry_on_conflict: bool,
    /// Retry policy; `None` uses the executor default
    pub retry: Option<RetryConfig>,
}

impl CommandConfig {
    /// Plain business command: no retry
    pub fn new() -> Self {
        Self::default()
    }

    /// Retry on optimistic-lock conflicts with the executor's default policy
    pub fn retrying() -> Self {
        Self {
            retry_on_conflict: true,
            retry: None,
        }
    }

    /// Retry on optimistic-lock conflicts with an explicit policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry_on_conflict = true;
        self.retry = Some(retry);
        self
    }
}
