//! # Kestrel Executor
//!
//! The command pipeline every unit of work runs through:
//! - [`CommandExecutor`] - the interceptor chain and its entry points
//! - [`Command`] / [`CommandConfig`] - a unit of work and its chain selection
//! - [`CommandContext`] - per-invocation sessions, staged jobs and events
//! - [`Session`] / [`SessionRegistry`] - capability-scoped unit-of-work handles
//!
//! ## Quick Start
//!
//! ```text
//! let executor = CommandExecutor::builder(store).build();
//!
//! executor.execute(&CommandConfig::retrying(), &|ctx: &mut CommandContext| -> Result<()> {
//!     let job = ctx.jobs()?.find(&id)?.ok_or_else(|| EngineError::not_found("Job", id.as_str()))?;
//!     ctx.jobs()?.delete(&job);
//!     Ok(())
//! })?;
//! ```
//!
//! ## Chain
//!
//! | Interceptor | Role |
//! |-------------|------|
//! | logging | span and timing |
//! | retry | re-run on optimistic-lock conflict, when the config asks for it |
//! | transaction | begin, commit on success, roll back on failure |
//! | command-context | open the context, flush or discard it on every exit |

#![warn(missing_docs)]

mod command;
mod context;
mod executor;
mod interceptor;
mod retry;
mod session;
mod sessions;

#[cfg(test)]
mod tests;

pub use command::{Command, CommandConfig};
pub use context::CommandContext;
pub use executor::{CommandExecutor, CommandExecutorBuilder, CommitListener};
pub use interceptor::{
    CommandBody, CommandContextInterceptor, CommandInterceptor, Invocation, LoggingInterceptor,
    Next, RetryInterceptor, TransactionInterceptor,
};
pub use retry::RetryConfig;
pub use session::{Capability, Session, SessionFactory, SessionRegistry};
pub use sessions::{DeploymentSession, JobSession, ProcessDefinitionSession};
