//! The interceptor chain
//!
//! Every command passes through an ordered list of interceptors composed when
//! the executor is built. Each one may act before and after delegating to
//! [`Next`]; the end of the chain runs the command body.
//!
//! ```text
//! Logging -> [custom...] -> Retry -> Transaction -> CommandContext -> command
//! ```
//!
//! Retry sits outside the transaction, so every retry attempt runs in a fresh
//! transaction with a fresh command context.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{debug, debug_span, warn};

use kestrel_concurrency::{TransactionContext, TransactionManager};
use kestrel_core::{Clock, EngineError, Result};
use kestrel_storage::Store;

use crate::command::CommandConfig;
use crate::context::CommandContext;
use crate::executor::CommitListener;
use crate::retry::RetryConfig;
use crate::session::SessionRegistry;

/// Type-erased command body
pub type CommandBody<'a> = dyn FnMut(&mut CommandContext) -> Result<()> + 'a;

/// State threaded through the chain for one command
pub struct Invocation<'a> {
    config: &'a CommandConfig,
    command: &'a str,
    body: &'a mut CommandBody<'a>,
    transaction: Option<TransactionContext>,
    context: Option<CommandContext>,
    attempts: usize,
}

impl<'a> Invocation<'a> {
    pub(crate) fn new(
        config: &'a CommandConfig,
        command: &'a str,
        body: &'a mut CommandBody<'a>,
    ) -> Self {
        Self {
            config,
            command,
            body,
            transaction: None,
            context: None,
            attempts: 0,
        }
    }

    /// Configuration selected by the caller
    pub fn config(&self) -> &'a CommandConfig {
        self.config
    }

    /// Command name
    pub fn command_name(&self) -> &'a str {
        self.command
    }

    /// How many times the command body has run so far
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Open transaction, inside the transaction interceptor
    pub fn transaction_mut(&mut self) -> Option<&mut TransactionContext> {
        self.transaction.as_mut()
    }

    /// Open command context, inside the command-context interceptor
    pub fn context_mut(&mut self) -> Option<&mut CommandContext> {
        self.context.as_mut()
    }
}

/// Cross-cutting behavior wrapped around every command
pub trait CommandInterceptor: Send + Sync {
    /// Name for diagnostics
    fn name(&self) -> &'static str {
        "custom"
    }

    /// Act around `next`
    fn intercept(&self, invocation: &mut Invocation<'_>, next: Next<'_>) -> Result<()>;
}

impl<F> CommandInterceptor for F
where
    F: Fn(&mut Invocation<'_>, Next<'_>) -> Result<()> + Send + Sync,
{
    fn intercept(&self, invocation: &mut Invocation<'_>, next: Next<'_>) -> Result<()> {
        self(invocation, next)
    }
}

/// The remainder of the chain
#[derive(Clone, Copy)]
pub struct Next<'c> {
    chain: &'c [Arc<dyn CommandInterceptor>],
}

impl<'c> Next<'c> {
    pub(crate) fn new(chain: &'c [Arc<dyn CommandInterceptor>]) -> Self {
        Self { chain }
    }

    /// Continue with the next interceptor, or run the command body
    pub fn run(self, invocation: &mut Invocation<'_>) -> Result<()> {
        match self.chain.split_first() {
            Some((head, rest)) => head.intercept(invocation, Next { chain: rest }),
            None => invoke(invocation),
        }
    }
}

fn invoke(invocation: &mut Invocation<'_>) -> Result<()> {
    invocation.attempts += 1;
    let ctx = invocation
        .context
        .as_mut()
        .ok_or_else(|| EngineError::internal("command invoked without a command context"))?;
    (invocation.body)(ctx)
}

// =============================================================================
// Logging
// =============================================================================

/// Span and timing per command; no semantic effect
#[derive(Debug, Default)]
pub struct LoggingInterceptor;

impl CommandInterceptor for LoggingInterceptor {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn intercept(&self, invocation: &mut Invocation<'_>, next: Next<'_>) -> Result<()> {
        let span = debug_span!(target: "kestrel::command", "command", command = invocation.command_name());
        let _enter = span.enter();
        let start = Instant::now();

        let result = next.run(invocation);
        let elapsed_us = start.elapsed().as_micros() as u64;

        match &result {
            Ok(()) => debug!(target: "kestrel::command", elapsed_us, "Command finished"),
            Err(e @ (EngineError::OptimisticLock { .. }
            | EngineError::Validation { .. }
            | EngineError::NotFound { .. })) => {
                debug!(target: "kestrel::command", elapsed_us, code = e.error_code(), error = %e, "Command failed")
            }
            Err(e) => {
                warn!(target: "kestrel::command", elapsed_us, code = e.error_code(), error = %e, "Command failed")
            }
        }
        result
    }
}

// =============================================================================
// Retry
// =============================================================================

/// Re-runs the inner chain on optimistic-lock conflicts only
#[derive(Debug, Default)]
pub struct RetryInterceptor {
    default: RetryConfig,
}

impl RetryInterceptor {
    /// Use `default` when a command does not carry its own policy
    pub fn new(default: RetryConfig) -> Self {
        Self { default }
    }
}

impl CommandInterceptor for RetryInterceptor {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn intercept(&self, invocation: &mut Invocation<'_>, next: Next<'_>) -> Result<()> {
        let config = invocation.config();
        if !config.retry_on_conflict {
            return next.run(invocation);
        }
        let policy = config.retry.as_ref().unwrap_or(&self.default);

        let mut attempt = 0;
        loop {
            match next.run(invocation) {
                Err(e) if e.is_conflict() && attempt < policy.max_retries => {
                    let delay = policy.calculate_delay(attempt);
                    debug!(
                        target: "kestrel::command",
                        attempt = attempt + 1,
                        max_retries = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after optimistic lock conflict"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// Opens a transaction, commits on success, rolls back on failure
pub struct TransactionInterceptor {
    manager: Arc<TransactionManager>,
}

impl TransactionInterceptor {
    /// Open transactions through `manager`
    pub fn new(manager: Arc<TransactionManager>) -> Self {
        Self { manager }
    }
}

impl CommandInterceptor for TransactionInterceptor {
    fn name(&self) -> &'static str {
        "transaction"
    }

    fn intercept(&self, invocation: &mut Invocation<'_>, next: Next<'_>) -> Result<()> {
        invocation.transaction = Some(self.manager.begin());
        let result = next.run(invocation);

        let mut txn = invocation
            .transaction
            .take()
            .ok_or_else(|| EngineError::internal("transaction vanished during command"))?;

        let outcome = match result {
            Ok(()) => txn.commit().map_err(EngineError::from),
            Err(e) => {
                if let Err(rollback_err) = txn.rollback(e.to_string()) {
                    warn!(target: "kestrel::command", txn_id = txn.txn_id, error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        };
        self.manager.record(&txn);
        outcome
    }
}

// =============================================================================
// Command context
// =============================================================================

/// Creates the command context and closes it on every exit path
pub struct CommandContextInterceptor {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    registry: Arc<SessionRegistry>,
    default_job_retries: u32,
    listeners: Arc<RwLock<Vec<Arc<dyn CommitListener>>>>,
}

impl CommandContextInterceptor {
    pub(crate) fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        registry: Arc<SessionRegistry>,
        default_job_retries: u32,
        listeners: Arc<RwLock<Vec<Arc<dyn CommitListener>>>>,
    ) -> Self {
        Self {
            store,
            clock,
            registry,
            default_job_retries,
            listeners,
        }
    }

    fn close(&self, ctx: &mut CommandContext, txn: Option<&mut TransactionContext>) -> Result<()> {
        if let Some(failure) = ctx.take_failure() {
            return Err(failure);
        }
        let txn =
            txn.ok_or_else(|| EngineError::internal("command context closed outside a transaction"))?;

        let jobs_added = ctx.flush(txn.batch_mut()?)?;
        let events = ctx.take_events();
        if !events.is_empty() || jobs_added > 0 {
            let listeners = self.listeners.read().clone();
            txn.on_post_commit(move || {
                for listener in &listeners {
                    listener.on_commit(&events, jobs_added);
                }
            });
        }
        Ok(())
    }
}

impl CommandInterceptor for CommandContextInterceptor {
    fn name(&self) -> &'static str {
        "command-context"
    }

    fn intercept(&self, invocation: &mut Invocation<'_>, next: Next<'_>) -> Result<()> {
        invocation.context = Some(CommandContext::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            Arc::clone(&self.registry),
            self.default_job_retries,
        ));
        let result = next.run(invocation);

        let mut ctx = invocation
            .context
            .take()
            .ok_or_else(|| EngineError::internal("command context vanished during command"))?;

        let closed = result.and_then(|()| self.close(&mut ctx, invocation.transaction.as_mut()));
        if closed.is_err() {
            ctx.discard();
        }
        closed
    }
}
