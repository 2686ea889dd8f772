//! The CommandExecutor - single entry point for running work against the store.
//!
//! The executor owns the interceptor chain and nothing else that changes per
//! command. It is `Send + Sync`; synchronous callers and async-executor
//! workers share one instance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use kestrel_concurrency::{TransactionManager, TransactionStats};
use kestrel_core::{Clock, EngineError, EngineEvent, Result, SystemClock};
use kestrel_storage::Store;

use crate::command::{Command, CommandConfig};
use crate::context::CommandContext;
use crate::interceptor::{
    CommandContextInterceptor, CommandInterceptor, Invocation, LoggingInterceptor, Next,
    RetryInterceptor, TransactionInterceptor,
};
use crate::retry::RetryConfig;
use crate::session::SessionRegistry;

/// Notified after a command's transaction committed
///
/// Never called for rolled-back commands.
pub trait CommitListener: Send + Sync {
    /// `events` were staged by the command; `jobs_added` new jobs were inserted
    fn on_commit(&self, events: &[EngineEvent], jobs_added: usize);
}

/// Runs commands through the interceptor chain
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use kestrel_core::Result;
/// use kestrel_executor::{CommandContext, CommandExecutor};
/// use kestrel_storage::MemoryStore;
///
/// let executor = CommandExecutor::builder(Arc::new(MemoryStore::with_schema())).build();
/// let count = executor
///     .run(&|ctx: &mut CommandContext| -> Result<usize> { Ok(ctx.jobs()?.all()?.len()) })
///     .unwrap();
/// assert_eq!(count, 0);
/// ```
pub struct CommandExecutor {
    chain: Vec<Arc<dyn CommandInterceptor>>,
    listeners: Arc<RwLock<Vec<Arc<dyn CommitListener>>>>,
    manager: Arc<TransactionManager>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    registry: Arc<SessionRegistry>,
    closed: AtomicBool,
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("chain", &self.interceptor_names())
            .field("sessions", &self.registry)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl CommandExecutor {
    /// Start building an executor over `store`
    pub fn builder(store: Arc<dyn Store>) -> CommandExecutorBuilder {
        CommandExecutorBuilder::new(store)
    }

    /// Execute `command` with an explicit configuration
    ///
    /// # Errors
    /// - `EngineLifecycle` once the executor is closed
    /// - Whatever the command or an interceptor raised; the transaction has
    ///   been rolled back by then
    pub fn execute<C: Command + ?Sized>(
        &self,
        config: &CommandConfig,
        command: &C,
    ) -> Result<C::Output> {
        if self.is_closed() {
            return Err(EngineError::EngineLifecycle(
                "command executor is closed".to_string(),
            ));
        }

        let mut output = None;
        let mut body = |ctx: &mut CommandContext| -> Result<()> {
            output = Some(command.execute(ctx)?);
            Ok(())
        };

        {
            let mut invocation = Invocation::new(config, command.name(), &mut body);
            Next::new(&self.chain).run(&mut invocation)?;
        }

        output.ok_or_else(|| EngineError::internal("command completed without output"))
    }

    /// Execute `command` as a plain business command
    pub fn run<C: Command + ?Sized>(&self, command: &C) -> Result<C::Output> {
        self.execute(&CommandConfig::default(), command)
    }

    /// Register a post-commit listener
    pub fn add_commit_listener(&self, listener: Arc<dyn CommitListener>) {
        self.listeners.write().push(listener);
    }

    /// Reject every further command
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// True once closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Store commands run against
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Engine clock
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Session registry
    pub fn session_registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Transaction counters
    pub fn transaction_stats(&self) -> TransactionStats {
        self.manager.stats()
    }

    /// Interceptor names in chain order
    pub fn interceptor_names(&self) -> Vec<&'static str> {
        self.chain.iter().map(|i| i.name()).collect()
    }
}

/// Builder for [`CommandExecutor`]
pub struct CommandExecutorBuilder {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    registry: SessionRegistry,
    command_retry: RetryConfig,
    default_job_retries: u32,
    custom: Vec<Arc<dyn CommandInterceptor>>,
}

impl CommandExecutorBuilder {
    /// Defaults: system clock, built-in sessions, default retry policy,
    /// 3 retries per job
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            registry: SessionRegistry::with_defaults(),
            command_retry: RetryConfig::default(),
            default_job_retries: 3,
            custom: Vec::new(),
        }
    }

    /// Use `clock` for due times and timestamps
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the session registry
    pub fn sessions(mut self, registry: SessionRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Default policy for commands that retry on conflict
    pub fn command_retry(mut self, retry: RetryConfig) -> Self {
        self.command_retry = retry;
        self
    }

    /// Retries given to jobs that do not set their own
    pub fn default_job_retries(mut self, retries: u32) -> Self {
        self.default_job_retries = retries;
        self
    }

    /// Add an interceptor between logging and retry
    pub fn interceptor(mut self, interceptor: impl CommandInterceptor + 'static) -> Self {
        self.custom.push(Arc::new(interceptor));
        self
    }

    /// Compose the chain
    pub fn build(self) -> CommandExecutor {
        let listeners: Arc<RwLock<Vec<Arc<dyn CommitListener>>>> = Arc::default();
        let manager = Arc::new(TransactionManager::new(Arc::clone(&self.store)));
        let registry = Arc::new(self.registry);

        let mut chain: Vec<Arc<dyn CommandInterceptor>> = vec![Arc::new(LoggingInterceptor)];
        chain.extend(self.custom);
        chain.push(Arc::new(RetryInterceptor::new(self.command_retry)));
        chain.push(Arc::new(TransactionInterceptor::new(Arc::clone(&manager))));
        chain.push(Arc::new(CommandContextInterceptor::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            Arc::clone(&registry),
            self.default_job_retries,
            Arc::clone(&listeners),
        )));

        CommandExecutor {
            chain,
            listeners,
            manager,
            store: self.store,
            clock: self.clock,
            registry,
            closed: AtomicBool::new(false),
        }
    }
}
