//! Engine builder
//!
//! [`EngineConfig`] carries everything that can live in `kestrel.toml`; the
//! builder adds the collaborators that cannot: the shared store, the clock,
//! job handlers, session factories, interceptors, listeners and the resource
//! parser.
//!
//! ```ignore
//! let engine = EngineBuilder::new(EngineConfig::default().with_name("orders"))
//!     .store(shared_store)
//!     .job_handler_fn("send-mail", |job, ctx| mailer.send(job, ctx))
//!     .build()?;
//! ```

use std::sync::Arc;

use kestrel_core::{Clock, EngineError, EngineEvent, Job, Result, SystemClock};
use kestrel_executor::{
    Capability, CommandConfig, CommandContext, CommandExecutor, CommandExecutorBuilder,
    CommandInterceptor, Session, SessionRegistry,
};
use kestrel_storage::{MemoryStore, Store};
use tracing::info;

use super::config::EngineConfig;
use super::registry::ENGINES;
use super::schema::{SchemaOperation, SchemaPhase};
use super::{ProcessEngine, ProcessEngineLifecycleListener};
use crate::deployment::{Deployer, DeploymentCache, FlowResourceParser, ResourceParser};
use crate::events::{EventDispatcher, EventListener};
use crate::jobs::{ActivateProcessDefinitionHandler, AsyncExecutor, JobHandler, JobHandlerRegistry};
use crate::services::{ManagementService, RepositoryService};

type ExecutorCustomizer = Box<dyn FnOnce(CommandExecutorBuilder) -> CommandExecutorBuilder + Send>;

/// Builder for [`ProcessEngine`]
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn Store>>,
    clock: Arc<dyn Clock>,
    handlers: JobHandlerRegistry,
    sessions: SessionRegistry,
    customizers: Vec<ExecutorCustomizer>,
    event_listeners: Vec<EventListener>,
    lifecycle_listeners: Vec<Arc<dyn ProcessEngineLifecycleListener>>,
    parser: Arc<dyn ResourceParser>,
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("handlers", &self.handlers)
            .field("sessions", &self.sessions)
            .field("interceptors", &self.customizers.len())
            .finish()
    }
}

impl EngineBuilder {
    /// Start from a configuration; the store defaults to a fresh in-memory
    /// store and the clock to wall-clock time
    pub fn new(config: EngineConfig) -> Self {
        let mut handlers = JobHandlerRegistry::new();
        handlers.register(Arc::new(ActivateProcessDefinitionHandler));
        Self {
            config,
            store: None,
            clock: Arc::new(SystemClock),
            handlers,
            sessions: SessionRegistry::with_defaults(),
            customizers: Vec::new(),
            event_listeners: Vec::new(),
            lifecycle_listeners: Vec::new(),
            parser: Arc::new(FlowResourceParser),
        }
    }

    /// Use a shared store; engines sharing one store cooperate on its jobs
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a clock
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register a job handler
    pub fn job_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.register(handler);
        self
    }

    /// Register a closure as the job handler for `handler_type`
    pub fn job_handler_fn<F>(mut self, handler_type: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Job, &mut CommandContext) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers.register_fn(handler_type, f);
        self
    }

    /// Register or replace a session factory
    pub fn session_factory<F>(mut self, capability: Capability, factory: F) -> Self
    where
        F: Fn(&Arc<dyn Store>) -> Box<dyn Session> + Send + Sync + 'static,
    {
        self.sessions.register(capability, factory);
        self
    }

    /// Add a custom interceptor between logging and retry
    pub fn command_interceptor(mut self, interceptor: impl CommandInterceptor + 'static) -> Self {
        self.customizers
            .push(Box::new(move |builder| builder.interceptor(interceptor)));
        self
    }

    /// Receive committed engine events
    pub fn event_listener(mut self, listener: impl Fn(&EngineEvent) + Send + Sync + 'static) -> Self {
        self.event_listeners.push(Arc::new(listener));
        self
    }

    /// Observe build and close
    pub fn lifecycle_listener(mut self, listener: Arc<dyn ProcessEngineLifecycleListener>) -> Self {
        self.lifecycle_listeners.push(listener);
        self
    }

    /// Replace the resource parser
    pub fn resource_parser(mut self, parser: Arc<dyn ResourceParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Build, register and start the engine.
    ///
    /// # Errors
    ///
    /// - `Validation` for an invalid configuration
    /// - `EngineLifecycle` when an engine with the same name is registered
    /// - the schema strategy's error; nothing is registered in that case
    pub fn build(self) -> Result<Arc<ProcessEngine>> {
        let config = self.config;
        config.validate()?;
        let schema_strategy = config.schema_strategy()?;

        // Held until the engine is registered so two builds of one name
        // cannot both pass the check
        let mut registry = ENGINES.lock();
        if registry.contains_key(&config.name) {
            return Err(EngineError::EngineLifecycle(format!(
                "an engine named '{}' is already built",
                config.name
            )));
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let retrying = CommandConfig::new().with_retry(config.command_retry.clone());

        let mut executor_builder = CommandExecutor::builder(store)
            .clock(self.clock)
            .sessions(self.sessions)
            .command_retry(config.command_retry.clone())
            .default_job_retries(config.async_executor.default_retries);
        for customize in self.customizers {
            executor_builder = customize(executor_builder);
        }
        let commands = Arc::new(executor_builder.build());

        let version = commands.execute(
            &retrying,
            &SchemaOperation {
                strategy: schema_strategy,
                phase: SchemaPhase::Build,
            },
        )?;
        info!(
            target: "kestrel::engine",
            engine = %config.name,
            schema_update = %config.schema_update,
            version = ?version,
            "Schema ready"
        );

        let events = Arc::new(EventDispatcher::new());
        for listener in self.event_listeners {
            events.add_listener(listener);
        }
        commands.add_commit_listener(events.clone());

        let async_executor = Arc::new(AsyncExecutor::new(
            Arc::clone(&commands),
            Arc::new(self.handlers),
            config.async_executor.clone(),
            config.command_retry.clone(),
        ));
        commands.add_commit_listener(async_executor.job_added_listener());

        let deployer = Arc::new(Deployer::new(
            Arc::clone(&commands),
            self.parser,
            Arc::new(DeploymentCache::new()),
            retrying.clone(),
        ));
        let repository = RepositoryService::new(
            Arc::clone(&commands),
            deployer,
            config.deployment_resource_root.clone(),
            retrying.clone(),
        );
        let management =
            ManagementService::new(Arc::clone(&commands), Arc::clone(&async_executor), retrying);

        let engine = Arc::new(ProcessEngine {
            name: config.name.clone(),
            config,
            schema_strategy,
            commands,
            async_executor,
            events,
            repository,
            management,
            lifecycle_listeners: self.lifecycle_listeners,
            closed: Default::default(),
        });
        registry.insert(engine.name.clone(), Arc::clone(&engine));
        drop(registry);

        if let Err(e) = engine.after_build() {
            let _ = engine.close();
            return Err(e);
        }
        Ok(engine)
    }
}
