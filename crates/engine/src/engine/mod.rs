//! The process engine
//!
//! ## Lifecycle
//!
//! ```text
//! EngineBuilder::build() ──► Built ──close()──► Closed
//! ```
//!
//! `build()` wires the command executor, deployer and async executor, runs
//! the schema strategy, registers the engine process-wide under its name,
//! starts the async executor when configured to, and dispatches
//! `EngineCreated`. `close()` reverses that: unregister, stop the async
//! executor, run the close-time schema strategy, dispatch `EngineClosed`.
//! A closed engine rejects every command.

pub mod builder;
pub mod config;
pub mod registry;
pub(crate) mod schema;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kestrel_core::{EngineEvent, Result};
use kestrel_executor::{CommandConfig, CommandExecutor};
use tracing::info;

use crate::events::EventDispatcher;
use crate::jobs::AsyncExecutor;
use crate::services::{ManagementService, RepositoryService};
use config::{EngineConfig, SchemaStrategy};
use schema::{SchemaOperation, SchemaPhase};

pub use builder::EngineBuilder;

/// Observer of engine build and close
pub trait ProcessEngineLifecycleListener: Send + Sync {
    /// Called once the engine is registered and running
    fn on_engine_built(&self, _engine: &ProcessEngine) {}

    /// Called at the end of `close()`
    fn on_engine_closed(&self, _engine: &ProcessEngine) {}
}

/// A built engine and its services
pub struct ProcessEngine {
    name: String,
    config: EngineConfig,
    schema_strategy: SchemaStrategy,
    commands: Arc<CommandExecutor>,
    async_executor: Arc<AsyncExecutor>,
    events: Arc<EventDispatcher>,
    repository: RepositoryService,
    management: ManagementService,
    lifecycle_listeners: Vec<Arc<dyn ProcessEngineLifecycleListener>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ProcessEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessEngine")
            .field("name", &self.name)
            .field("schema_strategy", &self.schema_strategy)
            .field("async_executor", &self.async_executor)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ProcessEngine {
    /// Start building an engine from `config`
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Registry name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration the engine was built with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Deployments and process definitions
    pub fn repository_service(&self) -> &RepositoryService {
        &self.repository
    }

    /// Jobs and schema
    pub fn management_service(&self) -> &ManagementService {
        &self.management
    }

    /// The command pipeline, for custom commands
    pub fn command_executor(&self) -> &Arc<CommandExecutor> {
        &self.commands
    }

    /// Background job execution
    pub fn async_executor(&self) -> &Arc<AsyncExecutor> {
        &self.async_executor
    }

    /// Post-commit event fan-out
    pub fn event_dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    /// True after `close()`
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn schema_config(&self) -> CommandConfig {
        CommandConfig::new().with_retry(self.config.command_retry.clone())
    }

    /// Called by the builder after registration, outside the registry lock
    pub(crate) fn after_build(&self) -> Result<()> {
        if self.config.async_executor.activate {
            self.async_executor.start()?;
        }
        for listener in &self.lifecycle_listeners {
            listener.on_engine_built(self);
        }
        self.events.dispatch(&EngineEvent::EngineCreated {
            engine: self.name.clone(),
        });
        info!(target: "kestrel::engine", engine = %self.name, "Process engine built");
        Ok(())
    }

    /// Close the engine. Idempotent.
    ///
    /// The engine is unregistered and stopped even when the close-time schema
    /// command fails; that error is returned afterwards.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        registry::unregister(self);
        self.async_executor.shutdown();

        let schema = self
            .commands
            .execute(
                &self.schema_config(),
                &SchemaOperation {
                    strategy: self.schema_strategy,
                    phase: SchemaPhase::Close,
                },
            )
            .map(|_| ());

        for listener in &self.lifecycle_listeners {
            listener.on_engine_closed(self);
        }
        self.events.dispatch(&EngineEvent::EngineClosed {
            engine: self.name.clone(),
        });
        self.commands.close();
        info!(target: "kestrel::engine", engine = %self.name, "Process engine closed");
        schema
    }
}
