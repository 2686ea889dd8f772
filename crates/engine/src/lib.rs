//! Process engine for Kestrel
//!
//! This crate assembles the lower layers into a running engine:
//! - ProcessEngine: build, registry, schema strategy, close
//! - Deployment: resource parsing, versioning, duplicate filtering, cache
//! - Jobs: acquisition, locking, worker pool, retries, dead letters
//! - Services: repository and management facades
//!
//! Everything that touches the store goes through the
//! [`CommandExecutor`](kestrel_executor::CommandExecutor), so every service
//! call is one transaction.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod deployment;
pub mod engine;
pub mod events;
pub mod jobs;
pub mod services;

pub use deployment::{
    content_hash, ChangeSuspensionState, Deployer, DeploymentBuilder, DeploymentCache,
    DeploymentRequest, FlowResourceParser, ParseOptions, ProcessModel, ResourceParser,
};
pub use engine::config::{AsyncExecutorConfig, EngineConfig, SchemaStrategy, CONFIG_FILE_NAME};
pub use engine::registry::{
    close_all, engine_names, engines, get_default_engine, get_engine, DEFAULT_ENGINE_NAME,
};
pub use engine::{EngineBuilder, ProcessEngine, ProcessEngineLifecycleListener};
pub use events::{EventDispatcher, EventListener};
pub use jobs::{
    AsyncExecutor, AsyncExecutorStats, JobHandler, JobHandlerRegistry, JobOutcome, WorkerPool,
};
pub use services::{ManagementService, RepositoryService};
