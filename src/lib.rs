//! Kestrel - embeddable process-orchestration engine core
//!
//! Kestrel provides the substrate a process engine runs on: transactional
//! commands, versioned deployments and exactly-once background jobs over a
//! pluggable store.
//!
//! # Quick Start
//!
//! ```ignore
//! use kestrel::{EngineConfig, ProcessEngine};
//!
//! let engine = ProcessEngine::builder(EngineConfig::default()).build()?;
//!
//! let deployment = engine
//!     .repository_service()
//!     .create_deployment()
//!     .name("orders")
//!     .add_string("order.flow", r#"{"key": "order"}"#)
//!     .deploy()?;
//!
//! engine.close()?;
//! ```
//!
//! # Architecture
//!
//! Every store access runs as a command through the
//! [`CommandExecutor`](executor::CommandExecutor): interceptors wrap it in a
//! transaction, optimistic-lock retry and logging, and staged events are
//! dispatched only after commit. The lower layers are available as modules
//! for custom commands and stores.

pub use kestrel_engine::*;

/// Shared types: entities, ids, errors, events, clocks
pub use kestrel_core as model;

/// Store trait, write batches and the in-memory store
pub use kestrel_storage as storage;

/// Transaction context and manager
pub use kestrel_concurrency as concurrency;

/// Command executor, interceptors and sessions
pub use kestrel_executor as executor;
