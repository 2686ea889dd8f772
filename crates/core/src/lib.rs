//! Core types for Kestrel
//!
//! This crate defines the foundational types used throughout the system:
//! - Identifiers: DeploymentId, ProcessDefinitionId, JobId, TenantId
//! - Entities: Deployment, ResourceEntity, ProcessDefinition, VersionSequence, Job
//! - Events: EngineEvent dispatched after commit
//! - Clock: time source used for due times and lock expiration
//! - Error: the caller-visible error hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod error;
pub mod event;
pub mod model;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{EngineError, Result};
pub use event::{EngineEvent, EntityKind};
pub use model::{
    Deployment, Job, JobSpec, JobState, ProcessDefinition, ResourceEntity, SuspensionState,
    VersionSequence,
};
pub use types::{DeploymentId, JobId, ProcessDefinitionId, TenantId};
