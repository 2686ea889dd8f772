//! The shared data store seam
//!
//! Several engine instances may hold the same `Arc<dyn Store>`; that is how
//! cooperating nodes share one database. The only coordination primitive the
//! engine needs from a store is [`Store::apply`]: check every revision
//! condition of a batch, then apply all of it or none of it.

use crate::batch::WriteBatch;
use crate::error::StoreResult;
use chrono::{DateTime, Utc};
use kestrel_core::{
    Deployment, DeploymentId, Job, JobId, ProcessDefinition, ProcessDefinitionId, ResourceEntity,
    TenantId, VersionSequence,
};

/// Schema version this engine writes and expects
pub const SCHEMA_VERSION: &str = "1.0";

/// Persistence backend for deployments, resources, definitions and jobs
pub trait Store: Send + Sync {
    // =========================================================================
    // Schema
    // =========================================================================

    /// Version of the installed schema, `None` when absent
    fn schema_version(&self) -> Option<String>;

    /// Create the schema; a no-op when it already exists at `version`
    fn create_schema(&self, version: &str) -> StoreResult<()>;

    /// Drop the schema and every row
    fn drop_schema(&self) -> StoreResult<()>;

    // =========================================================================
    // Reads
    // =========================================================================

    /// Deployment by id
    fn deployment(&self, id: &DeploymentId) -> StoreResult<Option<Deployment>>;

    /// All deployments ordered by deployment time
    fn deployments(&self) -> StoreResult<Vec<Deployment>>;

    /// Resources of one deployment ordered by name
    fn resources(&self, deployment_id: &DeploymentId) -> StoreResult<Vec<ResourceEntity>>;

    /// Process definition by id
    fn process_definition(&self, id: &ProcessDefinitionId)
        -> StoreResult<Option<ProcessDefinition>>;

    /// All process definitions ordered by key, tenant and version
    fn process_definitions(&self) -> StoreResult<Vec<ProcessDefinition>>;

    /// Version sequence of a `(key, tenant)` pair
    fn version_sequence(&self, key: &str, tenant_id: &TenantId)
        -> StoreResult<Option<VersionSequence>>;

    /// Job by id
    fn job(&self, id: &JobId) -> StoreResult<Option<Job>>;

    /// All jobs, executable and dead-lettered, ordered by due time
    fn jobs(&self) -> StoreResult<Vec<Job>>;

    /// Executable jobs due at `now` that are unlocked or whose lock expired,
    /// in due-time order, at most `limit`
    fn due_jobs(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Job>>;

    // =========================================================================
    // Writes
    // =========================================================================

    /// Apply a batch atomically under its revision conditions
    fn apply(&self, batch: WriteBatch) -> StoreResult<()>;
}
