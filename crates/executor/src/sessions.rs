//! Built-in entity sessions
//!
//! One session per entity capability. Reads go straight to the store; writes
//! are staged and reach the transaction batch only when the command context
//! flushes. Updates and deletes carry the revision the caller read, so a
//! concurrent writer turns the whole commit into an optimistic-lock failure.

use std::any::Any;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kestrel_core::{
    Deployment, DeploymentId, Job, JobId, ProcessDefinition, ProcessDefinitionId, ResourceEntity,
    Result, TenantId, VersionSequence,
};
use kestrel_storage::{Store, WriteBatch, WriteOp};

use crate::session::{Capability, Session, SessionRegistry};

pub(crate) fn register_defaults(registry: &mut SessionRegistry) {
    registry.register(Capability::Deployments, |store| {
        Box::new(DeploymentSession::new(Arc::clone(store)))
    });
    registry.register(Capability::ProcessDefinitions, |store| {
        Box::new(ProcessDefinitionSession::new(Arc::clone(store)))
    });
    registry.register(Capability::Jobs, |store| {
        Box::new(JobSession::new(Arc::clone(store)))
    });
}

macro_rules! staging_session {
    ($name:ident) => {
        impl Session for $name {
            fn flush(&mut self, batch: &mut WriteBatch) -> Result<()> {
                for op in self.staged.drain(..) {
                    batch.push(op);
                }
                Ok(())
            }

            fn discard(&mut self) {
                self.staged.clear();
            }

            fn as_any_mut(&mut self) -> &mut dyn Any {
                self
            }
        }

        impl $name {
            /// Create a session over `store`
            pub fn new(store: Arc<dyn Store>) -> Self {
                Self {
                    store,
                    staged: Vec::new(),
                }
            }

            /// Operations staged so far
            pub fn staged(&self) -> &[WriteOp] {
                &self.staged
            }
        }
    };
}

// =============================================================================
// Deployments
// =============================================================================

/// Deployments and resources
pub struct DeploymentSession {
    store: Arc<dyn Store>,
    staged: Vec<WriteOp>,
}

staging_session!(DeploymentSession);

impl DeploymentSession {
    /// Deployment by id
    pub fn find(&self, id: &DeploymentId) -> Result<Option<Deployment>> {
        Ok(self.store.deployment(id)?)
    }

    /// All deployments ordered by deployment time
    pub fn all(&self) -> Result<Vec<Deployment>> {
        Ok(self.store.deployments()?)
    }

    /// Resources of a deployment
    pub fn resources(&self, id: &DeploymentId) -> Result<Vec<ResourceEntity>> {
        Ok(self.store.resources(id)?)
    }

    /// Most recent deployment whose key (or name) is `scope` for `tenant`
    ///
    /// A `None` scope matches deployments that carry neither key nor name.
    pub fn latest_in_scope(
        &self,
        scope: Option<&str>,
        tenant: &TenantId,
    ) -> Result<Option<Deployment>> {
        Ok(self
            .store
            .deployments()?
            .into_iter()
            .filter(|d| d.filter_scope() == scope && &d.tenant_id == tenant)
            .max_by(|a, b| {
                a.deployment_time
                    .cmp(&b.deployment_time)
                    .then_with(|| a.id.cmp(&b.id))
            }))
    }

    /// Stage a new deployment with its resources
    pub fn insert(&mut self, deployment: Deployment, resources: Vec<ResourceEntity>) {
        self.staged.push(WriteOp::InsertDeployment(deployment));
        self.staged
            .extend(resources.into_iter().map(WriteOp::InsertResource));
    }

    /// Stage deletion of a deployment and its resources
    pub fn delete(&mut self, id: &DeploymentId) {
        self.staged.push(WriteOp::DeleteDeployment { id: id.clone() });
    }
}

// =============================================================================
// Process definitions
// =============================================================================

/// Process definitions and version sequences
pub struct ProcessDefinitionSession {
    store: Arc<dyn Store>,
    staged: Vec<WriteOp>,
}

staging_session!(ProcessDefinitionSession);

impl ProcessDefinitionSession {
    /// Definition by id
    pub fn find(&self, id: &ProcessDefinitionId) -> Result<Option<ProcessDefinition>> {
        Ok(self.store.process_definition(id)?)
    }

    /// All definitions ordered by key, tenant, version
    pub fn all(&self) -> Result<Vec<ProcessDefinition>> {
        Ok(self.store.process_definitions()?)
    }

    /// Definitions introduced by one deployment
    pub fn by_deployment(&self, id: &DeploymentId) -> Result<Vec<ProcessDefinition>> {
        Ok(self
            .store
            .process_definitions()?
            .into_iter()
            .filter(|d| &d.deployment_id == id)
            .collect())
    }

    /// Highest stored version for `(key, tenant)`
    pub fn latest(&self, key: &str, tenant: &TenantId) -> Result<Option<ProcessDefinition>> {
        Ok(self
            .store
            .process_definitions()?
            .into_iter()
            .filter(|d| d.key == key && &d.tenant_id == tenant)
            .max_by_key(|d| d.version))
    }

    /// Stored definition with an exact `(key, tenant, version)`
    pub fn find_version(
        &self,
        key: &str,
        tenant: &TenantId,
        version: u32,
    ) -> Result<Option<ProcessDefinition>> {
        Ok(self
            .store
            .process_definitions()?
            .into_iter()
            .find(|d| d.key == key && &d.tenant_id == tenant && d.version == version))
    }

    /// Version sequence for `(key, tenant)`
    pub fn version_sequence(&self, key: &str, tenant: &TenantId) -> Result<Option<VersionSequence>> {
        Ok(self.store.version_sequence(key, tenant)?)
    }

    /// Stage a new definition
    pub fn insert(&mut self, definition: ProcessDefinition) {
        self.staged.push(WriteOp::InsertProcessDefinition(definition));
    }

    /// Stage an update conditioned on the revision carried by `definition`
    pub fn update(&mut self, definition: ProcessDefinition) {
        let expected_revision = definition.revision;
        self.staged.push(WriteOp::UpdateProcessDefinition {
            definition,
            expected_revision,
        });
    }

    /// Stage deletion of a definition
    pub fn delete(&mut self, id: &ProcessDefinitionId) {
        self.staged
            .push(WriteOp::DeleteProcessDefinition { id: id.clone() });
    }

    /// Stage a sequence write conditioned on the revision carried by
    /// `sequence` (0 for a new sequence)
    pub fn put_version_sequence(&mut self, sequence: VersionSequence) {
        let expected_revision = sequence.revision;
        self.staged.push(WriteOp::PutVersionSequence {
            sequence,
            expected_revision,
        });
    }
}

// =============================================================================
// Jobs
// =============================================================================

/// Job rows
///
/// New jobs are staged on the command context instead, so that their
/// insertion can be counted for the acquisition wake-up.
pub struct JobSession {
    store: Arc<dyn Store>,
    staged: Vec<WriteOp>,
}

staging_session!(JobSession);

impl JobSession {
    /// Job by id
    pub fn find(&self, id: &JobId) -> Result<Option<Job>> {
        Ok(self.store.job(id)?)
    }

    /// All jobs
    pub fn all(&self) -> Result<Vec<Job>> {
        Ok(self.store.jobs()?)
    }

    /// Acquirable jobs at `now`, due-time order
    pub fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>> {
        Ok(self.store.due_jobs(now, limit)?)
    }

    /// Stage an update conditioned on the revision carried by `job`
    pub fn update(&mut self, job: Job) {
        let expected_revision = job.revision;
        self.staged.push(WriteOp::UpdateJob {
            job,
            expected_revision,
        });
    }

    /// Stage deletion conditioned on the revision carried by `job`
    pub fn delete(&mut self, job: &Job) {
        self.staged.push(WriteOp::DeleteJob {
            id: job.id.clone(),
            expected_revision: job.revision,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::JobSpec;
    use kestrel_storage::MemoryStore;

    fn store() -> Arc<dyn Store> {
        Arc::new(MemoryStore::with_schema())
    }

    #[test]
    fn test_flush_moves_staged_ops() {
        let mut session = JobSession::new(store());
        let job = Job::from_spec(JobSpec::new("noop", serde_json::Value::Null), Utc::now(), 3);
        session.update(job.clone());
        session.delete(&job);
        assert_eq!(session.staged().len(), 2);

        let mut batch = WriteBatch::new();
        session.flush(&mut batch).unwrap();
        assert_eq!(batch.len(), 2);
        assert!(session.staged().is_empty());
    }

    #[test]
    fn test_discard_drops_staged_ops() {
        let mut session = DeploymentSession::new(store());
        session.delete(&DeploymentId::from("d-1"));
        session.discard();
        assert!(session.staged().is_empty());
    }

    #[test]
    fn test_update_carries_read_revision() {
        let mut session = ProcessDefinitionSession::new(store());
        session.put_version_sequence(VersionSequence {
            key: "order".into(),
            tenant_id: TenantId::none(),
            last_version: 4,
            revision: 3,
        });
        match &session.staged()[0] {
            WriteOp::PutVersionSequence {
                expected_revision, ..
            } => assert_eq!(*expected_revision, 3),
            other => panic!("unexpected op {:?}", other),
        }
    }
}
