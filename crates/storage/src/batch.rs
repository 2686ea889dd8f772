//! Write batches
//!
//! A [`WriteBatch`] is the unit a store applies atomically. Each operation may
//! carry a revision condition; the store checks every condition before it
//! applies anything, so either the whole batch lands or none of it does.
//!
//! ## Revision rules
//!
//! | Operation | Condition |
//! |-----------|-----------|
//! | `Insert*` | row must be absent |
//! | `Update*` | stored revision == `expected_revision`; stored revision becomes `expected_revision + 1` |
//! | `DeleteJob` | stored revision == `expected_revision` |
//! | `PutVersionSequence` | `expected_revision == 0` requires absence, otherwise equality |
//! | `DeleteDeployment` / `DeleteProcessDefinition` | none (row may already be gone) |

use kestrel_core::{
    Deployment, DeploymentId, Job, JobId, ProcessDefinition, ProcessDefinitionId, ResourceEntity,
    VersionSequence,
};

/// One staged mutation
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert a deployment row
    InsertDeployment(Deployment),
    /// Delete a deployment row and all of its resources
    DeleteDeployment {
        /// Deployment to delete
        id: DeploymentId,
    },
    /// Insert a resource row
    InsertResource(ResourceEntity),
    /// Insert a process definition row
    InsertProcessDefinition(ProcessDefinition),
    /// Replace a process definition row under a revision check
    UpdateProcessDefinition {
        /// New row content (its `revision` field is ignored)
        definition: ProcessDefinition,
        /// Revision the writer read
        expected_revision: u64,
    },
    /// Delete a process definition row
    DeleteProcessDefinition {
        /// Definition to delete
        id: ProcessDefinitionId,
    },
    /// Create or advance a version sequence
    PutVersionSequence {
        /// New sequence content (its `revision` field is ignored)
        sequence: VersionSequence,
        /// Revision the writer read, 0 when the sequence did not exist
        expected_revision: u64,
    },
    /// Insert a job row
    InsertJob(Job),
    /// Replace a job row under a revision check
    UpdateJob {
        /// New row content (its `revision` field is ignored)
        job: Job,
        /// Revision the writer read
        expected_revision: u64,
    },
    /// Delete a job row under a revision check
    DeleteJob {
        /// Job to delete
        id: JobId,
        /// Revision the writer read
        expected_revision: u64,
    },
}

impl WriteOp {
    /// Table the operation touches (for logging)
    pub fn table(&self) -> &'static str {
        match self {
            WriteOp::InsertDeployment(_) | WriteOp::DeleteDeployment { .. } => "deployments",
            WriteOp::InsertResource(_) => "resources",
            WriteOp::InsertProcessDefinition(_)
            | WriteOp::UpdateProcessDefinition { .. }
            | WriteOp::DeleteProcessDefinition { .. } => "process_definitions",
            WriteOp::PutVersionSequence { .. } => "version_sequences",
            WriteOp::InsertJob(_) | WriteOp::UpdateJob { .. } | WriteOp::DeleteJob { .. } => {
                "jobs"
            }
        }
    }
}

/// Ordered list of operations applied all-or-nothing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation
    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    /// Append every operation of another batch, keeping order
    pub fn extend(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }

    /// Number of operations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True when there is nothing to apply
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Operations in application order
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Consume the batch
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    /// Drop every staged operation
    pub fn clear(&mut self) {
        self.ops.clear();
    }

    /// Number of newly inserted jobs (used for the job-added hint)
    pub fn inserted_jobs(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, WriteOp::InsertJob(_)))
            .count()
    }
}
