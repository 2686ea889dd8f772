//! MemoryStore: in-process implementation of [`Store`]
//!
//! All tables live behind one `parking_lot::RwLock`. `apply` takes the write
//! lock, validates every revision condition of the batch against the current
//! rows (plus the effect of earlier operations in the same batch), and only
//! then mutates. Readers never observe half a batch.
//!
//! Sharing one `Arc<MemoryStore>` between engines is how tests simulate
//! several nodes on one database.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, trace};

use kestrel_core::{
    Deployment, DeploymentId, Job, JobId, ProcessDefinition, ProcessDefinitionId, ResourceEntity,
    TenantId, VersionSequence,
};

use crate::batch::{WriteBatch, WriteOp};
use crate::error::{StoreError, StoreResult};
use crate::store::Store;

#[derive(Debug, Default)]
struct Tables {
    schema_version: String,
    deployments: HashMap<DeploymentId, Deployment>,
    resources: BTreeMap<(DeploymentId, String), ResourceEntity>,
    definitions: HashMap<ProcessDefinitionId, ProcessDefinition>,
    sequences: HashMap<(String, TenantId), VersionSequence>,
    jobs: HashMap<JobId, Job>,
}

/// Identity of a row for revision checks
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    Deployment(DeploymentId),
    Resource(DeploymentId, String),
    Definition(ProcessDefinitionId),
    Sequence(String, TenantId),
    Job(JobId),
}

impl RowKey {
    fn table(&self) -> &'static str {
        match self {
            RowKey::Deployment(_) => "deployments",
            RowKey::Resource(..) => "resources",
            RowKey::Definition(_) => "process_definitions",
            RowKey::Sequence(..) => "version_sequences",
            RowKey::Job(_) => "jobs",
        }
    }

    fn id(&self) -> String {
        match self {
            RowKey::Deployment(id) => id.to_string(),
            RowKey::Resource(d, name) => format!("{}/{}", d, name),
            RowKey::Definition(id) => id.to_string(),
            RowKey::Sequence(key, tenant) => format!("{}@{}", key, tenant),
            RowKey::Job(id) => id.to_string(),
        }
    }
}

impl Tables {
    /// Stored revision of a row; immutable rows report revision 1
    fn revision(&self, row: &RowKey) -> Option<u64> {
        match row {
            RowKey::Deployment(id) => self.deployments.get(id).map(|_| 1),
            RowKey::Resource(d, name) => self.resources.get(&(d.clone(), name.clone())).map(|_| 1),
            RowKey::Definition(id) => self.definitions.get(id).map(|d| d.revision),
            RowKey::Sequence(key, tenant) => self
                .sequences
                .get(&(key.clone(), tenant.clone()))
                .map(|s| s.revision),
            RowKey::Job(id) => self.jobs.get(id).map(|j| j.revision),
        }
    }

    /// Check every condition of `ops` without mutating anything
    fn validate(&self, ops: &[WriteOp]) -> StoreResult<()> {
        // Effect of earlier operations in this batch: Some(rev) = present, None = gone
        let mut overlay: HashMap<RowKey, Option<u64>> = HashMap::new();

        let current = |overlay: &HashMap<RowKey, Option<u64>>, row: &RowKey| -> Option<u64> {
            match overlay.get(row) {
                Some(state) => *state,
                None => self.revision(row),
            }
        };

        let conflict = |row: &RowKey, expected: u64, actual: Option<u64>| StoreError::RevisionConflict {
            table: row.table(),
            id: row.id(),
            expected,
            actual,
        };

        for op in ops {
            match op {
                WriteOp::InsertDeployment(d) => {
                    let row = RowKey::Deployment(d.id.clone());
                    if let Some(actual) = current(&overlay, &row) {
                        return Err(conflict(&row, 0, Some(actual)));
                    }
                    overlay.insert(row, Some(1));
                }
                WriteOp::DeleteDeployment { id } => {
                    overlay.insert(RowKey::Deployment(id.clone()), None);
                }
                WriteOp::InsertResource(r) => {
                    let row = RowKey::Resource(r.deployment_id.clone(), r.name.clone());
                    if let Some(actual) = current(&overlay, &row) {
                        return Err(conflict(&row, 0, Some(actual)));
                    }
                    overlay.insert(row, Some(1));
                }
                WriteOp::InsertProcessDefinition(p) => {
                    let row = RowKey::Definition(p.id.clone());
                    if let Some(actual) = current(&overlay, &row) {
                        return Err(conflict(&row, 0, Some(actual)));
                    }
                    overlay.insert(row, Some(1));
                }
                WriteOp::UpdateProcessDefinition {
                    definition,
                    expected_revision,
                } => {
                    let row = RowKey::Definition(definition.id.clone());
                    let actual = current(&overlay, &row);
                    if actual != Some(*expected_revision) {
                        return Err(conflict(&row, *expected_revision, actual));
                    }
                    overlay.insert(row, Some(expected_revision + 1));
                }
                WriteOp::DeleteProcessDefinition { id } => {
                    overlay.insert(RowKey::Definition(id.clone()), None);
                }
                WriteOp::PutVersionSequence {
                    sequence,
                    expected_revision,
                } => {
                    let row = RowKey::Sequence(sequence.key.clone(), sequence.tenant_id.clone());
                    let actual = current(&overlay, &row);
                    let holds = match (*expected_revision, actual) {
                        (0, None) => true,
                        (expected, Some(actual)) => expected == actual,
                        _ => false,
                    };
                    if !holds {
                        return Err(conflict(&row, *expected_revision, actual));
                    }
                    overlay.insert(row, Some(expected_revision + 1));
                }
                WriteOp::InsertJob(j) => {
                    let row = RowKey::Job(j.id.clone());
                    if let Some(actual) = current(&overlay, &row) {
                        return Err(conflict(&row, 0, Some(actual)));
                    }
                    overlay.insert(row, Some(1));
                }
                WriteOp::UpdateJob {
                    job,
                    expected_revision,
                } => {
                    let row = RowKey::Job(job.id.clone());
                    let actual = current(&overlay, &row);
                    if actual != Some(*expected_revision) {
                        return Err(conflict(&row, *expected_revision, actual));
                    }
                    overlay.insert(row, Some(expected_revision + 1));
                }
                WriteOp::DeleteJob {
                    id,
                    expected_revision,
                } => {
                    let row = RowKey::Job(id.clone());
                    let actual = current(&overlay, &row);
                    if actual != Some(*expected_revision) {
                        return Err(conflict(&row, *expected_revision, actual));
                    }
                    overlay.insert(row, None);
                }
            }
        }
        Ok(())
    }

    /// Apply already-validated operations
    fn apply(&mut self, ops: Vec<WriteOp>) {
        for op in ops {
            match op {
                WriteOp::InsertDeployment(d) => {
                    self.deployments.insert(d.id.clone(), d);
                }
                WriteOp::DeleteDeployment { id } => {
                    self.deployments.remove(&id);
                    self.resources.retain(|(d, _), _| d != &id);
                }
                WriteOp::InsertResource(r) => {
                    self.resources
                        .insert((r.deployment_id.clone(), r.name.clone()), r);
                }
                WriteOp::InsertProcessDefinition(mut p) => {
                    p.revision = 1;
                    self.definitions.insert(p.id.clone(), p);
                }
                WriteOp::UpdateProcessDefinition {
                    mut definition,
                    expected_revision,
                } => {
                    definition.revision = expected_revision + 1;
                    self.definitions.insert(definition.id.clone(), definition);
                }
                WriteOp::DeleteProcessDefinition { id } => {
                    self.definitions.remove(&id);
                }
                WriteOp::PutVersionSequence {
                    mut sequence,
                    expected_revision,
                } => {
                    sequence.revision = expected_revision + 1;
                    self.sequences.insert(
                        (sequence.key.clone(), sequence.tenant_id.clone()),
                        sequence,
                    );
                }
                WriteOp::InsertJob(mut j) => {
                    j.revision = 1;
                    self.jobs.insert(j.id.clone(), j);
                }
                WriteOp::UpdateJob {
                    mut job,
                    expected_revision,
                } => {
                    job.revision = expected_revision + 1;
                    self.jobs.insert(job.id.clone(), job);
                }
                WriteOp::DeleteJob { id, .. } => {
                    self.jobs.remove(&id);
                }
            }
        }
    }
}

/// In-memory [`Store`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Option<Tables>>,
}

impl MemoryStore {
    /// Create a store with no schema installed
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with the current schema already installed
    pub fn with_schema() -> Self {
        let store = Self::new();
        *store.tables.write() = Some(Tables {
            schema_version: crate::store::SCHEMA_VERSION.to_string(),
            ..Tables::default()
        });
        store
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> StoreResult<T> {
        let guard = self.tables.read();
        let tables = guard.as_ref().ok_or(StoreError::SchemaMissing)?;
        Ok(f(tables))
    }
}

impl Store for MemoryStore {
    fn schema_version(&self) -> Option<String> {
        self.tables.read().as_ref().map(|t| t.schema_version.clone())
    }

    fn create_schema(&self, version: &str) -> StoreResult<()> {
        let mut guard = self.tables.write();
        match guard.as_ref() {
            Some(existing) if existing.schema_version == version => Ok(()),
            Some(existing) => Err(StoreError::SchemaVersionMismatch {
                found: existing.schema_version.clone(),
                expected: version.to_string(),
            }),
            None => {
                debug!(target: "kestrel::store", version, "Creating schema");
                *guard = Some(Tables {
                    schema_version: version.to_string(),
                    ..Tables::default()
                });
                Ok(())
            }
        }
    }

    fn drop_schema(&self) -> StoreResult<()> {
        debug!(target: "kestrel::store", "Dropping schema");
        *self.tables.write() = None;
        Ok(())
    }

    fn deployment(&self, id: &DeploymentId) -> StoreResult<Option<Deployment>> {
        self.read(|t| t.deployments.get(id).cloned())
    }

    fn deployments(&self) -> StoreResult<Vec<Deployment>> {
        self.read(|t| {
            let mut all: Vec<Deployment> = t.deployments.values().cloned().collect();
            all.sort_by(|a, b| {
                a.deployment_time
                    .cmp(&b.deployment_time)
                    .then_with(|| a.id.cmp(&b.id))
            });
            all
        })
    }

    fn resources(&self, deployment_id: &DeploymentId) -> StoreResult<Vec<ResourceEntity>> {
        self.read(|t| {
            t.resources
                .values()
                .filter(|r| &r.deployment_id == deployment_id)
                .cloned()
                .collect()
        })
    }

    fn process_definition(
        &self,
        id: &ProcessDefinitionId,
    ) -> StoreResult<Option<ProcessDefinition>> {
        self.read(|t| t.definitions.get(id).cloned())
    }

    fn process_definitions(&self) -> StoreResult<Vec<ProcessDefinition>> {
        self.read(|t| {
            let mut all: Vec<ProcessDefinition> = t.definitions.values().cloned().collect();
            all.sort_by(|a, b| {
                a.key
                    .cmp(&b.key)
                    .then_with(|| a.tenant_id.cmp(&b.tenant_id))
                    .then_with(|| a.version.cmp(&b.version))
            });
            all
        })
    }

    fn version_sequence(
        &self,
        key: &str,
        tenant_id: &TenantId,
    ) -> StoreResult<Option<VersionSequence>> {
        self.read(|t| {
            t.sequences
                .get(&(key.to_string(), tenant_id.clone()))
                .cloned()
        })
    }

    fn job(&self, id: &JobId) -> StoreResult<Option<Job>> {
        self.read(|t| t.jobs.get(id).cloned())
    }

    fn jobs(&self) -> StoreResult<Vec<Job>> {
        self.read(|t| {
            let mut all: Vec<Job> = t.jobs.values().cloned().collect();
            all.sort_by(|a, b| {
                a.due_time
                    .cmp(&b.due_time)
                    .then_with(|| a.created_at.cmp(&b.created_at))
                    .then_with(|| a.id.cmp(&b.id))
            });
            all
        })
    }

    fn due_jobs(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Job>> {
        self.read(|t| {
            let mut due: Vec<Job> = t
                .jobs
                .values()
                .filter(|j| j.is_acquirable_at(now))
                .cloned()
                .collect();
            due.sort_by(|a, b| {
                a.due_time
                    .cmp(&b.due_time)
                    .then_with(|| a.created_at.cmp(&b.created_at))
                    .then_with(|| a.id.cmp(&b.id))
            });
            due.truncate(limit);
            due
        })
    }

    fn apply(&self, batch: WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut guard = self.tables.write();
        let tables = guard.as_mut().ok_or(StoreError::SchemaMissing)?;

        tables.validate(batch.ops())?;
        trace!(target: "kestrel::store", ops = batch.len(), "Applying write batch");
        tables.apply(batch.into_ops());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use kestrel_core::{JobSpec, JobState, SuspensionState};

    fn job(now: DateTime<Utc>) -> Job {
        Job::from_spec(JobSpec::new("noop", serde_json::Value::Null), now, 3)
    }

    fn insert(store: &MemoryStore, op: WriteOp) {
        let mut batch = WriteBatch::new();
        batch.push(op);
        store.apply(batch).unwrap();
    }

    fn definition(key: &str, version: u32) -> ProcessDefinition {
        ProcessDefinition {
            id: ProcessDefinitionId::generate(key, version),
            key: key.to_string(),
            name: None,
            version,
            tenant_id: TenantId::none(),
            deployment_id: DeploymentId::from("d-1"),
            resource_name: format!("{}.flow", key),
            suspension_state: SuspensionState::Active,
            revision: 0,
        }
    }

    #[test]
    fn test_reads_fail_without_schema() {
        let store = MemoryStore::new();
        assert_eq!(store.schema_version(), None);
        assert!(matches!(store.jobs(), Err(StoreError::SchemaMissing)));
        assert!(matches!(
            store.apply({
                let mut b = WriteBatch::new();
                b.push(WriteOp::InsertJob(job(Utc::now())));
                b
            }),
            Err(StoreError::SchemaMissing)
        ));
    }

    #[test]
    fn test_create_schema_is_idempotent_for_same_version() {
        let store = MemoryStore::new();
        store.create_schema("1.0").unwrap();
        store.create_schema("1.0").unwrap();
        assert_eq!(store.schema_version().as_deref(), Some("1.0"));

        let err = store.create_schema("2.0").unwrap_err();
        assert!(matches!(err, StoreError::SchemaVersionMismatch { .. }));
    }

    #[test]
    fn test_drop_schema_removes_rows() {
        let store = MemoryStore::with_schema();
        insert(&store, WriteOp::InsertJob(job(Utc::now())));
        store.drop_schema().unwrap();
        store.create_schema("1.0").unwrap();
        assert!(store.jobs().unwrap().is_empty());
    }

    #[test]
    fn test_insert_assigns_revision_one() {
        let store = MemoryStore::with_schema();
        let mut j = job(Utc::now());
        j.revision = 99;
        insert(&store, WriteOp::InsertJob(j.clone()));
        assert_eq!(store.job(&j.id).unwrap().unwrap().revision, 1);
    }

    #[test]
    fn test_update_requires_matching_revision() {
        let store = MemoryStore::with_schema();
        let j = job(Utc::now());
        insert(&store, WriteOp::InsertJob(j.clone()));

        let mut locked = j.clone();
        locked.lock_owner = Some("node-a".to_string());
        insert(
            &store,
            WriteOp::UpdateJob {
                job: locked.clone(),
                expected_revision: 1,
            },
        );
        assert_eq!(store.job(&j.id).unwrap().unwrap().revision, 2);

        // A second writer that also read revision 1 loses
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::UpdateJob {
            job: locked,
            expected_revision: 1,
        });
        let err = store.apply(batch).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let store = MemoryStore::with_schema();
        let existing = job(Utc::now());
        insert(&store, WriteOp::InsertJob(existing.clone()));

        let fresh = job(Utc::now());
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::InsertJob(fresh.clone()));
        batch.push(WriteOp::DeleteJob {
            id: existing.id.clone(),
            expected_revision: 7,
        });

        assert!(store.apply(batch).is_err());
        assert!(store.job(&fresh.id).unwrap().is_none());
        assert!(store.job(&existing.id).unwrap().is_some());
    }

    #[test]
    fn test_overlay_sees_earlier_ops_in_batch() {
        let store = MemoryStore::with_schema();
        let j = job(Utc::now());

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::InsertJob(j.clone()));
        batch.push(WriteOp::UpdateJob {
            job: j.clone(),
            expected_revision: 1,
        });
        store.apply(batch).unwrap();
        assert_eq!(store.job(&j.id).unwrap().unwrap().revision, 2);
    }

    #[test]
    fn test_version_sequence_zero_means_absent() {
        let store = MemoryStore::with_schema();
        let seq = VersionSequence {
            key: "order".into(),
            tenant_id: TenantId::none(),
            last_version: 1,
            revision: 0,
        };
        insert(
            &store,
            WriteOp::PutVersionSequence {
                sequence: seq.clone(),
                expected_revision: 0,
            },
        );

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutVersionSequence {
            sequence: seq,
            expected_revision: 0,
        });
        assert!(store.apply(batch).unwrap_err().is_conflict());

        let stored = store
            .version_sequence("order", &TenantId::none())
            .unwrap()
            .unwrap();
        assert_eq!(stored.last_version, 1);
        assert_eq!(stored.revision, 1);
    }

    #[test]
    fn test_due_jobs_filters_and_orders() {
        let store = MemoryStore::with_schema();
        let now = Utc::now();

        let mut late = job(now);
        late.due_time = now - Duration::seconds(1);
        let mut early = job(now);
        early.due_time = now - Duration::seconds(10);
        let mut future = job(now);
        future.due_time = now + Duration::seconds(10);
        let mut dead = job(now);
        dead.state = JobState::DeadLetter;
        let mut locked = job(now);
        locked.lock_owner = Some("other".into());
        locked.lock_expiration = Some(now + Duration::minutes(5));
        let mut stale = job(now);
        stale.due_time = now - Duration::seconds(5);
        stale.lock_owner = Some("crashed".into());
        stale.lock_expiration = Some(now - Duration::seconds(1));

        for j in [&late, &early, &future, &dead, &locked, &stale] {
            insert(&store, WriteOp::InsertJob(j.clone()));
        }

        let due = store.due_jobs(now, 10).unwrap();
        let ids: Vec<_> = due.iter().map(|j| j.id.clone()).collect();
        assert_eq!(ids, vec![early.id.clone(), stale.id.clone(), late.id.clone()]);

        assert_eq!(store.due_jobs(now, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_deployment_cascades_resources() {
        let store = MemoryStore::with_schema();
        let id = DeploymentId::from("d-1");
        let deployment = Deployment {
            id: id.clone(),
            name: None,
            category: None,
            key: None,
            tenant_id: TenantId::none(),
            deployment_time: Utc::now(),
            content_hash: "h".into(),
            resource_names: vec!["a.flow".into()],
            enforced_version: None,
            activation_date: None,
            properties: Default::default(),
        };
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::InsertDeployment(deployment));
        batch.push(WriteOp::InsertResource(ResourceEntity {
            deployment_id: id.clone(),
            name: "a.flow".into(),
            bytes: b"X".to_vec(),
        }));
        batch.push(WriteOp::InsertProcessDefinition(definition("a", 1)));
        store.apply(batch).unwrap();
        assert_eq!(store.resources(&id).unwrap().len(), 1);

        insert(&store, WriteOp::DeleteDeployment { id: id.clone() });
        assert!(store.deployment(&id).unwrap().is_none());
        assert!(store.resources(&id).unwrap().is_empty());
    }

    #[test]
    fn test_process_definitions_sorted_by_key_then_version() {
        let store = MemoryStore::with_schema();
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::InsertProcessDefinition(definition("b", 1)));
        batch.push(WriteOp::InsertProcessDefinition(definition("a", 2)));
        batch.push(WriteOp::InsertProcessDefinition(definition("a", 1)));
        store.apply(batch).unwrap();

        let versions: Vec<(String, u32)> = store
            .process_definitions()
            .unwrap()
            .into_iter()
            .map(|d| (d.key, d.version))
            .collect();
        assert_eq!(
            versions,
            vec![("a".into(), 1), ("a".into(), 2), ("b".into(), 1)]
        );
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn revision_advances_only_on_matching_updates(expected in proptest::collection::vec(0u64..6, 1..20)) {
                let store = MemoryStore::with_schema();
                let j = job(Utc::now());
                insert(&store, WriteOp::InsertJob(j.clone()));

                let mut current = 1u64;
                for revision in expected {
                    let mut batch = WriteBatch::new();
                    batch.push(WriteOp::UpdateJob { job: j.clone(), expected_revision: revision });
                    let applied = store.apply(batch);
                    if revision == current {
                        prop_assert!(applied.is_ok());
                        current += 1;
                    } else {
                        prop_assert!(applied.unwrap_err().is_conflict());
                    }
                    prop_assert_eq!(store.job(&j.id).unwrap().unwrap().revision, current);
                }
            }
        }
    }
}
