//! Command context
//!
//! Per-invocation scratch space: the sessions the command opened, the jobs
//! and events it staged, and an optional captured failure. A context never
//! crosses threads and never outlives its invocation; the command-context
//! interceptor either flushes it into the transaction or discards it.

use std::any::type_name;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kestrel_core::{Clock, EngineError, EngineEvent, Job, JobId, JobSpec, Result};
use kestrel_storage::{Store, WriteBatch, WriteOp};
use tracing::trace;

use crate::session::{Capability, Session, SessionRegistry};
use crate::sessions::{DeploymentSession, JobSession, ProcessDefinitionSession};

/// Scratch space of one command invocation
pub struct CommandContext {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    registry: Arc<SessionRegistry>,
    // keyed by registration position so iteration is flush order
    sessions: BTreeMap<usize, (Capability, Box<dyn Session>)>,
    jobs: Vec<Job>,
    events: Vec<EngineEvent>,
    failure: Option<EngineError>,
    default_job_retries: u32,
}

impl std::fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext")
            .field(
                "sessions",
                &self.sessions.values().map(|(c, _)| *c).collect::<Vec<_>>(),
            )
            .field("jobs", &self.jobs.len())
            .field("events", &self.events.len())
            .field("failure", &self.failure)
            .finish()
    }
}

impl CommandContext {
    /// Create an empty context
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        registry: Arc<SessionRegistry>,
        default_job_retries: u32,
    ) -> Self {
        Self {
            store,
            clock,
            registry,
            sessions: BTreeMap::new(),
            jobs: Vec::new(),
            events: Vec::new(),
            failure: None,
            default_job_retries,
        }
    }

    /// Store the command reads from
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Engine clock
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current instant from the engine clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Open the session for `capability`, or return the one already open
    ///
    /// # Errors
    /// - `UnsupportedCapability` when no factory is registered
    /// - `Internal` when the registered session is not an `S`
    pub fn session<S: Session>(&mut self, capability: Capability) -> Result<&mut S> {
        let (position, factory) = self.registry.lookup(capability).ok_or_else(|| {
            EngineError::UnsupportedCapability {
                capability: capability.to_string(),
            }
        })?;

        let store = &self.store;
        let (_, session) = self.sessions.entry(position).or_insert_with(|| {
            trace!(target: "kestrel::command", %capability, "Opening session");
            (capability, factory(store))
        });

        session.as_any_mut().downcast_mut::<S>().ok_or_else(|| {
            EngineError::internal(format!(
                "session registered for {} is not a {}",
                capability,
                type_name::<S>()
            ))
        })
    }

    /// True when a session for `capability` has been opened
    pub fn has_session(&self, capability: Capability) -> bool {
        self.sessions.values().any(|(c, _)| *c == capability)
    }

    /// Deployment session
    pub fn deployments(&mut self) -> Result<&mut DeploymentSession> {
        self.session(Capability::Deployments)
    }

    /// Process definition session
    pub fn process_definitions(&mut self) -> Result<&mut ProcessDefinitionSession> {
        self.session(Capability::ProcessDefinitions)
    }

    /// Job session
    pub fn jobs(&mut self) -> Result<&mut JobSession> {
        self.session(Capability::Jobs)
    }

    // =========================================================================
    // Staged side effects
    // =========================================================================

    /// Stage a new job; it is inserted in the same commit as the command's
    /// other writes
    pub fn schedule_job(&mut self, spec: JobSpec) -> JobId {
        let job = Job::from_spec(spec, self.clock.now(), self.default_job_retries);
        let id = job.id.clone();
        self.jobs.push(job);
        id
    }

    /// Jobs staged so far
    pub fn staged_jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Stage an event for dispatch after commit
    pub fn add_event(&mut self, event: EngineEvent) {
        self.events.push(event);
    }

    /// Events staged so far
    pub fn events(&self) -> &[EngineEvent] {
        &self.events
    }

    /// Record a failure; the context rolls back on close even if the
    /// command returns normally
    pub fn set_failure(&mut self, error: EngineError) {
        if self.failure.is_none() {
            self.failure = Some(error);
        }
    }

    /// Captured failure, if any
    pub fn failure(&self) -> Option<&EngineError> {
        self.failure.as_ref()
    }

    // =========================================================================
    // Close
    // =========================================================================

    pub(crate) fn take_failure(&mut self) -> Option<EngineError> {
        self.failure.take()
    }

    pub(crate) fn take_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    /// Flush every session in registration order, then staged jobs
    ///
    /// Returns the number of jobs added.
    pub(crate) fn flush(&mut self, batch: &mut WriteBatch) -> Result<usize> {
        for (capability, session) in self.sessions.values_mut() {
            let before = batch.len();
            session.flush(batch)?;
            trace!(
                target: "kestrel::command",
                %capability,
                ops = batch.len() - before,
                "Flushed session"
            );
        }
        let added = self.jobs.len();
        for job in self.jobs.drain(..) {
            batch.push(WriteOp::InsertJob(job));
        }
        Ok(added)
    }

    /// Drop everything staged
    pub(crate) fn discard(&mut self) {
        for (_, session) in self.sessions.values_mut() {
            session.discard();
        }
        self.jobs.clear();
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::ManualClock;
    use kestrel_storage::MemoryStore;

    fn context() -> CommandContext {
        CommandContext::new(
            Arc::new(MemoryStore::with_schema()),
            Arc::new(ManualClock::default()),
            Arc::new(SessionRegistry::with_defaults()),
            5,
        )
    }

    #[test]
    fn test_session_open_is_idempotent() {
        let mut ctx = context();
        ctx.jobs()
            .unwrap()
            .delete(&Job::from_spec(JobSpec::new("x", serde_json::Value::Null), Utc::now(), 1));
        // Second open returns the same instance, with the staged op still there
        assert_eq!(ctx.jobs().unwrap().staged().len(), 1);
        assert!(ctx.has_session(Capability::Jobs));
        assert!(!ctx.has_session(Capability::Deployments));
    }

    #[test]
    fn test_unsupported_capability() {
        let mut ctx = CommandContext::new(
            Arc::new(MemoryStore::with_schema()),
            Arc::new(ManualClock::default()),
            Arc::new(SessionRegistry::new()),
            3,
        );
        let err = ctx.jobs().err().unwrap();
        assert_eq!(err.error_code(), "UNSUPPORTED_CAPABILITY");
    }

    #[test]
    fn test_wrong_session_type_is_internal_error() {
        let mut ctx = context();
        let err = ctx
            .session::<JobSession>(Capability::Deployments)
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Internal(_)));
    }

    #[test]
    fn test_scheduled_job_uses_clock_and_default_retries() {
        let mut ctx = context();
        let id = ctx.schedule_job(JobSpec::new("noop", serde_json::Value::Null));
        let job = &ctx.staged_jobs()[0];
        assert_eq!(job.id, id);
        assert_eq!(job.retries, 5);
        assert_eq!(job.due_time, ctx.now());
    }

    #[test]
    fn test_flush_orders_sessions_then_jobs() {
        let mut ctx = context();
        ctx.schedule_job(JobSpec::new("noop", serde_json::Value::Null));
        ctx.process_definitions()
            .unwrap()
            .delete(&kestrel_core::ProcessDefinitionId::from("p"));
        ctx.deployments()
            .unwrap()
            .delete(&kestrel_core::DeploymentId::from("d"));

        let mut batch = WriteBatch::new();
        assert_eq!(ctx.flush(&mut batch).unwrap(), 1);
        let tables: Vec<&str> = batch.ops().iter().map(|op| op.table()).collect();
        assert_eq!(tables, vec!["deployments", "process_definitions", "jobs"]);
    }

    #[test]
    fn test_first_failure_wins() {
        let mut ctx = context();
        ctx.set_failure(EngineError::validation("first"));
        ctx.set_failure(EngineError::validation("second"));
        assert_eq!(ctx.failure(), Some(&EngineError::validation("first")));
    }
}
