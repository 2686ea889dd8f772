//! Atomicity tests: a failing session flush leaves nothing behind.

use std::any::Any;
use std::sync::Arc;

use kestrel_core::{DeploymentId, EngineError, JobSpec, Result};
use kestrel_storage::{Store, WriteBatch};

use super::builder;
use crate::{Capability, CommandContext, Session, SessionRegistry};

/// Session whose flush always fails
struct BrokenSession;

impl Session for BrokenSession {
    fn flush(&mut self, _batch: &mut WriteBatch) -> Result<()> {
        Err(EngineError::Storage("disk unplugged".into()))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn registry_with_broken_session() -> SessionRegistry {
    let mut registry = SessionRegistry::with_defaults();
    registry.register(Capability::Custom("broken"), |_| Box::new(BrokenSession));
    registry
}

#[test]
fn test_later_flush_failure_hides_earlier_flushes() {
    let store: Arc<dyn Store> = Arc::new(kestrel_storage::MemoryStore::with_schema());
    let executor = builder(&store)
        .sessions(registry_with_broken_session())
        .build();

    let result = executor.run(&|ctx: &mut CommandContext| -> Result<()> {
        ctx.deployments()?.delete(&DeploymentId::from("d-1"));
        ctx.schedule_job(JobSpec::new("noop", serde_json::Value::Null));
        ctx.session::<BrokenSession>(Capability::Custom("broken"))?;
        Ok(())
    });

    assert!(matches!(result, Err(EngineError::Storage(_))));
    assert!(store.jobs().unwrap().is_empty());
    assert_eq!(executor.transaction_stats().rolled_back, 1);
}

#[test]
fn test_unregistered_capability_is_fatal() {
    let store: Arc<dyn Store> = Arc::new(kestrel_storage::MemoryStore::with_schema());
    let executor = builder(&store).sessions(SessionRegistry::new()).build();

    let err = executor
        .run(&|ctx: &mut CommandContext| -> Result<()> {
            ctx.jobs()?;
            Ok(())
        })
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::UnsupportedCapability {
            capability: "jobs".into()
        }
    );
}
