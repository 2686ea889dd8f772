//! Engine events
//!
//! Events are staged on the command context while a command runs and are
//! dispatched only after the enclosing transaction committed. A rolled back
//! command dispatches nothing.

use crate::types::JobId;
use serde::{Deserialize, Serialize};

/// Kind of entity an entity event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// A deployment row
    Deployment,
    /// A process definition row
    ProcessDefinition,
    /// A job row
    Job,
}

/// Something observable happened inside the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineEvent {
    /// An engine finished building
    EngineCreated {
        /// Engine name
        engine: String,
    },
    /// An engine was closed
    EngineClosed {
        /// Engine name
        engine: String,
    },
    /// An entity was inserted
    EntityCreated {
        /// Entity kind
        kind: EntityKind,
        /// Entity id
        id: String,
    },
    /// An entity was deleted
    EntityDeleted {
        /// Entity kind
        kind: EntityKind,
        /// Entity id
        id: String,
    },
    /// A process definition changed suspension state
    EntitySuspended {
        /// Definition id
        id: String,
    },
    /// A process definition became active
    EntityActivated {
        /// Definition id
        id: String,
    },
    /// A job handler finished successfully
    JobExecutionSuccess {
        /// Job id
        job_id: JobId,
    },
    /// A job handler failed
    JobExecutionFailure {
        /// Job id
        job_id: JobId,
        /// Failure summary
        message: String,
    },
    /// A failed job was rescheduled with one retry fewer
    JobRetriesDecremented {
        /// Job id
        job_id: JobId,
        /// Retries left
        retries: u32,
    },
    /// A job exhausted its retries
    JobMovedToDeadLetter {
        /// Job id
        job_id: JobId,
    },
    /// Application-defined event raised by a command or handler
    Custom {
        /// Event name
        name: String,
        /// Event payload
        payload: serde_json::Value,
    },
}

impl EngineEvent {
    /// Short name for logging
    pub fn name(&self) -> &str {
        match self {
            EngineEvent::EngineCreated { .. } => "ENGINE_CREATED",
            EngineEvent::EngineClosed { .. } => "ENGINE_CLOSED",
            EngineEvent::EntityCreated { .. } => "ENTITY_CREATED",
            EngineEvent::EntityDeleted { .. } => "ENTITY_DELETED",
            EngineEvent::EntitySuspended { .. } => "ENTITY_SUSPENDED",
            EngineEvent::EntityActivated { .. } => "ENTITY_ACTIVATED",
            EngineEvent::JobExecutionSuccess { .. } => "JOB_EXECUTION_SUCCESS",
            EngineEvent::JobExecutionFailure { .. } => "JOB_EXECUTION_FAILURE",
            EngineEvent::JobRetriesDecremented { .. } => "JOB_RETRIES_DECREMENTED",
            EngineEvent::JobMovedToDeadLetter { .. } => "JOB_MOVED_TO_DEADLETTER",
            EngineEvent::Custom { name, .. } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(
            EngineEvent::EngineCreated {
                engine: "default".into()
            }
            .name(),
            "ENGINE_CREATED"
        );
        assert_eq!(
            EngineEvent::Custom {
                name: "order-shipped".into(),
                payload: serde_json::Value::Null
            }
            .name(),
            "order-shipped"
        );
    }
}
