//! Timed activation of suspended process definitions
//!
//! Deployments with an activation date store their definitions suspended and
//! stage one job per definition, due at that date.

use kestrel_core::{EngineError, Job, ProcessDefinitionId, Result, SuspensionState};
use kestrel_executor::CommandContext;
use serde::{Deserialize, Serialize};

use super::handler::JobHandler;
use crate::deployment::suspension::change_suspension_state;

/// Handler type of activation jobs
pub const ACTIVATE_PROCESS_DEFINITION: &str = "activate-process-definition";

/// Payload of an activation job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationPayload {
    /// Definition to activate
    pub process_definition_id: ProcessDefinitionId,
}

/// Activates the definition named in the job payload
#[derive(Debug, Default, Clone, Copy)]
pub struct ActivateProcessDefinitionHandler;

impl JobHandler for ActivateProcessDefinitionHandler {
    fn handler_type(&self) -> &str {
        ACTIVATE_PROCESS_DEFINITION
    }

    fn execute(&self, job: &Job, ctx: &mut CommandContext) -> Result<()> {
        let payload: ActivationPayload = serde_json::from_value(job.payload.clone())?;
        match change_suspension_state(ctx, &payload.process_definition_id, SuspensionState::Active)
        {
            Ok(_) => Ok(()),
            // The deployment was deleted before the activation date
            Err(EngineError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
