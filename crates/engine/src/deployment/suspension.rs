//! Suspend and activate process definitions

use kestrel_core::{
    EngineError, EngineEvent, ProcessDefinition, ProcessDefinitionId, Result, SuspensionState,
};
use kestrel_executor::{Command, CommandContext};

/// Move a definition into `target`, staging the matching event.
///
/// Returns the definition as it will be after commit. A definition already in
/// `target` is returned unchanged and stages nothing.
pub(crate) fn change_suspension_state(
    ctx: &mut CommandContext,
    id: &ProcessDefinitionId,
    target: SuspensionState,
) -> Result<ProcessDefinition> {
    let definitions = ctx.process_definitions()?;
    let mut definition = definitions
        .find(id)?
        .ok_or_else(|| EngineError::not_found("ProcessDefinition", id.as_str()))?;
    if definition.suspension_state == target {
        return Ok(definition);
    }

    definition.suspension_state = target;
    definitions.update(definition.clone());
    definition.revision += 1;

    let event = match target {
        SuspensionState::Suspended => EngineEvent::EntitySuspended {
            id: id.to_string(),
        },
        SuspensionState::Active => EngineEvent::EntityActivated {
            id: id.to_string(),
        },
    };
    ctx.add_event(event);
    Ok(definition)
}

/// Command form of [`change_suspension_state`]
#[derive(Debug, Clone)]
pub struct ChangeSuspensionState {
    /// Definition to change
    pub id: ProcessDefinitionId,
    /// State to move into
    pub target: SuspensionState,
}

impl Command for ChangeSuspensionState {
    type Output = ProcessDefinition;

    fn execute(&self, ctx: &mut CommandContext) -> Result<ProcessDefinition> {
        change_suspension_state(ctx, &self.id, self.target)
    }
}
