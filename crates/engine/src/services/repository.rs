//! Repository service: deployments and process definitions

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use kestrel_core::{
    Deployment, DeploymentId, EngineError, EngineEvent, EntityKind, ProcessDefinition,
    ProcessDefinitionId, ResourceEntity, Result, SuspensionState, TenantId,
};
use kestrel_executor::{Command, CommandConfig, CommandContext, CommandExecutor};
use tracing::info;

use crate::deployment::{
    ChangeSuspensionState, DeploymentBuilder, Deployer, ParseOptions, ProcessModel,
};
use crate::jobs::{ActivationPayload, ACTIVATE_PROCESS_DEFINITION};

/// Delete a deployment with its resources, definitions and pending
/// activation jobs. Version sequences are left untouched.
struct DeleteDeployment {
    id: DeploymentId,
}

impl Command for DeleteDeployment {
    type Output = usize;

    fn execute(&self, ctx: &mut CommandContext) -> Result<usize> {
        if ctx.deployments()?.find(&self.id)?.is_none() {
            return Err(EngineError::not_found("Deployment", self.id.as_str()));
        }

        let definitions = ctx.process_definitions()?.by_deployment(&self.id)?;
        let ids: BTreeSet<ProcessDefinitionId> = definitions.iter().map(|d| d.id.clone()).collect();
        for id in &ids {
            ctx.process_definitions()?.delete(id);
            ctx.add_event(EngineEvent::EntityDeleted {
                kind: EntityKind::ProcessDefinition,
                id: id.to_string(),
            });
        }

        let jobs = ctx.jobs()?;
        for job in jobs.all()? {
            if job.handler_type != ACTIVATE_PROCESS_DEFINITION {
                continue;
            }
            let targets_deleted = serde_json::from_value::<ActivationPayload>(job.payload.clone())
                .map_or(false, |p| ids.contains(&p.process_definition_id));
            if targets_deleted {
                jobs.delete(&job);
            }
        }

        ctx.deployments()?.delete(&self.id);
        ctx.add_event(EngineEvent::EntityDeleted {
            kind: EntityKind::Deployment,
            id: self.id.to_string(),
        });
        Ok(ids.len())
    }
}

/// Deployments, resources and process definitions
#[derive(Debug, Clone)]
pub struct RepositoryService {
    commands: Arc<CommandExecutor>,
    deployer: Arc<Deployer>,
    resource_root: Option<PathBuf>,
    retrying: CommandConfig,
}

impl RepositoryService {
    pub(crate) fn new(
        commands: Arc<CommandExecutor>,
        deployer: Arc<Deployer>,
        resource_root: Option<PathBuf>,
        retrying: CommandConfig,
    ) -> Self {
        Self {
            commands,
            deployer,
            resource_root,
            retrying,
        }
    }

    /// Start a new deployment
    pub fn create_deployment(&self) -> DeploymentBuilder {
        DeploymentBuilder::new(Arc::clone(&self.deployer), self.resource_root.clone())
    }

    /// Delete a deployment, its resources, its process definitions and their
    /// pending activation jobs.
    ///
    /// Version numbers handed out to the deleted definitions are never reused.
    pub fn delete_deployment(&self, id: &DeploymentId) -> Result<()> {
        let removed = self.commands.execute(
            &self.retrying,
            &DeleteDeployment { id: id.clone() },
        )?;
        self.deployer.cache().evict_deployment(id);
        info!(target: "kestrel::deployment", deployment_id = %id, definitions = removed, "Deployment deleted");
        Ok(())
    }

    /// Deployment by id
    pub fn get_deployment(&self, id: &DeploymentId) -> Result<Option<Deployment>> {
        self.commands
            .run(&|ctx: &mut CommandContext| -> Result<Option<Deployment>> {
                ctx.deployments()?.find(id)
            })
    }

    /// All deployments ordered by deployment time
    pub fn list_deployments(&self) -> Result<Vec<Deployment>> {
        self.commands
            .run(&|ctx: &mut CommandContext| -> Result<Vec<Deployment>> {
                ctx.deployments()?.all()
            })
    }

    /// Resources of a deployment ordered by name
    pub fn list_resources(&self, id: &DeploymentId) -> Result<Vec<ResourceEntity>> {
        self.commands
            .run(&|ctx: &mut CommandContext| -> Result<Vec<ResourceEntity>> {
                ctx.deployments()?.resources(id)
            })
    }

    /// One resource of a deployment
    pub fn get_resource(&self, id: &DeploymentId, name: &str) -> Result<Option<ResourceEntity>> {
        Ok(self
            .list_resources(id)?
            .into_iter()
            .find(|r| r.name == name))
    }

    /// Process definition by id
    pub fn get_process_definition(&self, id: &ProcessDefinitionId) -> Result<Option<ProcessDefinition>> {
        self.commands
            .run(&|ctx: &mut CommandContext| -> Result<Option<ProcessDefinition>> {
                ctx.process_definitions()?.find(id)
            })
    }

    /// Highest version of a key within a tenant
    pub fn latest_process_definition(
        &self,
        key: &str,
        tenant_id: &TenantId,
    ) -> Result<Option<ProcessDefinition>> {
        self.commands
            .run(&|ctx: &mut CommandContext| -> Result<Option<ProcessDefinition>> {
                ctx.process_definitions()?.latest(key, tenant_id)
            })
    }

    /// All process definitions ordered by key, tenant and version
    pub fn list_process_definitions(&self) -> Result<Vec<ProcessDefinition>> {
        self.commands
            .run(&|ctx: &mut CommandContext| -> Result<Vec<ProcessDefinition>> {
                ctx.process_definitions()?.all()
            })
    }

    /// Parsed model of a definition, from the cache or re-parsed from its
    /// resource
    pub fn get_process_model(&self, id: &ProcessDefinitionId) -> Result<Arc<ProcessModel>> {
        if let Some(cached) = self.deployer.cache().get(id) {
            return Ok(cached.model);
        }

        let definition = self
            .get_process_definition(id)?
            .ok_or_else(|| EngineError::not_found("ProcessDefinition", id.as_str()))?;
        let deployment = self
            .get_deployment(&definition.deployment_id)?
            .ok_or_else(|| EngineError::not_found("Deployment", definition.deployment_id.as_str()))?;
        let resource = self
            .get_resource(&definition.deployment_id, &definition.resource_name)?
            .ok_or_else(|| EngineError::not_found("Resource", definition.resource_name.as_str()))?;

        let options = ParseOptions {
            schema_validation: false,
            executability_validation: false,
            properties: &deployment.properties,
        };
        let model = self
            .deployer
            .parser()
            .parse(&resource.name, &resource.bytes, &options)?
            .into_iter()
            .find(|m| m.key == definition.key)
            .ok_or_else(|| {
                EngineError::internal(format!(
                    "resource '{}' no longer declares process '{}'",
                    resource.name, definition.key
                ))
            })?;

        self.deployer
            .cache()
            .insert(id.clone(), definition.deployment_id, model);
        self.deployer
            .cache()
            .get(id)
            .map(|cached| cached.model)
            .ok_or_else(|| EngineError::internal("definition evicted while loading"))
    }

    /// Suspend a definition
    pub fn suspend_process_definition(&self, id: &ProcessDefinitionId) -> Result<ProcessDefinition> {
        self.commands.execute(
            &self.retrying,
            &ChangeSuspensionState {
                id: id.clone(),
                target: SuspensionState::Suspended,
            },
        )
    }

    /// Activate a definition
    pub fn activate_process_definition(&self, id: &ProcessDefinitionId) -> Result<ProcessDefinition> {
        self.commands.execute(
            &self.retrying,
            &ChangeSuspensionState {
                id: id.clone(),
                target: SuspensionState::Active,
            },
        )
    }
}
