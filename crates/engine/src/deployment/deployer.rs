//! Deploying resource sets
//!
//! A deploy runs in three steps:
//!
//! 1. **Parse and validate** every resource outside any transaction. A
//!    validation failure returns before anything touches the store.
//! 2. **Persist** the deployment, its resources and one definition per
//!    executable model in a single command. Versions come from the
//!    `(key, tenant)` version sequence, advanced under a revision check; a
//!    concurrent deploy of the same key loses the race, and the command is
//!    retried against the new sequence.
//! 3. **Cache** the parsed models once the transaction committed.
//!
//! With duplicate filtering on, step 2 first compares the content hash with
//! the latest deployment in the same scope (key, falling back to name, plus
//! tenant) and returns that deployment unchanged when the hashes match.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kestrel_core::{
    Deployment, DeploymentId, EngineError, EngineEvent, EntityKind, JobSpec, ProcessDefinition,
    ProcessDefinitionId, ResourceEntity, Result, SuspensionState, TenantId, VersionSequence,
};
use kestrel_executor::{Command, CommandConfig, CommandContext, CommandExecutor};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::cache::DeploymentCache;
use super::parser::{ParseOptions, ProcessModel, ResourceParser};
use crate::jobs::activation::{ActivationPayload, ACTIVATE_PROCESS_DEFINITION};

/// Order-independent SHA-256 over resource names and contents, hex encoded.
///
/// Resources are hashed in name order, each as length-prefixed name followed
/// by length-prefixed bytes, so `("ab", "c")` and `("a", "bc")` differ.
pub fn content_hash<'a, I>(resources: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut sorted: Vec<(&str, &[u8])> = resources.into_iter().collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    for (name, bytes) in sorted {
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Everything a deploy needs, as collected by the deployment builder
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentRequest {
    /// Resources by name
    pub resources: BTreeMap<String, Vec<u8>>,
    /// Deployment name
    pub name: Option<String>,
    /// Deployment category
    pub category: Option<String>,
    /// Deployment key
    pub key: Option<String>,
    /// Tenant scope
    pub tenant_id: TenantId,
    /// Version forced onto every definition
    pub enforced_version: Option<u32>,
    /// Definitions stay suspended until this instant
    pub activation_date: Option<DateTime<Utc>>,
    /// Return the latest deployment in scope when its content is identical
    pub duplicate_filtering: bool,
    /// Run schema validation in the parser
    pub schema_validation: bool,
    /// Reject non-executable models
    pub executability_validation: bool,
    /// Deployment properties
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl Default for DeploymentRequest {
    fn default() -> Self {
        Self {
            resources: BTreeMap::new(),
            name: None,
            category: None,
            key: None,
            tenant_id: TenantId::none(),
            enforced_version: None,
            activation_date: None,
            duplicate_filtering: false,
            schema_validation: true,
            executability_validation: true,
            properties: BTreeMap::new(),
        }
    }
}

impl DeploymentRequest {
    /// Content hash of the resource set
    pub fn content_hash(&self) -> String {
        content_hash(
            self.resources
                .iter()
                .map(|(name, bytes)| (name.as_str(), bytes.as_slice())),
        )
    }
}

/// A model found in a resource
#[derive(Debug, Clone, PartialEq)]
struct ParsedModel {
    resource_name: String,
    model: ProcessModel,
}

/// Persists a parsed deployment; see the module docs
struct DeployCommand<'a> {
    request: &'a DeploymentRequest,
    content_hash: &'a str,
    models: &'a [ParsedModel],
}

/// Result of the persist step
struct Persisted {
    deployment: Deployment,
    definitions: Vec<(ProcessDefinitionId, ProcessModel)>,
    duplicate: bool,
}

impl DeployCommand<'_> {
    fn next_version(
        &self,
        ctx: &mut CommandContext,
        key: &str,
        tenant: &TenantId,
    ) -> Result<u32> {
        let definitions = ctx.process_definitions()?;
        let sequence = definitions.version_sequence(key, tenant)?;
        let (last_version, revision) = sequence
            .as_ref()
            .map_or((0, 0), |s| (s.last_version, s.revision));

        let version = match self.request.enforced_version {
            Some(enforced) => {
                let taken = enforced == 0
                    || enforced <= last_version
                    || definitions.find_version(key, tenant, enforced)?.is_some();
                if taken {
                    return Err(EngineError::validation(format!(
                        "enforced version {} of process '{}' (tenant {}) collides with version sequence at {}",
                        enforced, key, tenant, last_version
                    )));
                }
                enforced
            }
            None => last_version.checked_add(1).ok_or_else(|| {
                EngineError::internal(format!("version sequence of '{}' exhausted", key))
            })?,
        };

        definitions.put_version_sequence(VersionSequence {
            key: key.to_string(),
            tenant_id: tenant.clone(),
            last_version: version,
            revision,
        });
        Ok(version)
    }
}

impl Command for DeployCommand<'_> {
    type Output = Persisted;

    fn name(&self) -> &str {
        "DeployCommand"
    }

    fn execute(&self, ctx: &mut CommandContext) -> Result<Persisted> {
        let request = self.request;

        if request.duplicate_filtering {
            let scope = request.key.as_deref().or(request.name.as_deref());
            let latest = ctx
                .deployments()?
                .latest_in_scope(scope, &request.tenant_id)?;
            if let Some(existing) = latest {
                if existing.content_hash == self.content_hash {
                    return Ok(Persisted {
                        deployment: existing,
                        definitions: Vec::new(),
                        duplicate: true,
                    });
                }
            }
        }

        let deployment = Deployment {
            id: DeploymentId::new(),
            name: request.name.clone(),
            category: request.category.clone(),
            key: request.key.clone(),
            tenant_id: request.tenant_id.clone(),
            deployment_time: ctx.now(),
            content_hash: self.content_hash.to_string(),
            resource_names: request.resources.keys().cloned().collect(),
            enforced_version: request.enforced_version,
            activation_date: request.activation_date,
            properties: request.properties.clone(),
        };
        let resources = request
            .resources
            .iter()
            .map(|(name, bytes)| ResourceEntity {
                deployment_id: deployment.id.clone(),
                name: name.clone(),
                bytes: bytes.clone(),
            })
            .collect();
        ctx.deployments()?.insert(deployment.clone(), resources);
        ctx.add_event(EngineEvent::EntityCreated {
            kind: EntityKind::Deployment,
            id: deployment.id.to_string(),
        });

        let suspension_state = if request.activation_date.is_some() {
            SuspensionState::Suspended
        } else {
            SuspensionState::Active
        };

        let mut definitions = Vec::new();
        for parsed in self.models.iter().filter(|p| p.model.executable) {
            let key = parsed.model.key.as_str();
            let version = self.next_version(ctx, key, &request.tenant_id)?;
            let definition = ProcessDefinition {
                id: ProcessDefinitionId::generate(key, version),
                key: key.to_string(),
                name: parsed.model.name.clone(),
                version,
                tenant_id: request.tenant_id.clone(),
                deployment_id: deployment.id.clone(),
                resource_name: parsed.resource_name.clone(),
                suspension_state,
                revision: 1,
            };
            let id = definition.id.clone();
            ctx.process_definitions()?.insert(definition);
            ctx.add_event(EngineEvent::EntityCreated {
                kind: EntityKind::ProcessDefinition,
                id: id.to_string(),
            });

            if let Some(activation_date) = request.activation_date {
                let payload = serde_json::to_value(ActivationPayload {
                    process_definition_id: id.clone(),
                })?;
                ctx.schedule_job(
                    JobSpec::new(ACTIVATE_PROCESS_DEFINITION, payload)
                        .due_at(activation_date)
                        .with_tenant(request.tenant_id.clone()),
                );
            }
            definitions.push((id, parsed.model.clone()));
        }

        Ok(Persisted {
            deployment,
            definitions,
            duplicate: false,
        })
    }
}

/// Turns deployment requests into persisted deployments
pub struct Deployer {
    commands: Arc<CommandExecutor>,
    parser: Arc<dyn ResourceParser>,
    cache: Arc<DeploymentCache>,
    config: CommandConfig,
}

impl std::fmt::Debug for Deployer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deployer")
            .field("cache", &self.cache.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Deployer {
    /// Create a deployer running its command with `config`
    pub fn new(
        commands: Arc<CommandExecutor>,
        parser: Arc<dyn ResourceParser>,
        cache: Arc<DeploymentCache>,
        config: CommandConfig,
    ) -> Self {
        Self {
            commands,
            parser,
            cache,
            config,
        }
    }

    /// Parser in use
    pub fn parser(&self) -> &Arc<dyn ResourceParser> {
        &self.parser
    }

    /// Definition cache filled by this deployer
    pub fn cache(&self) -> &Arc<DeploymentCache> {
        &self.cache
    }

    fn parse(&self, request: &DeploymentRequest) -> Result<Vec<ParsedModel>> {
        let options = ParseOptions {
            schema_validation: request.schema_validation,
            executability_validation: request.executability_validation,
            properties: &request.properties,
        };

        let mut models = Vec::new();
        let mut keys = BTreeSet::new();
        for (name, bytes) in &request.resources {
            if name.trim().is_empty() {
                return Err(EngineError::validation("resource name must not be empty"));
            }
            if !self.parser.accepts(name) {
                continue;
            }
            for model in self.parser.parse(name, bytes, &options)? {
                if model.executable && !keys.insert(model.key.clone()) {
                    return Err(EngineError::validation(format!(
                        "process '{}' is declared more than once in this deployment",
                        model.key
                    )));
                }
                models.push(ParsedModel {
                    resource_name: name.clone(),
                    model,
                });
            }
        }
        Ok(models)
    }

    /// Validate, persist and cache one deployment.
    ///
    /// Returns the new deployment, or the prior one when duplicate filtering
    /// matched. On error nothing was persisted.
    pub fn deploy(&self, request: &DeploymentRequest) -> Result<Deployment> {
        let models = self.parse(request)?;
        let hash = request.content_hash();
        let command = DeployCommand {
            request,
            content_hash: &hash,
            models: &models,
        };
        let persisted = self.commands.execute(&self.config, &command)?;

        if persisted.duplicate {
            debug!(
                target: "kestrel::deployment",
                deployment_id = %persisted.deployment.id,
                "Duplicate deployment filtered"
            );
            return Ok(persisted.deployment);
        }

        for (id, model) in persisted.definitions.iter().cloned() {
            self.cache
                .insert(id, persisted.deployment.id.clone(), model);
        }
        info!(
            target: "kestrel::deployment",
            deployment_id = %persisted.deployment.id,
            tenant = %persisted.deployment.tenant_id,
            resources = persisted.deployment.resource_names.len(),
            definitions = persisted.definitions.len(),
            "Deployed"
        );
        Ok(persisted.deployment)
    }
}
