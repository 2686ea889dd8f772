//! Fluent deployment builder
//!
//! Collects resources and metadata, then [`DeploymentBuilder::deploy`] hands
//! them to the deployer. Input methods that read (streams, files, archives)
//! keep the chain fluent: the first read failure is remembered and returned
//! by `deploy()` without touching the store.
//!
//! ```ignore
//! let deployment = engine
//!     .repository_service()
//!     .create_deployment()
//!     .name("orders")
//!     .tenant_id("acme")
//!     .add_string("order.flow", r#"{"key": "order"}"#)
//!     .enable_duplicate_filtering()
//!     .deploy()?;
//! ```

use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kestrel_core::{Deployment, EngineError, Result, TenantId};

use super::deployer::{Deployer, DeploymentRequest};
use super::parser::ProcessModel;

/// Builder for one deployment
#[derive(Debug)]
pub struct DeploymentBuilder {
    deployer: Arc<Deployer>,
    resource_root: Option<PathBuf>,
    request: DeploymentRequest,
    error: Option<EngineError>,
}

impl DeploymentBuilder {
    /// Start an empty deployment
    pub fn new(deployer: Arc<Deployer>, resource_root: Option<PathBuf>) -> Self {
        Self {
            deployer,
            resource_root,
            request: DeploymentRequest::default(),
            error: None,
        }
    }

    fn fail(&mut self, error: EngineError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn read_resource(name: &str, mut reader: impl Read) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).map_err(|e| {
            EngineError::validation(format!("failed to read resource '{}': {}", name, e))
        })?;
        Ok(bytes)
    }

    // =========================================================================
    // Resources
    // =========================================================================

    /// Add a resource read from a stream
    pub fn add_input_stream(mut self, resource_name: impl Into<String>, reader: impl Read) -> Self {
        let name = resource_name.into();
        match Self::read_resource(&name, reader) {
            Ok(bytes) => {
                self.request.resources.insert(name, bytes);
            }
            Err(e) => self.fail(e),
        }
        self
    }

    /// Add a resource by classpath-style name, resolved under the engine's
    /// `deployment_resource_root`. The resource keeps the given name.
    pub fn add_classpath_resource(mut self, resource: impl Into<String>) -> Self {
        let name = resource.into();
        match self.resolve_classpath(&name) {
            Ok(path) => match std::fs::read(&path) {
                Ok(bytes) => {
                    self.request.resources.insert(name, bytes);
                }
                Err(e) => self.fail(EngineError::validation(format!(
                    "classpath resource '{}' not readable at '{}': {}",
                    name,
                    path.display(),
                    e
                ))),
            },
            Err(e) => self.fail(e),
        }
        self
    }

    fn resolve_classpath(&self, name: &str) -> Result<PathBuf> {
        let root = self.resource_root.as_ref().ok_or_else(|| {
            EngineError::validation(format!(
                "cannot load classpath resource '{}': no deployment_resource_root configured",
                name
            ))
        })?;
        let relative = Path::new(name.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || name.is_empty() {
            return Err(EngineError::validation(format!(
                "classpath resource '{}' must be a relative path inside the resource root",
                name
            )));
        }
        Ok(root.join(relative))
    }

    /// Add a text resource
    pub fn add_string(mut self, resource_name: impl Into<String>, text: impl Into<String>) -> Self {
        self.request
            .resources
            .insert(resource_name.into(), text.into().into_bytes());
        self
    }

    /// Add a binary resource
    pub fn add_bytes(mut self, resource_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.request
            .resources
            .insert(resource_name.into(), bytes.into());
        self
    }

    /// Add every regular file of a tar archive, named by its path in the
    /// archive
    pub fn add_tar_archive(mut self, reader: impl Read) -> Self {
        match read_tar(reader) {
            Ok(entries) => self.request.resources.extend(entries),
            Err(e) => self.fail(e),
        }
        self
    }

    /// Add an already-built model, stored as JSON
    pub fn add_model(mut self, resource_name: impl Into<String>, model: &ProcessModel) -> Self {
        match model.to_bytes() {
            Ok(bytes) => {
                self.request.resources.insert(resource_name.into(), bytes);
            }
            Err(e) => self.fail(e),
        }
        self
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Deployment name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.request.name = Some(name.into());
        self
    }

    /// Deployment category
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.request.category = Some(category.into());
        self
    }

    /// Deployment key
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.request.key = Some(key.into());
        self
    }

    /// Tenant scope
    pub fn tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.request.tenant_id = TenantId::new(tenant_id);
        self
    }

    /// Force this version onto every definition of the deployment
    pub fn enforced_version(mut self, version: u32) -> Self {
        self.request.enforced_version = Some(version);
        self
    }

    /// Keep definitions suspended until `date`
    pub fn activate_process_definitions_on(mut self, date: DateTime<Utc>) -> Self {
        self.request.activation_date = Some(date);
        self
    }

    /// Return the latest deployment in scope instead of deploying identical
    /// content again
    pub fn enable_duplicate_filtering(mut self) -> Self {
        self.request.duplicate_filtering = true;
        self
    }

    /// Skip model schema validation
    pub fn disable_schema_validation(mut self) -> Self {
        self.request.schema_validation = false;
        self
    }

    /// Skip executability validation
    pub fn disable_executability_validation(mut self) -> Self {
        self.request.executability_validation = false;
        self
    }

    /// Set a deployment property
    pub fn deployment_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.request.properties.insert(key.into(), value.into());
        self
    }

    /// Request collected so far
    pub fn request(&self) -> &DeploymentRequest {
        &self.request
    }

    /// Validate and persist the deployment
    pub fn deploy(self) -> Result<Deployment> {
        if let Some(error) = self.error {
            return Err(error);
        }
        self.deployer.deploy(&self.request)
    }
}

fn read_tar(reader: impl Read) -> Result<Vec<(String, Vec<u8>)>> {
    let archive_error =
        |e: std::io::Error| EngineError::validation(format!("invalid resource archive: {}", e));

    let mut archive = tar::Archive::new(reader);
    let mut resources = Vec::new();
    for entry in archive.entries().map_err(archive_error)? {
        let mut entry = entry.map_err(archive_error)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .map_err(archive_error)?
            .to_string_lossy()
            .into_owned();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).map_err(archive_error)?;
        resources.push((name, bytes));
    }
    Ok(resources)
}
