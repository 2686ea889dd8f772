//! Process model parsing
//!
//! The engine does not interpret workflow graphs. A [`ResourceParser`] only
//! has to say which process models a resource declares, so the deployer can
//! assign versions and create definitions. [`FlowResourceParser`] is the
//! built-in parser for `*.flow` resources.

use std::collections::BTreeMap;
use std::path::Path;

use kestrel_core::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Suffix of resources the built-in parser reads
pub const FLOW_SUFFIX: &str = ".flow";

fn default_executable() -> bool {
    true
}

/// What a deployment resource declares about one process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessModel {
    /// Definition key; versions are numbered per `(key, tenant)`
    pub key: String,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Non-executable models never become definitions
    #[serde(default = "default_executable")]
    pub executable: bool,
    /// Anything else the model carries, kept verbatim
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl ProcessModel {
    /// An executable model with the given key
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            executable: true,
            attributes: BTreeMap::new(),
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Mark the model executable or not
    pub fn with_executable(mut self, executable: bool) -> Self {
        self.executable = executable;
        self
    }

    /// Serialized form stored as a deployment resource
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// Switches and context handed to a parser
#[derive(Debug, Clone, Copy)]
pub struct ParseOptions<'a> {
    /// Check model structure (key syntax, well-formed content)
    pub schema_validation: bool,
    /// Reject models marked non-executable
    pub executability_validation: bool,
    /// Properties set on the deployment
    pub properties: &'a BTreeMap<String, serde_json::Value>,
}

/// Extracts process models from deployment resources
pub trait ResourceParser: Send + Sync {
    /// True when this parser reads the named resource
    fn accepts(&self, resource_name: &str) -> bool;

    /// Models declared by one resource, in declaration order
    fn parse(
        &self,
        resource_name: &str,
        bytes: &[u8],
        options: &ParseOptions<'_>,
    ) -> Result<Vec<ProcessModel>>;
}

/// Validate a definition key: a letter or `_`, then letters, digits, `_`, `-`, `.`
pub fn validate_key(key: &str) -> Result<()> {
    let mut chars = key.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(EngineError::validation(format!(
            "invalid process key '{}'",
            key
        )))
    }
}

/// Parser for `*.flow` resources.
///
/// A resource whose content is a JSON object is read as a [`ProcessModel`].
/// Any other content declares one executable model keyed by the file stem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlowResourceParser;

impl FlowResourceParser {
    fn stem_model(resource_name: &str) -> Result<ProcessModel> {
        Path::new(resource_name)
            .file_name()
            .and_then(|f| f.to_str())
            .and_then(|f| f.strip_suffix(FLOW_SUFFIX))
            .filter(|stem| !stem.is_empty())
            .map(ProcessModel::new)
            .ok_or_else(|| {
                EngineError::validation(format!(
                    "cannot derive a process key from '{}'",
                    resource_name
                ))
            })
    }
}

impl ResourceParser for FlowResourceParser {
    fn accepts(&self, resource_name: &str) -> bool {
        resource_name.ends_with(FLOW_SUFFIX)
    }

    fn parse(
        &self,
        resource_name: &str,
        bytes: &[u8],
        options: &ParseOptions<'_>,
    ) -> Result<Vec<ProcessModel>> {
        let looks_like_json = bytes
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .map_or(false, |b| *b == b'{');

        let model = if looks_like_json {
            match serde_json::from_slice::<ProcessModel>(bytes) {
                Ok(model) => model,
                Err(e) if options.schema_validation => {
                    return Err(EngineError::validation(format!(
                        "resource '{}' is not a valid process model: {}",
                        resource_name, e
                    )));
                }
                Err(_) => Self::stem_model(resource_name)?,
            }
        } else {
            Self::stem_model(resource_name)?
        };

        if options.schema_validation {
            validate_key(&model.key).map_err(|e| match e {
                EngineError::Validation { message } => {
                    EngineError::validation(format!("{} in resource '{}'", message, resource_name))
                }
                other => other,
            })?;
            if model.name.as_deref().map_or(false, |n| n.trim().is_empty()) {
                return Err(EngineError::validation(format!(
                    "process '{}' in resource '{}' has a blank name",
                    model.key, resource_name
                )));
            }
        }
        if options.executability_validation && !model.executable {
            return Err(EngineError::validation(format!(
                "process '{}' in resource '{}' is not executable",
                model.key, resource_name
            )));
        }
        Ok(vec![model])
    }
}
