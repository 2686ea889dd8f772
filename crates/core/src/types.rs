//! Identifier types shared by every layer
//!
//! - DeploymentId: Unique identifier for a deployment
//! - ProcessDefinitionId: `key:version:uuid` identifier of a definition
//! - JobId: Unique identifier for a persisted job
//! - TenantId: Tenant scope (empty string means "no tenant")

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier string
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Borrow the identifier as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Unique identifier for a deployment (UUID v4 rendered as a string)
    DeploymentId
);

string_id!(
    /// Unique identifier for a process definition
    ///
    /// Generated as `key:version:uuid` so the id is readable in logs while
    /// staying unique across tenants.
    ProcessDefinitionId
);

string_id!(
    /// Unique identifier for a persisted job
    JobId
);

impl DeploymentId {
    /// Create a new random DeploymentId
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for DeploymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    /// Create a new random JobId
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessDefinitionId {
    /// Build a definition id from its key and version
    pub fn generate(key: &str, version: u32) -> Self {
        Self(format!("{}:{}:{}", key, version, Uuid::new_v4()))
    }
}

/// Tenant scope for deployments, definitions and jobs
///
/// The empty string is the "no tenant" scope, so a missing tenant compares
/// equal to every other missing tenant. This keeps `(key, tenant)` usable as
/// a plain map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TenantId(String);

impl TenantId {
    /// The "no tenant" scope
    pub fn none() -> Self {
        Self(String::new())
    }

    /// Create a tenant scope
    pub fn new(tenant: impl Into<String>) -> Self {
        Self(tenant.into())
    }

    /// True for the "no tenant" scope
    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the tenant as a string slice (empty when unscoped)
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("<none>")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<Option<String>> for TenantId {
    fn from(s: Option<String>) -> Self {
        Self(s.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deployment_ids_are_unique() {
        let a = DeploymentId::new();
        let b = DeploymentId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_process_definition_id_contains_key_and_version() {
        let id = ProcessDefinitionId::generate("invoice", 7);
        assert!(id.as_str().starts_with("invoice:7:"));
    }

    #[test]
    fn test_tenant_none_equality() {
        assert_eq!(TenantId::none(), TenantId::default());
        assert_eq!(TenantId::from(None), TenantId::none());
        assert!(TenantId::none().is_none());
        assert!(!TenantId::new("acme").is_none());
    }

    #[test]
    fn test_tenant_display() {
        assert_eq!(TenantId::none().to_string(), "<none>");
        assert_eq!(TenantId::new("acme").to_string(), "acme");
    }
}
