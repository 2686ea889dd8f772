//! Persisted entities
//!
//! These are the rows of the four tables the engine owns in the shared store:
//! deployments, resources, process definitions and jobs, plus the per
//! `(key, tenant)` version sequence used for definition numbering.
//!
//! Every mutable row carries a `revision`. Stores apply updates only when the
//! caller's expected revision matches the stored one; that check is the only
//! cross-node arbitration the engine relies on.

use crate::types::{DeploymentId, JobId, ProcessDefinitionId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Deployments
// =============================================================================

/// An immutable bundle of workflow resources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    /// Unique id
    pub id: DeploymentId,
    /// Optional human-readable name
    pub name: Option<String>,
    /// Optional category
    pub category: Option<String>,
    /// Optional key; scope for duplicate filtering together with the tenant
    pub key: Option<String>,
    /// Tenant scope
    pub tenant_id: TenantId,
    /// When the deployment was persisted
    pub deployment_time: DateTime<Utc>,
    /// Order-independent SHA-256 over all resource names and bytes
    pub content_hash: String,
    /// Names of the resources stored with this deployment
    pub resource_names: Vec<String>,
    /// Version forced onto every definition in this deployment
    pub enforced_version: Option<u32>,
    /// Definitions stay suspended until this instant
    pub activation_date: Option<DateTime<Utc>>,
    /// Caller-supplied deployment properties
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl Deployment {
    /// Scope used for duplicate filtering: the key, falling back to the name
    pub fn filter_scope(&self) -> Option<&str> {
        self.key.as_deref().or(self.name.as_deref())
    }
}

/// One named resource of a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntity {
    /// Owning deployment
    pub deployment_id: DeploymentId,
    /// Resource name (unique within the deployment)
    pub name: String,
    /// Raw content
    pub bytes: Vec<u8>,
}

// =============================================================================
// Process definitions
// =============================================================================

/// Whether a definition can start new work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SuspensionState {
    /// Definition is usable
    Active,
    /// Definition is deployed but not usable
    Suspended,
}

/// One versioned workflow identified by `(key, tenant, version)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDefinition {
    /// Unique id
    pub id: ProcessDefinitionId,
    /// Definition key
    pub key: String,
    /// Optional display name
    pub name: Option<String>,
    /// Version within `(key, tenant)`, starting at 1
    pub version: u32,
    /// Tenant scope
    pub tenant_id: TenantId,
    /// Deployment that introduced this version
    pub deployment_id: DeploymentId,
    /// Resource the definition was parsed from
    pub resource_name: String,
    /// Suspension state
    pub suspension_state: SuspensionState,
    /// Optimistic-lock revision
    pub revision: u64,
}

impl ProcessDefinition {
    /// True when the definition is suspended
    pub fn is_suspended(&self) -> bool {
        self.suspension_state == SuspensionState::Suspended
    }
}

/// Highest version ever handed out for a `(key, tenant)` pair
///
/// Kept apart from the definitions themselves so deleting a deployment never
/// rewinds numbering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSequence {
    /// Definition key
    pub key: String,
    /// Tenant scope
    pub tenant_id: TenantId,
    /// Last version assigned
    pub last_version: u32,
    /// Optimistic-lock revision
    pub revision: u64,
}

// =============================================================================
// Jobs
// =============================================================================

/// Whether a job is eligible for acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Eligible once due and unlocked
    Executable,
    /// Retries exhausted; retained for inspection only
    DeadLetter,
}

/// Persisted unit of deferred work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique id
    pub id: JobId,
    /// Type of the handler that executes the job
    pub handler_type: String,
    /// Handler-specific payload
    pub payload: serde_json::Value,
    /// Earliest instant the job may run
    pub due_time: DateTime<Utc>,
    /// Executor currently holding the lock
    pub lock_owner: Option<String>,
    /// Instant the lock becomes stale
    pub lock_expiration: Option<DateTime<Utc>>,
    /// Attempts left before dead-lettering
    pub retries: u32,
    /// Failed executions so far; drives retry backoff
    #[serde(default)]
    pub failed_attempts: u32,
    /// Summary of the last failure
    pub exception_message: Option<String>,
    /// Tenant scope
    pub tenant_id: TenantId,
    /// Acquisition state
    pub state: JobState,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// Optimistic-lock revision
    pub revision: u64,
}

impl Job {
    /// Build a fresh executable job from a spec
    pub fn from_spec(spec: JobSpec, now: DateTime<Utc>, default_retries: u32) -> Self {
        Self {
            id: JobId::new(),
            handler_type: spec.handler_type,
            payload: spec.payload,
            due_time: spec.due_time.unwrap_or(now),
            lock_owner: None,
            lock_expiration: None,
            retries: spec.retries.unwrap_or(default_retries),
            failed_attempts: 0,
            exception_message: None,
            tenant_id: spec.tenant_id,
            state: JobState::Executable,
            created_at: now,
            revision: 1,
        }
    }

    /// True when some owner holds a lock that has not yet expired
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        match (&self.lock_owner, self.lock_expiration) {
            (Some(_), Some(expiration)) => expiration > now,
            (Some(_), None) => true,
            _ => false,
        }
    }

    /// True when the given owner holds a non-expired lock
    pub fn is_locked_by(&self, owner: &str, now: DateTime<Utc>) -> bool {
        self.lock_owner.as_deref() == Some(owner) && self.is_locked_at(now)
    }

    /// True when the acquisition query should return this job
    pub fn is_acquirable_at(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Executable && self.due_time <= now && !self.is_locked_at(now)
    }

    /// True for dead-lettered jobs
    pub fn is_dead_letter(&self) -> bool {
        self.state == JobState::DeadLetter
    }
}

/// Caller description of a job to create
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    /// Handler type
    pub handler_type: String,
    /// Handler payload
    pub payload: serde_json::Value,
    /// Due time; `None` means "now"
    pub due_time: Option<DateTime<Utc>>,
    /// Retries; `None` uses the executor default
    pub retries: Option<u32>,
    /// Tenant scope
    pub tenant_id: TenantId,
}

impl JobSpec {
    /// A job for `handler_type` with the given payload, due immediately
    pub fn new(handler_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            handler_type: handler_type.into(),
            payload,
            due_time: None,
            retries: None,
            tenant_id: TenantId::none(),
        }
    }

    /// Set the due time
    pub fn due_at(mut self, due_time: DateTime<Utc>) -> Self {
        self.due_time = Some(due_time);
        self
    }

    /// Set the retry budget
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Set the tenant
    pub fn with_tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = tenant_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job(now: DateTime<Utc>) -> Job {
        Job::from_spec(JobSpec::new("noop", serde_json::Value::Null), now, 3)
    }

    #[test]
    fn test_from_spec_defaults() {
        let now = Utc::now();
        let j = job(now);
        assert_eq!(j.due_time, now);
        assert_eq!(j.retries, 3);
        assert_eq!(j.state, JobState::Executable);
        assert_eq!(j.revision, 1);
        assert_eq!(j.failed_attempts, 0);
        assert!(j.lock_owner.is_none());
    }

    #[test]
    fn test_acquirable_requires_due_time() {
        let now = Utc::now();
        let mut j = job(now);
        j.due_time = now + Duration::seconds(10);
        assert!(!j.is_acquirable_at(now));
        assert!(j.is_acquirable_at(now + Duration::seconds(10)));
    }

    #[test]
    fn test_lock_expiration_makes_job_acquirable_again() {
        let now = Utc::now();
        let mut j = job(now);
        j.lock_owner = Some("node-a".to_string());
        j.lock_expiration = Some(now + Duration::seconds(30));

        assert!(j.is_locked_at(now));
        assert!(j.is_locked_by("node-a", now));
        assert!(!j.is_locked_by("node-b", now));
        assert!(!j.is_acquirable_at(now));

        let later = now + Duration::seconds(31);
        assert!(!j.is_locked_at(later));
        assert!(j.is_acquirable_at(later));
    }

    #[test]
    fn test_dead_letter_never_acquirable() {
        let now = Utc::now();
        let mut j = job(now);
        j.state = JobState::DeadLetter;
        assert!(j.is_dead_letter());
        assert!(!j.is_acquirable_at(now + Duration::days(365)));
    }

    #[test]
    fn test_filter_scope_falls_back_to_name() {
        let d = Deployment {
            id: DeploymentId::new(),
            name: Some("orders".to_string()),
            category: None,
            key: None,
            tenant_id: TenantId::none(),
            deployment_time: Utc::now(),
            content_hash: String::new(),
            resource_names: vec![],
            enforced_version: None,
            activation_date: None,
            properties: BTreeMap::new(),
        };
        assert_eq!(d.filter_scope(), Some("orders"));

        let keyed = Deployment {
            key: Some("orders-key".to_string()),
            ..d
        };
        assert_eq!(keyed.filter_scope(), Some("orders-key"));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn locked_and_acquirable_are_exclusive(
                due_offset in -600i64..600,
                lock_offset in proptest::option::of(-600i64..600),
                at_offset in -600i64..600,
            ) {
                let now = Utc::now();
                let mut j = job(now);
                j.due_time = now + Duration::seconds(due_offset);
                if let Some(offset) = lock_offset {
                    j.lock_owner = Some("node-a".to_string());
                    j.lock_expiration = Some(now + Duration::seconds(offset));
                }
                let at = now + Duration::seconds(at_offset);

                prop_assert!(!(j.is_locked_at(at) && j.is_acquirable_at(at)));
                prop_assert_eq!(j.is_acquirable_at(at), !j.is_locked_at(at) && j.due_time <= at);
            }
        }
    }
}
