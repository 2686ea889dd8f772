//! Sessions and the session registry
//!
//! A [`Session`] is a capability-scoped unit-of-work handle. It stages writes
//! while a command runs and hands them to the transaction in
//! [`Session::flush`]; if the command fails the session is discarded and its
//! staged writes never reach the store.
//!
//! The [`SessionRegistry`] maps each [`Capability`] to a factory. Registration
//! order is flush order, so cross-entity write ordering is predictable.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use kestrel_core::Result;
use kestrel_storage::{Store, WriteBatch};

/// Storage capability a session provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    /// Deployments and their resources
    Deployments,
    /// Process definitions and version sequences
    ProcessDefinitions,
    /// Job rows
    Jobs,
    /// Application-defined capability
    Custom(&'static str),
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Deployments => f.write_str("deployments"),
            Capability::ProcessDefinitions => f.write_str("process-definitions"),
            Capability::Jobs => f.write_str("jobs"),
            Capability::Custom(name) => f.write_str(name),
        }
    }
}

/// Per-command unit-of-work handle
pub trait Session: Any {
    /// Move staged writes into the transaction batch
    fn flush(&mut self, batch: &mut WriteBatch) -> Result<()>;

    /// Drop staged writes without applying them
    fn discard(&mut self) {}

    /// Downcast support
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Creates a session bound to one command's store
pub type SessionFactory = Arc<dyn Fn(&Arc<dyn Store>) -> Box<dyn Session> + Send + Sync>;

/// Capability to factory mapping
#[derive(Clone, Default)]
pub struct SessionRegistry {
    factories: Vec<(Capability, SessionFactory)>,
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.factories.iter().map(|(c, _)| c))
            .finish()
    }
}

impl SessionRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in entity sessions, in flush order
    /// deployments, process definitions, jobs
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        crate::sessions::register_defaults(&mut registry);
        registry
    }

    /// Register a factory
    ///
    /// Re-registering a capability replaces its factory but keeps its
    /// original flush position.
    pub fn register<F>(&mut self, capability: Capability, factory: F)
    where
        F: Fn(&Arc<dyn Store>) -> Box<dyn Session> + Send + Sync + 'static,
    {
        let factory: SessionFactory = Arc::new(factory);
        match self.factories.iter_mut().find(|(c, _)| *c == capability) {
            Some(slot) => slot.1 = factory,
            None => self.factories.push((capability, factory)),
        }
    }

    /// Flush position and factory for a capability
    pub fn lookup(&self, capability: Capability) -> Option<(usize, &SessionFactory)> {
        self.factories
            .iter()
            .enumerate()
            .find(|(_, (c, _))| *c == capability)
            .map(|(i, (_, f))| (i, f))
    }

    /// True when a factory exists for `capability`
    pub fn supports(&self, capability: Capability) -> bool {
        self.lookup(capability).is_some()
    }

    /// Registered capabilities in flush order
    pub fn capabilities(&self) -> Vec<Capability> {
        self.factories.iter().map(|(c, _)| *c).collect()
    }
}
