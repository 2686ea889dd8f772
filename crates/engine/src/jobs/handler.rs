//! Job handlers
//!
//! A handler runs inside the command context of the job's execution
//! transaction: everything it stages commits together with the job's
//! deletion, or not at all.

use std::collections::HashMap;
use std::sync::Arc;

use kestrel_core::{Job, Result};
use kestrel_executor::CommandContext;

/// Executes jobs of one handler type
pub trait JobHandler: Send + Sync {
    /// Handler type this handler serves
    fn handler_type(&self) -> &str;

    /// Run the job. An error rolls the execution back and counts as a failed
    /// attempt.
    fn execute(&self, job: &Job, ctx: &mut CommandContext) -> Result<()>;
}

struct FnHandler<F> {
    handler_type: String,
    f: F,
}

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(&Job, &mut CommandContext) -> Result<()> + Send + Sync,
{
    fn handler_type(&self) -> &str {
        &self.handler_type
    }

    fn execute(&self, job: &Job, ctx: &mut CommandContext) -> Result<()> {
        (self.f)(job, ctx)
    }
}

/// Handlers by type
#[derive(Clone, Default)]
pub struct JobHandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl std::fmt::Debug for JobHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.handler_types()).finish()
    }
}

impl JobHandlerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any handler of the same type
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers
            .insert(handler.handler_type().to_string(), handler);
    }

    /// Register a closure as the handler for `handler_type`
    pub fn register_fn<F>(&mut self, handler_type: impl Into<String>, f: F)
    where
        F: Fn(&Job, &mut CommandContext) -> Result<()> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnHandler {
            handler_type: handler_type.into(),
            f,
        }));
    }

    /// Handler for a type
    pub fn get(&self, handler_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(handler_type).cloned()
    }

    /// Registered types, sorted
    pub fn handler_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}
