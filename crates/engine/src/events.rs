//! Event dispatch
//!
//! Listeners see an event only after the transaction that produced it
//! committed. A panicking listener is logged and skipped; it never affects
//! the command that raised the event or the other listeners.

use std::sync::Arc;

use kestrel_core::EngineEvent;
use kestrel_executor::CommitListener;
use parking_lot::RwLock;
use tracing::{error, trace};

/// Callback receiving engine events
pub type EventListener = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// Fan-out of committed engine events to registered listeners
#[derive(Default)]
pub struct EventDispatcher {
    listeners: RwLock<Vec<EventListener>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl EventDispatcher {
    /// Create a dispatcher without listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    pub fn add_listener(&self, listener: EventListener) {
        self.listeners.write().push(listener);
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver one event to every listener in registration order
    pub fn dispatch(&self, event: &EngineEvent) {
        let listeners = self.listeners.read().clone();
        trace!(target: "kestrel::events", event = event.name(), listeners = listeners.len(), "Dispatching");
        for listener in listeners {
            let delivered =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(event)));
            if delivered.is_err() {
                error!(target: "kestrel::events", event = event.name(), "Event listener panicked");
            }
        }
    }
}

impl CommitListener for EventDispatcher {
    fn on_commit(&self, events: &[EngineEvent], _jobs_added: usize) {
        for event in events {
            self.dispatch(event);
        }
    }
}
