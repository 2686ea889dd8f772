//! Process-wide registry of built engines
//!
//! An engine registers under its name while the registry lock is held for the
//! whole build, and unregisters on close. A name is therefore bound to at
//! most one live engine, and becomes free again once that engine closes.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::ProcessEngine;

/// Name of the engine built without an explicit name
pub const DEFAULT_ENGINE_NAME: &str = "default";

/// Built, not yet closed engines by name
pub(crate) static ENGINES: Lazy<Mutex<HashMap<String, Arc<ProcessEngine>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Engine registered under `name`
pub fn get_engine(name: &str) -> Option<Arc<ProcessEngine>> {
    ENGINES.lock().get(name).cloned()
}

/// Engine registered as `"default"`
pub fn get_default_engine() -> Option<Arc<ProcessEngine>> {
    get_engine(DEFAULT_ENGINE_NAME)
}

/// Names of every registered engine, sorted
pub fn engine_names() -> Vec<String> {
    let mut names: Vec<String> = ENGINES.lock().keys().cloned().collect();
    names.sort();
    names
}

/// Every registered engine
pub fn engines() -> Vec<Arc<ProcessEngine>> {
    ENGINES.lock().values().cloned().collect()
}

/// Close every registered engine.
///
/// Errors are logged; every engine is unregistered regardless.
pub fn close_all() {
    for engine in engines() {
        if let Err(e) = engine.close() {
            tracing::warn!(target: "kestrel::engine", engine = engine.name(), error = %e, "Engine close failed");
        }
    }
}

/// Remove `engine` if it is the one registered under its name
pub(crate) fn unregister(engine: &ProcessEngine) -> bool {
    let mut registry = ENGINES.lock();
    let registered = registry
        .get(engine.name())
        .map_or(false, |e| std::ptr::eq(Arc::as_ptr(e), engine));
    if registered {
        registry.remove(engine.name());
    }
    registered
}
