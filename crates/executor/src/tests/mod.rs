//! Test modules for the executor crate.

mod atomicity;
mod pipeline;

use std::sync::Arc;

use kestrel_core::ManualClock;
use kestrel_storage::{MemoryStore, Store};

use crate::{CommandExecutor, CommandExecutorBuilder};

/// Executor over a fresh in-memory store with a manual clock.
fn create_test_executor() -> (CommandExecutor, Arc<dyn Store>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::with_schema());
    let executor = builder(&store).build();
    (executor, store)
}

fn builder(store: &Arc<dyn Store>) -> CommandExecutorBuilder {
    CommandExecutor::builder(Arc::clone(store))
        .clock(Arc::new(ManualClock::default()))
        .command_retry(crate::RetryConfig::new().with_base_delay_ms(0).with_max_delay_ms(0))
}
