//! Transaction manager
//!
//! Hands out transaction ids and keeps commit/rollback counters for one
//! engine. Several managers may point at the same store; they never
//! coordinate with each other, the store's revision checks do.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use kestrel_storage::Store;

use crate::TransactionContext;

/// Opens transactions against one store
pub struct TransactionManager {
    store: Arc<dyn Store>,
    next_txn_id: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

/// Commit/rollback counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionStats {
    /// Transactions opened
    pub started: u64,
    /// Transactions committed
    pub committed: u64,
    /// Transactions rolled back
    pub rolled_back: u64,
}

impl TransactionManager {
    /// Create a manager for `store`
    pub fn new(store: Arc<dyn Store>) -> Self {
        TransactionManager {
            store,
            next_txn_id: AtomicU64::new(1),
            committed: AtomicU64::new(0),
            rolled_back: AtomicU64::new(0),
        }
    }

    /// The store transactions commit to
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Allocate next transaction ID
    pub fn next_txn_id(&self) -> u64 {
        self.next_txn_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Open a new transaction
    pub fn begin(&self) -> TransactionContext {
        TransactionContext::new(self.next_txn_id(), Arc::clone(&self.store))
    }

    /// Record the outcome of a finished transaction
    pub fn record(&self, txn: &TransactionContext) {
        if txn.is_committed() {
            self.committed.fetch_add(1, Ordering::Relaxed);
        } else if txn.is_rolled_back() {
            self.rolled_back.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> TransactionStats {
        TransactionStats {
            started: self.next_txn_id.load(Ordering::SeqCst) - 1,
            committed: self.committed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("stats", &self.stats())
            .finish()
    }
}
