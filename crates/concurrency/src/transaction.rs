//! Transaction context
//!
//! A [`TransactionContext`] wraps the atomic-commit boundary of one command
//! invocation. While the command runs, sessions and staged jobs accumulate
//! mutations in the context's [`WriteBatch`]; nothing touches the store until
//! [`TransactionContext::commit`].
//!
//! ## Commit sequence
//!
//! ```text
//! 1. Active -> Committing
//! 2. Run pre-commit listeners in registration order (may add ops)
//! 3. store.apply(batch)               all revision checks, then all writes
//! 4. Committing -> Committed
//! 5. Run post-commit listeners in registration order
//! ```
//!
//! A failure in step 2 or 3 rolls the transaction back instead: the batch is
//! discarded, rollback listeners run, and post-commit listeners are dropped
//! without running. Post-commit listeners therefore never observe an
//! uncommitted write.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kestrel_core::{EngineError, Result};
use kestrel_storage::{Store, StoreError, WriteBatch, WriteOp};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Listener run before the batch is applied; may stage more operations
pub type PreCommitListener = Box<dyn FnOnce(&mut WriteBatch) -> Result<()>>;

/// Listener run after commit or after rollback
pub type TransactionListener = Box<dyn FnOnce()>;

/// Error type for commit failures
#[derive(Debug, Clone, Error)]
pub enum CommitError {
    /// Transaction was not in correct state for commit
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A pre-commit listener refused the commit
    #[error("Pre-commit listener failed: {0}")]
    PreCommitFailed(EngineError),

    /// The store rejected the batch
    #[error("Store rejected batch: {0}")]
    Store(StoreError),
}

impl CommitError {
    /// True when the store rejected the batch on a revision check
    pub fn is_conflict(&self) -> bool {
        match self {
            CommitError::Store(e) => e.is_conflict(),
            CommitError::PreCommitFailed(e) => e.is_conflict(),
            CommitError::InvalidState(_) => false,
        }
    }
}

impl From<CommitError> for EngineError {
    fn from(e: CommitError) -> Self {
        match e {
            CommitError::InvalidState(msg) => {
                EngineError::internal(format!("transaction not committable: {}", msg))
            }
            CommitError::PreCommitFailed(inner) => inner,
            CommitError::Store(inner) => inner.into(),
        }
    }
}

/// Status of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Transaction is open and accepting operations
    Active,
    /// Pre-commit listeners are running or the batch is being applied
    Committing,
    /// Batch applied
    Committed,
    /// Batch discarded
    RolledBack {
        /// Human-readable reason for rollback
        reason: String,
    },
}

/// Unit of atomic work against a [`Store`]
pub struct TransactionContext {
    /// Unique transaction ID
    pub txn_id: u64,
    store: Arc<dyn Store>,
    batch: WriteBatch,
    status: TransactionStatus,
    pre_commit: Vec<PreCommitListener>,
    post_commit: Vec<TransactionListener>,
    rollback: Vec<TransactionListener>,
    start_time: Instant,
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("txn_id", &self.txn_id)
            .field("status", &self.status)
            .field("pending_ops", &self.batch.len())
            .field("pre_commit", &self.pre_commit.len())
            .field("post_commit", &self.post_commit.len())
            .field("rollback", &self.rollback.len())
            .finish()
    }
}

impl TransactionContext {
    /// Open a transaction against `store`
    pub fn new(txn_id: u64, store: Arc<dyn Store>) -> Self {
        TransactionContext {
            txn_id,
            store,
            batch: WriteBatch::new(),
            status: TransactionStatus::Active,
            pre_commit: Vec::new(),
            post_commit: Vec::new(),
            rollback: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Store this transaction commits to (reads go straight through)
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Current status
    pub fn status(&self) -> &TransactionStatus {
        &self.status
    }

    /// Check if transaction is active
    pub fn is_active(&self) -> bool {
        matches!(self.status, TransactionStatus::Active)
    }

    /// Check if transaction committed
    pub fn is_committed(&self) -> bool {
        matches!(self.status, TransactionStatus::Committed)
    }

    /// Check if transaction rolled back
    pub fn is_rolled_back(&self) -> bool {
        matches!(self.status, TransactionStatus::RolledBack { .. })
    }

    /// Reason given for rollback, if any
    pub fn rollback_reason(&self) -> Option<&str> {
        match &self.status {
            TransactionStatus::RolledBack { reason } => Some(reason),
            _ => None,
        }
    }

    /// Time since the transaction was opened
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Ensure transaction is active before staging anything
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(EngineError::internal(format!(
                "Transaction {} is not active: {:?}",
                self.txn_id, self.status
            )))
        }
    }

    // === Staging ===

    /// Stage one operation
    pub fn stage(&mut self, op: WriteOp) -> Result<()> {
        self.ensure_active()?;
        self.batch.push(op);
        Ok(())
    }

    /// Mutable access to the staged batch
    pub fn batch_mut(&mut self) -> Result<&mut WriteBatch> {
        self.ensure_active()?;
        Ok(&mut self.batch)
    }

    /// Number of staged operations
    pub fn pending_operations(&self) -> usize {
        self.batch.len()
    }

    // === Listeners ===

    /// Register a listener that runs before the batch is applied
    pub fn on_pre_commit(&mut self, listener: impl FnOnce(&mut WriteBatch) -> Result<()> + 'static) {
        self.pre_commit.push(Box::new(listener));
    }

    /// Register a listener that runs once the batch is durable
    pub fn on_post_commit(&mut self, listener: impl FnOnce() + 'static) {
        self.post_commit.push(Box::new(listener));
    }

    /// Register a listener that runs if the transaction rolls back
    pub fn on_rollback(&mut self, listener: impl FnOnce() + 'static) {
        self.rollback.push(Box::new(listener));
    }

    // === Completion ===

    /// Commit the transaction
    ///
    /// # Errors
    /// - `CommitError::InvalidState` if not `Active`
    /// - `CommitError::PreCommitFailed` if a pre-commit listener failed
    /// - `CommitError::Store` if the store rejected the batch
    ///
    /// On any error the transaction is rolled back before returning.
    pub fn commit(&mut self) -> std::result::Result<(), CommitError> {
        if !self.is_active() {
            return Err(CommitError::InvalidState(format!(
                "Cannot commit transaction {} from {:?} state - must be Active",
                self.txn_id, self.status
            )));
        }
        self.status = TransactionStatus::Committing;

        for listener in std::mem::take(&mut self.pre_commit) {
            if let Err(e) = listener(&mut self.batch) {
                self.finish_rollback(format!("pre-commit listener failed: {}", e));
                return Err(CommitError::PreCommitFailed(e));
            }
        }

        let batch = std::mem::take(&mut self.batch);
        let ops = batch.len();
        if let Err(e) = self.store.apply(batch) {
            if e.is_conflict() {
                debug!(target: "kestrel::txn", txn_id = self.txn_id, error = %e, "Commit lost revision race");
            } else {
                warn!(target: "kestrel::txn", txn_id = self.txn_id, error = %e, "Commit failed");
            }
            self.finish_rollback(e.to_string());
            return Err(CommitError::Store(e));
        }

        self.status = TransactionStatus::Committed;
        self.rollback.clear();
        trace!(
            target: "kestrel::txn",
            txn_id = self.txn_id,
            ops,
            elapsed_us = self.start_time.elapsed().as_micros() as u64,
            "Committed"
        );

        for listener in std::mem::take(&mut self.post_commit) {
            listener();
        }
        Ok(())
    }

    /// Roll the transaction back
    ///
    /// Discards every staged operation and runs rollback listeners.
    /// Rolling back a committed transaction is an error; rolling back twice
    /// is a no-op.
    pub fn rollback(&mut self, reason: impl Into<String>) -> Result<()> {
        match &self.status {
            TransactionStatus::Committed => Err(EngineError::internal(format!(
                "Cannot roll back committed transaction {}",
                self.txn_id
            ))),
            TransactionStatus::RolledBack { .. } => Ok(()),
            _ => {
                self.finish_rollback(reason.into());
                Ok(())
            }
        }
    }

    fn finish_rollback(&mut self, reason: String) {
        trace!(target: "kestrel::txn", txn_id = self.txn_id, %reason, "Rolling back");
        self.batch.clear();
        self.pre_commit.clear();
        self.post_commit.clear();
        self.status = TransactionStatus::RolledBack { reason };
        for listener in std::mem::take(&mut self.rollback) {
            listener();
        }
    }
}
