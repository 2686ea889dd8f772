//! Transaction layer for Kestrel
//!
//! This crate implements the atomic-commit boundary every command runs in:
//! - TransactionContext: staged write batch plus ordered listeners
//! - TransactionManager: transaction ids and outcome counters
//! - CommitError: why a commit did not happen

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod transaction;

pub use manager::{TransactionManager, TransactionStats};
pub use transaction::{
    CommitError, PreCommitListener, TransactionContext, TransactionListener, TransactionStatus,
};
