//! Storage layer for Kestrel
//!
//! This crate defines the shared-store seam the engine persists through:
//! - Store: trait every backend implements (schema, reads, atomic batches)
//! - WriteBatch / WriteOp: ordered mutations with revision conditions
//! - MemoryStore: `RwLock`-guarded in-process backend
//! - StoreError: conflicts and schema failures, translated into `EngineError`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod error;
pub mod memory;
pub mod store;

pub use batch::{WriteBatch, WriteOp};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use store::{Store, SCHEMA_VERSION};
