//! Store error types

use kestrel_core::EngineError;
use thiserror::Error;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures raised by a [`Store`](crate::Store)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A revision condition in a write batch did not hold
    ///
    /// `expected == 0` means the row was expected to be absent;
    /// `actual == None` means the row was missing.
    #[error("Revision conflict on {table} '{id}': expected {expected}, found {actual:?}")]
    RevisionConflict {
        /// Table name
        table: &'static str,
        /// Row id
        id: String,
        /// Revision the writer expected
        expected: u64,
        /// Revision actually stored
        actual: Option<u64>,
    },

    /// The schema has not been created
    #[error("Schema not found; create it before use")]
    SchemaMissing,

    /// The schema already exists at another version
    #[error("Schema version mismatch: store has {found}, engine expects {expected}")]
    SchemaVersionMismatch {
        /// Version stored
        found: String,
        /// Version required
        expected: String,
    },
}

impl StoreError {
    /// True for revision conflicts
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::RevisionConflict { .. })
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::RevisionConflict {
                table,
                id,
                expected,
                actual,
            } => EngineError::optimistic_lock(
                format!("{} '{}'", table, id),
                format!("expected revision {}, found {:?}", expected, actual),
            ),
            other => EngineError::Storage(other.to_string()),
        }
    }
}
