//! Error types for the engine
//!
//! Every failure a caller can observe is an [`EngineError`]. Lower layers
//! (store, transaction) have their own error enums and translate into this
//! one at the transaction boundary, so callers never see raw store errors.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Stable, caller-visible error kinds
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Schema or executability validation failed; nothing was persisted
    #[error("Validation error: {message}")]
    Validation {
        /// What failed
        message: String,
    },

    /// A revision check failed (job lock, version sequence, entity update)
    #[error("Optimistic lock conflict on {entity}: {reason}")]
    OptimisticLock {
        /// Entity kind and id that conflicted
        entity: String,
        /// Expected vs actual revision, or similar detail
        reason: String,
    },

    /// A command asked for a session nobody registered a factory for
    #[error("Unsupported session capability: {capability}")]
    UnsupportedCapability {
        /// Capability name
        capability: String,
    },

    /// A job handler failed
    #[error("Job {job_id} failed: {message}")]
    JobExecution {
        /// Job that failed
        job_id: String,
        /// Handler failure message
        message: String,
    },

    /// Engine built twice under one name, or used after close
    #[error("Engine lifecycle error: {0}")]
    EngineLifecycle(String),

    /// Entity lookup failed
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind
        entity: String,
        /// Requested id
        id: String,
    },

    /// Payload or model (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Store-level failure that is not a conflict
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invariant violation inside the engine
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Build a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation {
            message: message.into(),
        }
    }

    /// Build an optimistic-lock error
    pub fn optimistic_lock(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::OptimisticLock {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    /// Build a not-found error
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Build a job execution error
    pub fn job_execution(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::JobExecution {
            job_id: job_id.into(),
            message: message.into(),
        }
    }

    /// Build an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        EngineError::Internal(message.into())
    }

    /// True when the failure is a revision conflict worth retrying
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::OptimisticLock { .. })
    }

    /// Stable error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::Validation { .. } => "VALIDATION_ERROR",
            EngineError::OptimisticLock { .. } => "OPTIMISTIC_LOCK",
            EngineError::UnsupportedCapability { .. } => "UNSUPPORTED_CAPABILITY",
            EngineError::JobExecution { .. } => "JOB_EXECUTION_ERROR",
            EngineError::EngineLifecycle(_) => "ENGINE_LIFECYCLE_ERROR",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::Serialization(_) => "SERIALIZATION_ERROR",
            EngineError::Storage(_) => "STORAGE_ERROR",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_validation() {
        let err = EngineError::validation("resource name is empty");
        let msg = err.to_string();
        assert!(msg.contains("Validation error"));
        assert!(msg.contains("resource name is empty"));
    }

    #[test]
    fn test_error_display_optimistic_lock() {
        let err = EngineError::optimistic_lock("job 42", "expected revision 3, found 4");
        let msg = err.to_string();
        assert!(msg.contains("Optimistic lock"));
        assert!(msg.contains("job 42"));
        assert!(msg.contains("expected revision 3"));
    }

    #[test]
    fn test_only_optimistic_lock_is_conflict() {
        assert!(EngineError::optimistic_lock("x", "y").is_conflict());
        assert!(!EngineError::validation("x").is_conflict());
        assert!(!EngineError::Storage("x".into()).is_conflict());
        assert!(!EngineError::job_execution("j", "boom").is_conflict());
    }

    #[test]
    fn test_error_codes() {
        let cases = vec![
            (EngineError::validation("x"), "VALIDATION_ERROR"),
            (EngineError::optimistic_lock("x", "y"), "OPTIMISTIC_LOCK"),
            (
                EngineError::UnsupportedCapability {
                    capability: "jobs".into(),
                },
                "UNSUPPORTED_CAPABILITY",
            ),
            (EngineError::job_execution("j", "m"), "JOB_EXECUTION_ERROR"),
            (
                EngineError::EngineLifecycle("closed".into()),
                "ENGINE_LIFECYCLE_ERROR",
            ),
            (EngineError::not_found("Job", "1"), "NOT_FOUND"),
            (EngineError::Serialization("x".into()), "SERIALIZATION_ERROR"),
            (EngineError::Storage("x".into()), "STORAGE_ERROR"),
            (EngineError::internal("x"), "INTERNAL_ERROR"),
        ];

        for (error, expected) in cases {
            assert_eq!(error.error_code(), expected, "code for {:?}", error);
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_from_serde_json() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: EngineError = parse.unwrap_err().into();
        assert!(matches!(err, EngineError::Serialization(_)));
    }

    #[test]
    fn test_error_pattern_matching() {
        let err = EngineError::not_found("Deployment", "d-1");
        match err {
            EngineError::NotFound { entity, id } => {
                assert_eq!(entity, "Deployment");
                assert_eq!(id, "d-1");
            }
            _ => panic!("Wrong error variant"),
        }
    }
}
