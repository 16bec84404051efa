//! Error Types
//!
//! Errors reported by the collaborators of the synchronization engine:
//! persistence, form (EAV) storage, configuration and workflow services.
//!
//! # Example
//!
//! ```
//! use idm_core::{IdmError, IdmResult};
//!
//! fn find_identity(username: &str) -> IdmResult<String> {
//!     if username.is_empty() {
//!         return Err(IdmError::validation("username", "must not be empty"));
//!     }
//!     Ok(username.to_string())
//! }
//!
//! assert!(find_identity("").is_err());
//! ```

use serde::Serialize;
use thiserror::Error;

/// Error raised by a collaborator service.
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdmError {
    /// Requested record does not exist.
    #[error("{resource} not found{}", id.as_ref().map(|i| format!(": {i}")).unwrap_or_default())]
    NotFound {
        /// Kind of record (e.g. "Identity", "Account").
        resource: String,
        /// Optional identifier of the record.
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// A uniqueness or referential constraint was violated on save.
    #[error("Constraint violation: {message}")]
    ConstraintViolation {
        /// Description of the violated constraint.
        message: String,
    },

    /// Input validation failure.
    #[error("Validation error on field '{field}': {message}")]
    Validation {
        /// The field that failed validation.
        field: String,
        /// Description of the validation failure.
        message: String,
    },

    /// The backing store failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// A remote collaborator (workflow engine, task scheduler) is unavailable.
    #[error("Service unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },
}

impl IdmError {
    /// Create a not-found error.
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    /// Create a constraint violation error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Check if this error is a missing record.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, IdmError::NotFound { .. })
    }

    /// Check if retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, IdmError::Storage { .. } | IdmError::Unavailable { .. })
    }
}

/// Result type for collaborator calls.
pub type IdmResult<T> = std::result::Result<T, IdmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = IdmError::not_found("Identity", "john");
        assert_eq!(err.to_string(), "Identity not found: john");

        let err = IdmError::NotFound {
            resource: "Account".to_string(),
            id: None,
        };
        assert_eq!(err.to_string(), "Account not found");
    }

    #[test]
    fn test_classification() {
        assert!(IdmError::not_found("Role", "x").is_not_found());
        assert!(IdmError::storage("connection reset").is_transient());
        assert!(!IdmError::constraint("duplicate code").is_transient());
    }

    #[test]
    fn test_serialize_tagged() {
        let err = IdmError::validation("username", "empty");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "validation");
        assert_eq!(json["field"], "username");
    }
}
