//! Sync error types.

use idm_connector::ConnectorError;
use idm_core::{IdmError, SyncConfigId};
use thiserror::Error;

use crate::script::ScriptError;

/// Errors that can occur during synchronization.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Persistence or collaborator service error.
    #[error("Store error: {0}")]
    Store(#[from] IdmError),

    /// Connector error.
    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    /// Database error (sync log store).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Configuration error. Fails the whole run.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Another run of the same configuration holds the running flag.
    #[error("Synchronization {config_id} is already running")]
    AlreadyRunning { config_id: SyncConfigId },

    /// More than one local entity matched the correlation attribute.
    #[error("Correlation of '{uid}' is ambiguous: {count} entities match")]
    AmbiguousCorrelation { uid: String, count: usize },

    /// Mapping error.
    #[error("Mapping error: attribute '{attribute}' - {message}")]
    Mapping { attribute: String, message: String },

    /// Transformation or filter script failure.
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    /// A referenced entity (owner, leader, tree node, parent) does not exist.
    #[error("Unresolved {reference} '{value}'")]
    Unresolved { reference: String, value: String },

    /// Not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SyncError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a mapping error.
    pub fn mapping(attribute: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Mapping {
            attribute: attribute.into(),
            message: message.into(),
        }
    }

    /// Create an unresolved reference error.
    pub fn unresolved(reference: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Unresolved {
            reference: reference.into(),
            value: value.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this error rejects the configuration as a whole.
    pub fn is_configuration(&self) -> bool {
        matches!(self, SyncError::Configuration { .. })
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Database(_) => true,
            SyncError::Connector(e) => e.is_transient(),
            SyncError::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::mapping("leader", "expected a string");
        assert!(err.to_string().contains("leader"));
        assert!(err.to_string().contains("expected a string"));

        let err = SyncError::unresolved("leader", "ghost");
        assert_eq!(err.to_string(), "Unresolved leader 'ghost'");

        let err = SyncError::AmbiguousCorrelation {
            uid: "42".to_string(),
            count: 2,
        };
        assert!(err.to_string().contains("2 entities"));
    }

    #[test]
    fn test_is_retryable() {
        assert!(SyncError::from(ConnectorError::connection_failed("timeout")).is_retryable());
        assert!(SyncError::from(IdmError::unavailable("db down")).is_retryable());
        assert!(!SyncError::configuration("no uid mapping").is_retryable());
        assert!(!SyncError::unresolved("owner", "x").is_retryable());
    }

    #[test]
    fn test_is_configuration() {
        assert!(SyncError::configuration("invalid").is_configuration());
        assert!(!SyncError::internal("boom").is_configuration());
    }
}
