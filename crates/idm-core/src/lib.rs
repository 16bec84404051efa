//! IdM Core Library
//!
//! Shared identifiers and error types used by the connector abstraction and
//! the synchronization engine.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed identifiers (SystemId, SyncConfigId, SyncLogId)
//! - [`error`] - Collaborator error type (IdmError)
//!
//! # Example
//!
//! ```
//! use idm_core::{IdmError, IdmResult, SystemId};
//!
//! let system_id = SystemId::new();
//!
//! fn load(id: SystemId) -> IdmResult<String> {
//!     Err(IdmError::not_found("System", id.to_string()))
//! }
//!
//! assert!(load(system_id).is_err());
//! ```

pub mod error;
pub mod ids;

pub use error::{IdmError, IdmResult};
pub use ids::{ParseIdError, SyncConfigId, SyncLogId, SystemId};
