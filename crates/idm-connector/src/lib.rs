//! # Connector Abstraction
//!
//! Read side (and the minimal write side used for account updates) of the
//! connection between the IdM platform and external systems.
//!
//! A connector exposes the accounts of an external system as
//! [`ConnectorObject`]s, each keyed by a unique identifier ([`Uid`]) and
//! carrying an [`AttributeSet`]. The synchronization engine pages through
//! them with [`SearchOp::search`] and, for account pushes, calls
//! [`UpdateOp::update`].
//!
//! ## Example
//!
//! ```
//! use idm_connector::prelude::*;
//!
//! let connector = InMemoryConnector::new("hr-table");
//! connector.put(
//!     "contract",
//!     Uid::from_value("1"),
//!     AttributeSet::new().with("name", "Developer"),
//! );
//! assert_eq!(connector.len("contract"), 1);
//! ```

pub mod error;
pub mod memory;
pub mod operation;
pub mod traits;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{ConnectorError, ConnectorResult};
    pub use crate::memory::InMemoryConnector;
    pub use crate::operation::{
        AttributeDelta, AttributeSet, AttributeValue, ConnectorObject, Filter, PageRequest,
        SearchResult, Uid,
    };
    pub use crate::traits::{Connector, SearchOp, UpdateOp};
}

// Re-export async_trait for connector implementors
pub use async_trait::async_trait;

pub use error::{ConnectorError, ConnectorResult};
pub use memory::InMemoryConnector;
pub use operation::{
    AttributeDelta, AttributeSet, AttributeValue, ConnectorObject, Filter, PageRequest,
    SearchResult, Uid,
};
pub use traits::{Connector, SearchOp, UpdateOp};
