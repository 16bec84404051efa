//! Connector traits
//!
//! Capability-based trait definitions. The synchronization engine only needs
//! searching and updating; a connector advertises each capability separately.

use async_trait::async_trait;

use crate::error::ConnectorResult;
use crate::operation::{AttributeDelta, ConnectorObject, Filter, PageRequest, SearchResult, Uid};

/// Base trait for all connectors.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Get the display name for this connector instance.
    fn display_name(&self) -> &str;

    /// Test the connection to the target system.
    async fn test_connection(&self) -> ConnectorResult<()>;

    /// Check if the connector is currently healthy.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// Capability for searching objects in the target system.
#[async_trait]
pub trait SearchOp: Connector {
    /// Search for objects in the target system.
    ///
    /// # Arguments
    /// * `object_class` - The type of objects to search for
    /// * `filter` - The search filter to apply
    /// * `attributes_to_get` - Optional list of attributes to retrieve
    /// * `page_request` - Optional pagination parameters
    ///
    /// # Returns
    /// Search results with matching objects and pagination info.
    async fn search(
        &self,
        object_class: &str,
        filter: Option<Filter>,
        attributes_to_get: Option<Vec<String>>,
        page_request: Option<PageRequest>,
    ) -> ConnectorResult<SearchResult>;

    /// Get a single object by its UID.
    async fn get(&self, object_class: &str, uid: &Uid) -> ConnectorResult<Option<ConnectorObject>> {
        let filter = Filter::Equals {
            attribute: uid.attribute_name().to_string(),
            value: uid.value().to_string(),
        };

        let result = self.search(object_class, Some(filter), None, None).await?;

        Ok(result.objects.into_iter().find(|o| o.uid == *uid))
    }
}

/// Capability for updating objects in the target system.
#[async_trait]
pub trait UpdateOp: Connector {
    /// Update an existing object in the target system.
    ///
    /// Returns the UID of the updated object (may change for some systems).
    async fn update(
        &self,
        object_class: &str,
        uid: &Uid,
        changes: AttributeDelta,
    ) -> ConnectorResult<Uid>;
}
