//! In-memory connector
//!
//! A table-backed connector holding objects per object class. Used by tests
//! and by embedders that feed the engine from an already loaded data set.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ConnectorError, ConnectorResult};
use crate::operation::{
    AttributeDelta, AttributeSet, ConnectorObject, Filter, PageRequest, SearchResult, Uid,
};
use crate::traits::{Connector, SearchOp, UpdateOp};

type Table = BTreeMap<String, (Uid, AttributeSet)>;

/// Connector backed by in-memory tables, ordered by UID value.
#[derive(Debug, Default)]
pub struct InMemoryConnector {
    name: String,
    tables: RwLock<HashMap<String, Table>>,
}

impl InMemoryConnector {
    /// Create an empty connector.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace an object.
    pub fn put(&self, object_class: &str, uid: Uid, attributes: AttributeSet) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables
            .entry(object_class.to_string())
            .or_default()
            .insert(uid.value().to_string(), (uid, attributes));
    }

    /// Remove an object, returning its attributes.
    pub fn remove(&self, object_class: &str, uid: &Uid) -> Option<AttributeSet> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables
            .get_mut(object_class)
            .and_then(|t| t.remove(uid.value()))
            .map(|(_, attrs)| attrs)
    }

    /// Read an object's attributes.
    pub fn attributes(&self, object_class: &str, uid: &Uid) -> Option<AttributeSet> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables
            .get(object_class)
            .and_then(|t| t.get(uid.value()))
            .map(|(_, attrs)| attrs.clone())
    }

    /// Number of objects of the given class.
    pub fn len(&self, object_class: &str) -> usize {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.get(object_class).map_or(0, BTreeMap::len)
    }

    /// Check whether the given class has no objects.
    pub fn is_empty(&self, object_class: &str) -> bool {
        self.len(object_class) == 0
    }
}

/// The UID is matched as a regular attribute under its own attribute name.
fn searchable(uid: &Uid, attributes: &AttributeSet) -> AttributeSet {
    let mut attrs = attributes.clone();
    if !attrs.has(uid.attribute_name()) {
        attrs.set(uid.attribute_name(), uid.value());
    }
    attrs
}

#[async_trait]
impl Connector for InMemoryConnector {
    fn display_name(&self) -> &str {
        &self.name
    }

    async fn test_connection(&self) -> ConnectorResult<()> {
        Ok(())
    }
}

#[async_trait]
impl SearchOp for InMemoryConnector {
    async fn search(
        &self,
        object_class: &str,
        filter: Option<Filter>,
        attributes_to_get: Option<Vec<String>>,
        page_request: Option<PageRequest>,
    ) -> ConnectorResult<SearchResult> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let Some(table) = tables.get(object_class) else {
            return Ok(SearchResult::empty());
        };

        let page = page_request.unwrap_or_else(|| PageRequest::new(u32::MAX));
        let offset = match page.cursor.as_deref() {
            Some(cursor) => cursor.parse::<usize>().map_err(|_| {
                ConnectorError::invalid_data(format!("invalid page cursor '{cursor}'"))
            })?,
            None => 0,
        };
        let page_size = page.page_size.max(1) as usize;

        let matching: Vec<&(Uid, AttributeSet)> = table
            .values()
            .filter(|(uid, attrs)| {
                filter
                    .as_ref()
                    .map_or(true, |f| f.matches(&searchable(uid, attrs)))
            })
            .collect();

        let objects: Vec<ConnectorObject> = matching
            .iter()
            .skip(offset)
            .take(page_size)
            .map(|(uid, attrs)| {
                let attributes = match &attributes_to_get {
                    Some(names) => attrs
                        .iter()
                        .filter(|(name, _)| names.iter().any(|n| n == *name))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                    None => attrs.clone(),
                };
                ConnectorObject::new(uid.clone(), object_class, attributes)
            })
            .collect();

        let next = offset + objects.len();
        debug!(
            connector = %self.name,
            object_class = %object_class,
            offset,
            returned = objects.len(),
            total = matching.len(),
            "In-memory search"
        );

        let result = SearchResult::new(objects);
        if next < matching.len() {
            Ok(result.with_next_cursor(next.to_string()))
        } else {
            Ok(result)
        }
    }
}

#[async_trait]
impl UpdateOp for InMemoryConnector {
    async fn update(
        &self,
        object_class: &str,
        uid: &Uid,
        changes: AttributeDelta,
    ) -> ConnectorResult<Uid> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let (_, attrs) = tables
            .get_mut(object_class)
            .and_then(|t| t.get_mut(uid.value()))
            .ok_or_else(|| ConnectorError::object_not_found(uid.to_string()))?;
        attrs.apply(&changes);
        Ok(uid.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector_with_rows(count: usize) -> InMemoryConnector {
        let connector = InMemoryConnector::new("test");
        for i in 1..=count {
            connector.put(
                "account",
                Uid::from_value(i.to_string()),
                AttributeSet::new().with("name", format!("row-{i}")),
            );
        }
        connector
    }

    #[tokio::test]
    async fn test_search_pages_through_all_objects() {
        let connector = connector_with_rows(5);

        let first = connector
            .search("account", None, None, Some(PageRequest::new(2)))
            .await
            .unwrap();
        assert_eq!(first.count(), 2);
        assert!(first.has_more);

        let cursor = first.next_cursor.clone().unwrap();
        let second = connector
            .search(
                "account",
                None,
                None,
                Some(PageRequest::new(10).with_cursor(cursor)),
            )
            .await
            .unwrap();
        assert_eq!(second.count(), 3);
        assert!(!second.has_more);
    }

    #[tokio::test]
    async fn test_search_filters_by_uid_attribute() {
        let connector = connector_with_rows(3);
        let found = connector
            .get("account", &Uid::from_value("2"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.attributes.get_string("name"), Some("row-2"));

        let missing = connector.get("account", &Uid::from_value("9")).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_search_unknown_class_is_empty() {
        let connector = connector_with_rows(1);
        let result = connector.search("group", None, None, None).await.unwrap();
        assert_eq!(result.count(), 0);
    }

    #[tokio::test]
    async fn test_update_applies_delta() {
        let connector = connector_with_rows(1);
        let uid = Uid::from_value("1");
        let mut delta = AttributeDelta::new();
        delta.replace("name", "renamed");

        connector.update("account", &uid, delta).await.unwrap();
        assert_eq!(
            connector
                .attributes("account", &uid)
                .unwrap()
                .get_string("name"),
            Some("renamed")
        );

        let err = connector
            .update("account", &Uid::from_value("7"), AttributeDelta::new())
            .await
            .unwrap_err();
        assert!(err.is_permanent());
    }
}
