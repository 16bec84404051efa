//! Persistence abstraction consumed by the engine.
//!
//! Every persisted record type gets a [`Repository`] with plain CRUD
//! semantics and a typed filter. [`IdmStore`] bundles the repositories and
//! owns the cascade rules between entities, accounts and their joins.

mod idm;
mod memory;

use async_trait::async_trait;
use idm_core::IdmResult;
use serde_json::Value;
use std::fmt::Debug;
use uuid::Uuid;

use crate::types::{EntityField, EntityKind};
use crate::value::values_equal;

pub use idm::IdmStore;
pub use memory::InMemoryRepository;

/// A persisted record with a typed filter.
pub trait Record: Clone + Debug + Send + Sync + 'static {
    /// Filter accepted by [`Repository::find`]. `Default` matches everything.
    type Filter: Default + Debug + Send + Sync;

    /// Record name used in errors and logs.
    const NAME: &'static str;

    fn id(&self) -> Uuid;

    /// Whether the record satisfies the filter.
    fn matches(&self, filter: &Self::Filter) -> bool;
}

/// A local entity the engine synchronizes.
pub trait SyncEntity: Record + PartialEq {
    const KIND: EntityKind;

    /// Persisted value of a field in its canonical JSON form.
    fn field(&self, field: EntityField) -> Value;

    /// Human readable name for item logs.
    fn display_name(&self) -> String;

    /// Filter selecting entities whose field matches.
    fn filter_by(field: FieldMatch) -> Self::Filter;
}

/// Equality predicate on one entity field, used for correlation lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMatch {
    pub field: EntityField,
    pub value: Value,
}

impl FieldMatch {
    pub fn new(field: EntityField, value: Value) -> Self {
        Self { field, value }
    }

    /// Evaluate against an entity.
    pub fn matches<E: SyncEntity>(&self, entity: &E) -> bool {
        values_equal(&entity.field(self.field), &self.value)
    }
}

/// CRUD access to one record type.
#[async_trait]
pub trait Repository<R: Record>: Send + Sync {
    /// Load a record by id.
    async fn get(&self, id: Uuid) -> IdmResult<Option<R>>;

    /// Find records matching the filter, in insertion order.
    async fn find(&self, filter: &R::Filter) -> IdmResult<Vec<R>>;

    /// Insert or replace a record.
    async fn save(&self, record: R) -> IdmResult<R>;

    /// Delete a record by id.
    async fn delete(&self, id: Uuid) -> IdmResult<()>;

    /// Find the first matching record.
    async fn find_one(&self, filter: &R::Filter) -> IdmResult<Option<R>> {
        Ok(self.find(filter).await?.into_iter().next())
    }

    /// Count matching records.
    async fn count(&self, filter: &R::Filter) -> IdmResult<usize> {
        Ok(self.find(filter).await?.len())
    }
}

/// Helper for optional filter criteria.
pub(crate) fn criterion<T: PartialEq>(wanted: &Option<T>, actual: &T) -> bool {
    wanted.as_ref().map_or(true, |w| w == actual)
}
