//! In-memory repository.

use async_trait::async_trait;
use idm_core::{IdmError, IdmResult};
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

use super::{Record, Repository};

/// Repository keeping records in insertion order.
#[derive(Debug)]
pub struct InMemoryRepository<R: Record> {
    records: RwLock<Vec<R>>,
}

impl<R: Record> InMemoryRepository<R> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }
}

impl<R: Record> Default for InMemoryRepository<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: Record> Repository<R> for InMemoryRepository<R> {
    async fn get(&self, id: Uuid) -> IdmResult<Option<R>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.iter().find(|r| r.id() == id).cloned())
    }

    async fn find(&self, filter: &R::Filter) -> IdmResult<Vec<R>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.iter().filter(|r| r.matches(filter)).cloned().collect())
    }

    async fn save(&self, record: R) -> IdmResult<R> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        match records.iter_mut().find(|r| r.id() == record.id()) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(record)
    }

    async fn delete(&self, id: Uuid) -> IdmResult<()> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        records.retain(|r| r.id() != id);
        if records.len() == before {
            return Err(IdmError::not_found(R::NAME, id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Identity, IdentityFilter};

    #[tokio::test]
    async fn test_save_replaces_and_find_filters() {
        let repo = InMemoryRepository::<Identity>::new();
        let mut john = Identity::new("john");
        repo.save(john.clone()).await.unwrap();
        repo.save(Identity::new("jane")).await.unwrap();

        john.email = Some("john@example.com".to_string());
        repo.save(john.clone()).await.unwrap();

        let all = repo.find(&IdentityFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let found = repo
            .find_one(&IdentityFilter::by_username("john"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.email.as_deref(), Some("john@example.com"));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let repo = InMemoryRepository::<Identity>::new();
        let john = repo.save(Identity::new("john")).await.unwrap();

        repo.delete(john.id).await.unwrap();
        let err = repo.delete(john.id).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(repo.count(&IdentityFilter::default()).await.unwrap(), 0);
    }
}
