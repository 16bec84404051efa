use async_trait::async_trait;
use idm_core::{SyncConfigId, SyncLogId};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{SyncActionLog, SyncItemLog, SyncLog, SyncLogStore};
use crate::error::{SyncError, SyncResult};
use crate::types::{OperationResult, SyncActionType};

#[derive(Debug, Default)]
struct Tables {
    logs: Vec<SyncLog>,
    actions: Vec<SyncActionLog>,
    items: Vec<SyncItemLog>,
}

/// Log store kept in memory.
#[derive(Debug, Default)]
pub struct InMemorySyncLogStore {
    tables: RwLock<Tables>,
}

impl InMemorySyncLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn upsert<T: Clone>(rows: &mut Vec<T>, row: T, same: impl Fn(&T) -> bool) -> T {
    match rows.iter_mut().find(|r| same(r)) {
        Some(existing) => *existing = row.clone(),
        None => rows.push(row.clone()),
    }
    row
}

#[async_trait]
impl SyncLogStore for InMemorySyncLogStore {
    async fn save_log(&self, log: SyncLog) -> SyncResult<SyncLog> {
        let mut tables = self.tables.write().await;
        let id = log.id;
        Ok(upsert(&mut tables.logs, log, |l| l.id == id))
    }

    async fn start_if_idle(&self, log: SyncLog) -> SyncResult<SyncLog> {
        let mut tables = self.tables.write().await;
        if tables.logs.iter().any(|l| l.config == log.config && l.running) {
            return Err(SyncError::AlreadyRunning {
                config_id: log.config,
            });
        }
        tables.logs.push(log.clone());
        Ok(log)
    }

    async fn get_log(&self, id: SyncLogId) -> SyncResult<Option<SyncLog>> {
        let tables = self.tables.read().await;
        Ok(tables.logs.iter().find(|l| l.id == id).cloned())
    }

    async fn find_logs(&self, config: SyncConfigId) -> SyncResult<Vec<SyncLog>> {
        let tables = self.tables.read().await;
        let mut logs: Vec<SyncLog> = tables
            .logs
            .iter()
            .filter(|l| l.config == config)
            .cloned()
            .collect();
        logs.reverse();
        Ok(logs)
    }

    async fn find_running(&self, config: SyncConfigId) -> SyncResult<Vec<SyncLog>> {
        let tables = self.tables.read().await;
        Ok(tables
            .logs
            .iter()
            .filter(|l| l.config == config && l.running)
            .cloned()
            .collect())
    }

    async fn save_action_log(&self, action_log: SyncActionLog) -> SyncResult<SyncActionLog> {
        let mut tables = self.tables.write().await;
        let id = action_log.id;
        Ok(upsert(&mut tables.actions, action_log, |a| a.id == id))
    }

    async fn find_action_log(
        &self,
        log: SyncLogId,
        action: SyncActionType,
        result: OperationResult,
    ) -> SyncResult<Option<SyncActionLog>> {
        let tables = self.tables.read().await;
        Ok(tables
            .actions
            .iter()
            .find(|a| a.sync_log == log && a.action == action && a.result == result)
            .cloned())
    }

    async fn action_logs(
        &self,
        log: SyncLogId,
        action: Option<SyncActionType>,
    ) -> SyncResult<Vec<SyncActionLog>> {
        let tables = self.tables.read().await;
        Ok(tables
            .actions
            .iter()
            .filter(|a| a.sync_log == log && action.map_or(true, |action| a.action == action))
            .cloned()
            .collect())
    }

    async fn save_item_log(&self, item: SyncItemLog) -> SyncResult<SyncItemLog> {
        let mut tables = self.tables.write().await;
        let id = item.id;
        Ok(upsert(&mut tables.items, item, |i| i.id == id))
    }

    async fn item_logs(&self, action_log: Uuid) -> SyncResult<Vec<SyncItemLog>> {
        let tables = self.tables.read().await;
        Ok(tables
            .items
            .iter()
            .filter(|i| i.action_log == action_log)
            .cloned()
            .collect())
    }
}
