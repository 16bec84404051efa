//! Shared fixtures for synchronization integration tests.

#![allow(dead_code)]

use chrono::{Days, NaiveDate};
use idm_connector::{AttributeSet, InMemoryConnector, Uid};
use idm_core::{SyncConfigId, SystemId};
use std::sync::{Arc, Once};

use idm_sync::log::{SyncItemLog, SyncLogStore};
use idm_sync::services::{
    InMemoryAutomaticRoleService, InMemoryConfigurationService, InMemoryFormService,
    InMemoryTaskScheduler, InMemoryWorkflowService,
};
use idm_sync::{
    IdmStore, InMemorySyncConfigStore, InMemorySyncLogStore, OperationResult, SyncConfig,
    SyncActionType, SyncConfigStore, SyncConnector, SyncEngine, SyncServices,
};

static INIT: Once = Once::new();

/// Initialize logging for tests (once), only when RUST_LOG is set.
pub fn init_test_logging() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            idm_sync::logging::init_test_logging();
        }
    });
}

/// Day every harness engine runs on.
pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
}

/// `today` shifted by `offset` days, as `YYYY-MM-DD`.
pub fn day(offset: i64) -> NaiveDate {
    if offset >= 0 {
        today() + Days::new(offset as u64)
    } else {
        today() - Days::new(offset.unsigned_abs())
    }
}

pub fn day_str(offset: i64) -> String {
    day(offset).format("%Y-%m-%d").to_string()
}

/// Engine over in-memory collaborators with one connected system.
pub struct Harness {
    pub system: SystemId,
    pub connector: Arc<InMemoryConnector>,
    pub store: IdmStore,
    pub services: SyncServices,
    pub configuration: Arc<InMemoryConfigurationService>,
    pub workflows: Arc<InMemoryWorkflowService>,
    pub automatic_roles: Arc<InMemoryAutomaticRoleService>,
    pub scheduler: Arc<InMemoryTaskScheduler>,
    pub configs: Arc<InMemorySyncConfigStore>,
    pub logs: Arc<InMemorySyncLogStore>,
    pub engine: SyncEngine,
}

impl Harness {
    pub fn new() -> Self {
        let connector = Arc::new(InMemoryConnector::new("hr-table"));
        Self::with_connector(connector.clone(), connector)
    }

    /// Harness whose engine reads through `engine_connector`.
    pub fn with_connector(
        connector: Arc<InMemoryConnector>,
        engine_connector: Arc<dyn SyncConnector>,
    ) -> Self {
        init_test_logging();
        let system = SystemId::new();
        let store = IdmStore::in_memory();
        let configuration = Arc::new(InMemoryConfigurationService::new());
        let workflows = Arc::new(InMemoryWorkflowService::new());
        let automatic_roles = Arc::new(InMemoryAutomaticRoleService::new());
        let scheduler = Arc::new(InMemoryTaskScheduler::new());
        let services = SyncServices {
            forms: Arc::new(InMemoryFormService::new()),
            configuration: configuration.clone(),
            workflows: workflows.clone(),
            automatic_roles: automatic_roles.clone(),
            scheduler: scheduler.clone(),
        };
        let configs = Arc::new(InMemorySyncConfigStore::new());
        let logs = Arc::new(InMemorySyncLogStore::new());
        let engine = SyncEngine::new(configs.clone(), store.clone(), services.clone(), logs.clone())
            .with_connector(system, engine_connector)
            .with_today(today());
        Self {
            system,
            connector,
            store,
            services,
            configuration,
            workflows,
            automatic_roles,
            scheduler,
            configs,
            logs,
            engine,
        }
    }

    pub async fn save_config(&self, config: SyncConfig) -> SyncConfigId {
        self.configs.save(config).await.unwrap().id
    }

    pub async fn config(&self, id: SyncConfigId) -> SyncConfig {
        self.configs.get(id).await.unwrap().unwrap()
    }

    /// Put a connector row of `class` keyed by `uid`.
    pub fn put(&self, class: &str, uid: &str, attributes: AttributeSet) {
        self.connector.put(class, Uid::from_value(uid), attributes);
    }

    /// Items of one action type with their result, in log order.
    pub async fn items(
        &self,
        log: idm_core::SyncLogId,
        action: SyncActionType,
    ) -> Vec<SyncItemLog> {
        let mut items = Vec::new();
        for action_log in self.logs.action_logs(log, Some(action)).await.unwrap() {
            items.extend(self.logs.item_logs(action_log.id).await.unwrap());
        }
        items.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        items
    }

    /// Count of items with the given action type and result.
    pub async fn count(
        &self,
        log: idm_core::SyncLogId,
        action: SyncActionType,
        result: OperationResult,
    ) -> usize {
        self.items(log, action)
            .await
            .iter()
            .filter(|item| item.result == result)
            .count()
    }
}
