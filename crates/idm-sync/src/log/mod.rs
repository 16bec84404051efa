//! Synchronization logs.
//!
//! Every run writes one [`SyncLog`]. Items are grouped into action logs by
//! action type and result; each processed object or missing account gets
//! one [`SyncItemLog`]. The `running` flag of the log is the gate that keeps
//! two runs of one configuration apart.

mod memory;
mod postgres;

pub use memory::InMemorySyncLogStore;
pub use postgres::{run_migrations, PgSyncLogStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use idm_core::{SyncConfigId, SyncLogId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::SyncResult;
use crate::executor::ItemOutcome;
use crate::types::{OperationResult, SyncActionType};

/// Log of one synchronization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLog {
    pub id: SyncLogId,
    pub config: SyncConfigId,
    pub running: bool,
    pub contains_error: bool,
    pub started: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
    /// The run was cancelled before it read all objects.
    pub stopped: bool,
    /// Greatest token seen by a custom-filter run.
    pub token: Option<String>,
    pub message: Option<String>,
}

impl SyncLog {
    pub fn start(config: SyncConfigId) -> Self {
        Self {
            id: SyncLogId::new(),
            config,
            running: true,
            contains_error: false,
            started: Utc::now(),
            ended: None,
            stopped: false,
            token: None,
            message: None,
        }
    }
}

/// Items of one action type and result within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncActionLog {
    pub id: Uuid,
    pub sync_log: SyncLogId,
    pub action: SyncActionType,
    pub result: OperationResult,
    pub count: u32,
}

impl SyncActionLog {
    pub fn new(sync_log: SyncLogId, action: SyncActionType, result: OperationResult) -> Self {
        Self {
            id: Uuid::new_v4(),
            sync_log,
            action,
            result,
            count: 0,
        }
    }
}

/// One processed object or missing account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItemLog {
    pub id: Uuid,
    pub action_log: Uuid,
    /// Connector UID of the item.
    pub identifier: String,
    pub display_name: Option<String>,
    pub entity: Option<Uuid>,
    pub result: OperationResult,
    pub message: String,
    pub created: DateTime<Utc>,
}

/// Persistence of synchronization logs.
#[async_trait]
pub trait SyncLogStore: Send + Sync {
    async fn save_log(&self, log: SyncLog) -> SyncResult<SyncLog>;

    /// Insert a new running log unless the configuration already has one,
    /// in one atomic step. Fails with
    /// [`SyncError::AlreadyRunning`](crate::SyncError::AlreadyRunning).
    async fn start_if_idle(&self, log: SyncLog) -> SyncResult<SyncLog>;

    async fn get_log(&self, id: SyncLogId) -> SyncResult<Option<SyncLog>>;

    /// Logs of a configuration, newest first.
    async fn find_logs(&self, config: SyncConfigId) -> SyncResult<Vec<SyncLog>>;

    async fn find_running(&self, config: SyncConfigId) -> SyncResult<Vec<SyncLog>>;

    async fn save_action_log(&self, action_log: SyncActionLog) -> SyncResult<SyncActionLog>;

    async fn find_action_log(
        &self,
        log: SyncLogId,
        action: SyncActionType,
        result: OperationResult,
    ) -> SyncResult<Option<SyncActionLog>>;

    /// Action logs of a run, optionally of one action type.
    async fn action_logs(
        &self,
        log: SyncLogId,
        action: Option<SyncActionType>,
    ) -> SyncResult<Vec<SyncActionLog>>;

    async fn save_item_log(&self, item: SyncItemLog) -> SyncResult<SyncItemLog>;

    /// Items of an action log in creation order.
    async fn item_logs(&self, action_log: Uuid) -> SyncResult<Vec<SyncItemLog>>;
}

/// Log of the run in progress with its action logs by (action, result).
#[derive(Debug)]
pub struct RunLog {
    pub log: SyncLog,
    actions: HashMap<(SyncActionType, OperationResult), SyncActionLog>,
}

impl RunLog {
    pub fn id(&self) -> SyncLogId {
        self.log.id
    }

    /// Logged item count per action type.
    pub fn counts(&self) -> HashMap<SyncActionType, u32> {
        let mut counts = HashMap::new();
        for action_log in self.actions.values() {
            *counts.entry(action_log.action).or_insert(0) += action_log.count;
        }
        counts
    }
}

/// Writes run, action and item logs.
#[derive(Clone)]
pub struct SyncLogWriter {
    store: Arc<dyn SyncLogStore>,
}

impl SyncLogWriter {
    pub fn new(store: Arc<dyn SyncLogStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn SyncLogStore> {
        &self.store
    }

    /// Open a running log for the configuration, refused while another run
    /// holds one.
    #[instrument(skip(self))]
    pub async fn start_log(&self, config: SyncConfigId) -> SyncResult<RunLog> {
        let log = self.store.start_if_idle(SyncLog::start(config)).await?;
        info!(sync_log = %log.id, config = %config, "Synchronization log started");
        Ok(RunLog {
            log,
            actions: HashMap::new(),
        })
    }

    /// Append an item, creating or reusing its action log.
    pub async fn log_item(
        &self,
        run: &mut RunLog,
        identifier: &str,
        outcome: &ItemOutcome,
    ) -> SyncResult<()> {
        let key = (outcome.action, outcome.result);
        let mut action_log = match run.actions.remove(&key) {
            Some(action_log) => action_log,
            None => self
                .store
                .find_action_log(run.log.id, outcome.action, outcome.result)
                .await?
                .unwrap_or_else(|| SyncActionLog::new(run.log.id, outcome.action, outcome.result)),
        };
        action_log.count += 1;
        let action_log = self.store.save_action_log(action_log).await?;

        self.store
            .save_item_log(SyncItemLog {
                id: Uuid::new_v4(),
                action_log: action_log.id,
                identifier: identifier.to_string(),
                display_name: outcome.display_name.clone(),
                entity: outcome.entity,
                result: outcome.result,
                message: outcome.message.clone(),
                created: Utc::now(),
            })
            .await?;
        run.actions.insert(key, action_log);

        if outcome.result.is_error() && !run.log.contains_error {
            run.log.contains_error = true;
            run.log = self.store.save_log(run.log.clone()).await?;
        }
        debug!(
            sync_log = %run.log.id,
            identifier = %identifier,
            action = %outcome.action,
            result = %outcome.result,
            "Item logged"
        );
        Ok(())
    }

    /// Close the log. `stopped` marks a cancelled run.
    #[instrument(skip(self, run), fields(sync_log = %run.log.id))]
    pub async fn finish_log(&self, mut run: RunLog, stopped: bool) -> SyncResult<RunLog> {
        run.log.running = false;
        run.log.stopped = stopped;
        run.log.ended = Some(Utc::now());
        run.log = self.store.save_log(run.log.clone()).await?;
        info!(
            contains_error = run.log.contains_error,
            stopped,
            "Synchronization log finished"
        );
        Ok(run)
    }

    /// Close the log of a run that failed as a whole.
    pub async fn fail_log(&self, mut run: RunLog, message: impl Into<String>) -> SyncResult<RunLog> {
        let message = message.into();
        warn!(sync_log = %run.log.id, error = %message, "Synchronization failed");
        run.log.contains_error = true;
        run.log.message = Some(message);
        self.finish_log(run, false).await
    }

    pub async fn is_running(&self, config: SyncConfigId) -> SyncResult<bool> {
        Ok(!self.store.find_running(config).await?.is_empty())
    }

    /// Finalize logs left running. Returns how many were closed.
    #[instrument(skip(self))]
    pub async fn reset_running(&self, config: SyncConfigId) -> SyncResult<usize> {
        let running = self.store.find_running(config).await?;
        let count = running.len();
        for mut log in running {
            log.running = false;
            log.ended = Some(Utc::now());
            log.message = Some("Run was interrupted and reset".to_string());
            self.store.save_log(log).await?;
        }
        if count > 0 {
            warn!(config = %config, logs = count, "Stuck synchronization logs reset");
        }
        Ok(count)
    }
}
