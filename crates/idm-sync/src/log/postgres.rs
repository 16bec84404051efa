//! PostgreSQL log store.
//!
//! Action types and results are stored as their canonical text form.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use idm_core::{SyncConfigId, SyncLogId};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use super::{SyncActionLog, SyncItemLog, SyncLog, SyncLogStore};
use crate::error::{SyncError, SyncResult};
use crate::types::{OperationResult, SyncActionType};

/// Apply the embedded log store migrations.
pub async fn run_migrations(pool: &PgPool) -> SyncResult<()> {
    tracing::info!("Running sync log migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Sync log migrations completed");
    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
struct SyncLogRow {
    id: Uuid,
    config_id: Uuid,
    running: bool,
    contains_error: bool,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    stopped: bool,
    token: Option<String>,
    message: Option<String>,
}

impl From<SyncLogRow> for SyncLog {
    fn from(row: SyncLogRow) -> Self {
        Self {
            id: SyncLogId::from_uuid(row.id),
            config: SyncConfigId::from_uuid(row.config_id),
            running: row.running,
            contains_error: row.contains_error,
            started: row.started_at,
            ended: row.ended_at,
            stopped: row.stopped,
            token: row.token,
            message: row.message,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SyncActionLogRow {
    id: Uuid,
    sync_log_id: Uuid,
    action: String,
    result: String,
    item_count: i32,
}

impl TryFrom<SyncActionLogRow> for SyncActionLog {
    type Error = SyncError;

    fn try_from(row: SyncActionLogRow) -> SyncResult<Self> {
        Ok(Self {
            id: row.id,
            sync_log: SyncLogId::from_uuid(row.sync_log_id),
            action: parse_action(&row.action)?,
            result: parse_result(&row.result)?,
            count: u32::try_from(row.item_count).unwrap_or_default(),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SyncItemLogRow {
    id: Uuid,
    action_log_id: Uuid,
    identifier: String,
    display_name: Option<String>,
    entity_id: Option<Uuid>,
    result: String,
    message: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<SyncItemLogRow> for SyncItemLog {
    type Error = SyncError;

    fn try_from(row: SyncItemLogRow) -> SyncResult<Self> {
        Ok(Self {
            id: row.id,
            action_log: row.action_log_id,
            identifier: row.identifier,
            display_name: row.display_name,
            entity: row.entity_id,
            result: parse_result(&row.result)?,
            message: row.message,
            created: row.created_at,
        })
    }
}

fn parse_action(value: &str) -> SyncResult<SyncActionType> {
    value.parse().map_err(SyncError::internal)
}

fn parse_result(value: &str) -> SyncResult<OperationResult> {
    value.parse().map_err(SyncError::internal)
}

/// Log store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgSyncLogStore {
    pool: PgPool,
}

impl PgSyncLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database and apply migrations.
    pub async fn connect(database_url: &str) -> SyncResult<Self> {
        let pool = PgPool::connect(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl SyncLogStore for PgSyncLogStore {
    #[instrument(skip(self, log), fields(sync_log = %log.id))]
    async fn save_log(&self, log: SyncLog) -> SyncResult<SyncLog> {
        let row: SyncLogRow = sqlx::query_as(
            r#"
            INSERT INTO sync_logs (
                id, config_id, running, contains_error, started_at, ended_at, stopped, token, message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                running = EXCLUDED.running,
                contains_error = EXCLUDED.contains_error,
                ended_at = EXCLUDED.ended_at,
                stopped = EXCLUDED.stopped,
                token = EXCLUDED.token,
                message = EXCLUDED.message
            RETURNING *
            "#,
        )
        .bind(*log.id.as_uuid())
        .bind(*log.config.as_uuid())
        .bind(log.running)
        .bind(log.contains_error)
        .bind(log.started)
        .bind(log.ended)
        .bind(log.stopped)
        .bind(&log.token)
        .bind(&log.message)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    #[instrument(skip(self, log), fields(sync_log = %log.id, config = %log.config))]
    async fn start_if_idle(&self, log: SyncLog) -> SyncResult<SyncLog> {
        let row: Option<SyncLogRow> = sqlx::query_as(
            r#"
            INSERT INTO sync_logs (id, config_id, running, started_at)
            VALUES ($1, $2, TRUE, $3)
            ON CONFLICT (config_id) WHERE running DO NOTHING
            RETURNING *
            "#,
        )
        .bind(*log.id.as_uuid())
        .bind(*log.config.as_uuid())
        .bind(log.started)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Into::into).ok_or(SyncError::AlreadyRunning {
            config_id: log.config,
        })
    }

    async fn get_log(&self, id: SyncLogId) -> SyncResult<Option<SyncLog>> {
        let row: Option<SyncLogRow> = sqlx::query_as(
            r#"
            SELECT * FROM sync_logs WHERE id = $1
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn find_logs(&self, config: SyncConfigId) -> SyncResult<Vec<SyncLog>> {
        let rows: Vec<SyncLogRow> = sqlx::query_as(
            r#"
            SELECT * FROM sync_logs
            WHERE config_id = $1
            ORDER BY started_at DESC
            "#,
        )
        .bind(*config.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_running(&self, config: SyncConfigId) -> SyncResult<Vec<SyncLog>> {
        let rows: Vec<SyncLogRow> = sqlx::query_as(
            r#"
            SELECT * FROM sync_logs
            WHERE config_id = $1 AND running = TRUE
            "#,
        )
        .bind(*config.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn save_action_log(&self, action_log: SyncActionLog) -> SyncResult<SyncActionLog> {
        let row: SyncActionLogRow = sqlx::query_as(
            r#"
            INSERT INTO sync_action_logs (id, sync_log_id, action, result, item_count)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET item_count = EXCLUDED.item_count
            RETURNING *
            "#,
        )
        .bind(action_log.id)
        .bind(*action_log.sync_log.as_uuid())
        .bind(action_log.action.as_str())
        .bind(action_log.result.as_str())
        .bind(i32::try_from(action_log.count).unwrap_or(i32::MAX))
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn find_action_log(
        &self,
        log: SyncLogId,
        action: SyncActionType,
        result: OperationResult,
    ) -> SyncResult<Option<SyncActionLog>> {
        let row: Option<SyncActionLogRow> = sqlx::query_as(
            r#"
            SELECT * FROM sync_action_logs
            WHERE sync_log_id = $1 AND action = $2 AND result = $3
            "#,
        )
        .bind(*log.as_uuid())
        .bind(action.as_str())
        .bind(result.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn action_logs(
        &self,
        log: SyncLogId,
        action: Option<SyncActionType>,
    ) -> SyncResult<Vec<SyncActionLog>> {
        let rows: Vec<SyncActionLogRow> = sqlx::query_as(
            r#"
            SELECT * FROM sync_action_logs
            WHERE sync_log_id = $1 AND ($2::text IS NULL OR action = $2)
            ORDER BY action, result
            "#,
        )
        .bind(*log.as_uuid())
        .bind(action.map(|a| a.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_item_log(&self, item: SyncItemLog) -> SyncResult<SyncItemLog> {
        let row: SyncItemLogRow = sqlx::query_as(
            r#"
            INSERT INTO sync_item_logs (
                id, action_log_id, identifier, display_name, entity_id, result, message, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(item.id)
        .bind(item.action_log)
        .bind(&item.identifier)
        .bind(&item.display_name)
        .bind(item.entity)
        .bind(item.result.as_str())
        .bind(&item.message)
        .bind(item.created)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn item_logs(&self, action_log: Uuid) -> SyncResult<Vec<SyncItemLog>> {
        let rows: Vec<SyncItemLogRow> = sqlx::query_as(
            r#"
            SELECT * FROM sync_item_logs
            WHERE action_log_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(action_log)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}
