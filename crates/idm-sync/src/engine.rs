//! Synchronization engine.
//!
//! [`SyncEngine::process`] runs one configuration end to end: it opens the
//! run log, reads the connector page by page, hands every object to the
//! executor of the configured kind inside its own transaction, reconciles
//! missing accounts and finishes the log.

use chrono::{NaiveDate, Utc};
use idm_connector::{ConnectorObject, Filter, PageRequest};
use idm_core::{SyncConfigId, SystemId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, instrument, warn};

use crate::config::{SyncConfig, SyncConfigStore};
use crate::context::{SyncConnector, SyncContext};
use crate::error::{SyncError, SyncResult};
use crate::executor::{ExecutorRegistry, SyncExecutor};
use crate::log::{RunLog, SyncLog, SyncLogStore, SyncLogWriter};
use crate::script::{RhaiScriptEvaluator, ScriptEvaluator};
use crate::services::{SyncServices, PROPERTY_SYNC_PAGE_SIZE};
use crate::settings::EngineSettings;
use crate::store::IdmStore;
use crate::transaction::{ImmediateTransactionRunner, TransactionRunner};
use crate::types::SyncActionType;

/// Page size when neither the configuration service nor settings set one.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct SyncRunSummary {
    pub log: SyncLog,
    /// Logged items per action type.
    pub counts: HashMap<SyncActionType, u32>,
}

impl SyncRunSummary {
    pub fn count(&self, action: SyncActionType) -> u32 {
        self.counts.get(&action).copied().unwrap_or(0)
    }

    pub fn contains_error(&self) -> bool {
        self.log.contains_error
    }
}

/// Cancellation requests by configuration.
///
/// Cloned handles share state, so a scheduler can stop a run in progress.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    cancelled: Arc<Mutex<HashSet<SyncConfigId>>>,
}

impl CancellationHandle {
    pub fn cancel(&self, config: SyncConfigId) {
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(config);
    }

    pub fn is_cancelled(&self, config: SyncConfigId) -> bool {
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&config)
    }

    fn clear(&self, config: SyncConfigId) {
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&config);
    }
}

/// State carried out of the object loop.
#[derive(Debug, Default)]
struct RunProgress {
    stopped: bool,
    token: Option<String>,
}

/// Runs synchronization configurations.
pub struct SyncEngine {
    configs: Arc<dyn SyncConfigStore>,
    connectors: HashMap<SystemId, Arc<dyn SyncConnector>>,
    store: IdmStore,
    services: SyncServices,
    scripts: Arc<dyn ScriptEvaluator>,
    logs: SyncLogWriter,
    executors: ExecutorRegistry,
    transactions: Arc<dyn TransactionRunner>,
    cancellation: CancellationHandle,
    settings: EngineSettings,
    today: Option<NaiveDate>,
}

impl SyncEngine {
    pub fn new(
        configs: Arc<dyn SyncConfigStore>,
        store: IdmStore,
        services: SyncServices,
        log_store: Arc<dyn SyncLogStore>,
    ) -> Self {
        Self {
            configs,
            connectors: HashMap::new(),
            store,
            services,
            scripts: Arc::new(RhaiScriptEvaluator::new()),
            logs: SyncLogWriter::new(log_store),
            executors: ExecutorRegistry::standard(),
            transactions: Arc::new(ImmediateTransactionRunner),
            cancellation: CancellationHandle::default(),
            settings: EngineSettings::default(),
            today: None,
        }
    }

    /// Register the connector of a system.
    #[must_use]
    pub fn with_connector(mut self, system: SystemId, connector: Arc<dyn SyncConnector>) -> Self {
        self.connectors.insert(system, connector);
        self
    }

    /// Apply process settings; script limits configure the Rhai evaluator.
    #[must_use]
    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.scripts = Arc::new(RhaiScriptEvaluator::with_config(
            settings.script_limits.clone(),
        ));
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_script_evaluator(mut self, scripts: Arc<dyn ScriptEvaluator>) -> Self {
        self.scripts = scripts;
        self
    }

    #[must_use]
    pub fn with_executors(mut self, executors: ExecutorRegistry) -> Self {
        self.executors = executors;
        self
    }

    #[must_use]
    pub fn with_transaction_runner(mut self, transactions: Arc<dyn TransactionRunner>) -> Self {
        self.transactions = transactions;
        self
    }

    /// Fix the day validity decisions are made for.
    #[must_use]
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn logs(&self) -> &SyncLogWriter {
        &self.logs
    }

    pub fn cancellation(&self) -> CancellationHandle {
        self.cancellation.clone()
    }

    pub async fn is_running(&self, config_id: SyncConfigId) -> SyncResult<bool> {
        self.logs.is_running(config_id).await
    }

    /// Ask a running synchronization to stop after the current object.
    ///
    /// Returns `false` when the configuration is not running.
    #[instrument(skip(self))]
    pub async fn cancel(&self, config_id: SyncConfigId) -> SyncResult<bool> {
        if !self.logs.is_running(config_id).await? {
            return Ok(false);
        }
        self.cancellation.cancel(config_id);
        info!(config = %config_id, "Synchronization cancel requested");
        Ok(true)
    }

    /// Finalize logs left running by an interrupted process.
    pub async fn reset_running(&self, config_id: SyncConfigId) -> SyncResult<usize> {
        self.cancellation.clear(config_id);
        self.logs.reset_running(config_id).await
    }

    /// Run one synchronization configuration.
    #[instrument(skip(self))]
    pub async fn process(&self, config_id: SyncConfigId) -> SyncResult<SyncRunSummary> {
        let config = self
            .configs
            .get(config_id)
            .await?
            .ok_or_else(|| SyncError::not_found("Sync configuration", config_id.to_string()))?;

        let mut run = match self.logs.start_log(config_id).await {
            Ok(run) => run,
            Err(e @ SyncError::AlreadyRunning { .. }) => {
                warn!(config = %config_id, "Synchronization is already running");
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        self.cancellation.clear(config_id);

        let (executor, connector) = match self.prepare(&config) {
            Ok(prepared) => prepared,
            Err(e) => return Err(self.abort(run, e).await),
        };

        let ctx = SyncContext::new(
            config,
            connector,
            self.store.clone(),
            self.services.clone(),
            self.scripts.clone(),
            self.today.unwrap_or_else(|| Utc::now().date_naive()),
        );
        info!(
            config = %config_id,
            name = %ctx.config.name,
            kind = %executor.kind(),
            "Synchronization started"
        );

        let progress = match self.run(&ctx, executor.as_ref(), &mut run).await {
            Ok(progress) => progress,
            Err(e) => return Err(self.abort(run, e).await),
        };
        self.cancellation.clear(config_id);

        if progress.token != ctx.config.token {
            run.log.token = progress.token.clone();
            let mut config = ctx.config.clone();
            config.token = progress.token;
            if let Err(e) = self.configs.save(config).await {
                return Err(self.abort(run, e.into()).await);
            }
        }

        let run = self.logs.finish_log(run, progress.stopped).await?;
        let summary = SyncRunSummary {
            counts: run.counts(),
            log: run.log,
        };
        info!(
            config = %config_id,
            contains_error = summary.log.contains_error,
            stopped = summary.log.stopped,
            "Synchronization finished"
        );
        Ok(summary)
    }

    /// Close the log of a failed run and hand the error back.
    async fn abort(&self, run: RunLog, error: SyncError) -> SyncError {
        let config_id = run.log.config;
        self.cancellation.clear(config_id);
        warn!(
            config = %config_id,
            error = %error,
            retryable = error.is_retryable(),
            "Synchronization run failed"
        );
        if let Err(log_error) = self.logs.fail_log(run, error.to_string()).await {
            warn!(config = %config_id, error = %log_error, "Failed run log could not be closed");
        }
        error
    }

    fn prepare(
        &self,
        config: &SyncConfig,
    ) -> SyncResult<(Arc<dyn SyncExecutor>, Arc<dyn SyncConnector>)> {
        if !config.enabled {
            return Err(SyncError::configuration(format!(
                "synchronization '{}' is disabled",
                config.name
            )));
        }
        config.validate()?;
        let executor = self.executors.get(config.entity_kind()).ok_or_else(|| {
            SyncError::configuration(format!("no executor for {}", config.entity_kind()))
        })?;
        let connector = self.connectors.get(&config.system).cloned().ok_or_else(|| {
            SyncError::configuration(format!("no connector for system {}", config.system))
        })?;
        Ok((executor, connector))
    }

    async fn page_size(&self) -> SyncResult<u32> {
        let configured = self
            .services
            .configuration
            .get_u32(PROPERTY_SYNC_PAGE_SIZE)
            .await?
            .filter(|size| *size > 0);
        Ok(configured
            .or(self.settings.page_size)
            .unwrap_or(DEFAULT_PAGE_SIZE))
    }

    /// Process the run, then the executor's batch follow-up, which also runs
    /// after a failure so items already committed get their follow-up.
    async fn run(
        &self,
        ctx: &SyncContext,
        executor: &dyn SyncExecutor,
        run: &mut RunLog,
    ) -> SyncResult<RunProgress> {
        let result = self.read_and_process(ctx, executor, run).await;
        let after_batch = executor.after_batch(ctx).await;
        match (result, after_batch) {
            (Ok(progress), Ok(())) => Ok(progress),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(after)) => {
                warn!(error = %after, "Batch follow-up of a failed run failed");
                Err(e)
            }
        }
    }

    async fn read_and_process(
        &self,
        ctx: &SyncContext,
        executor: &dyn SyncExecutor,
        run: &mut RunLog,
    ) -> SyncResult<RunProgress> {
        let config_id = ctx.config.id;
        let page_size = self.page_size().await?;
        let filter = search_filter(&ctx.config);
        let mut progress = RunProgress {
            stopped: false,
            token: ctx.config.token.clone(),
        };

        let mut batch = Vec::new();
        let mut cursor: Option<String> = None;
        'pages: loop {
            let mut page = PageRequest::new(page_size);
            if let Some(cursor) = cursor.take() {
                page = page.with_cursor(cursor);
            }
            let result = ctx
                .connector
                .search(&ctx.config.object_class, filter.clone(), None, Some(page))
                .await?;
            debug!(objects = result.objects.len(), has_more = result.has_more, "Connector page read");

            if executor.reads_whole_batch() {
                batch.extend(result.objects);
            } else {
                for object in result.objects {
                    if self.cancellation.is_cancelled(config_id) {
                        progress.stopped = true;
                        break 'pages;
                    }
                    self.process_object(ctx, executor, run, &object, &mut progress)
                        .await?;
                }
            }

            match result.next_cursor {
                Some(next) if result.has_more => cursor = Some(next),
                _ => break,
            }
        }

        if !progress.stopped && executor.reads_whole_batch() {
            let prepared = executor.prepare_batch(ctx, batch).await?;
            for (uid, outcome) in &prepared.rejected {
                ctx.mark_seen(uid);
                self.logs.log_item(run, uid, outcome).await?;
            }
            for object in prepared.objects {
                if self.cancellation.is_cancelled(config_id) {
                    progress.stopped = true;
                    break;
                }
                self.process_object(ctx, executor, run, &object, &mut progress)
                    .await?;
            }
        }

        if progress.stopped {
            info!(config = %config_id, "Synchronization stopped on request");
        } else if ctx.config.reconciliation {
            progress.stopped = self.reconcile_missing(ctx, executor, run).await?;
        }
        Ok(progress)
    }

    async fn process_object(
        &self,
        ctx: &SyncContext,
        executor: &dyn SyncExecutor,
        run: &mut RunLog,
        object: &ConnectorObject,
        progress: &mut RunProgress,
    ) -> SyncResult<()> {
        let uid = object.uid.value();
        ctx.mark_seen(uid);
        let outcome = self
            .transactions
            .run_in_new_transaction(Box::pin(executor.process_object(ctx, object)))
            .await;
        self.logs.log_item(run, uid, &outcome).await?;

        if let Some(attribute) = &ctx.config.token_attribute {
            if let Some(value) = object.attributes.get(attribute).and_then(|v| v.as_text()) {
                if is_newer_token(progress.token.as_deref(), &value) {
                    progress.token = Some(value);
                }
            }
        }
        Ok(())
    }

    /// Handle accounts of the synchronized kind not read in this run.
    /// Returns `true` when cancelled.
    async fn reconcile_missing(
        &self,
        ctx: &SyncContext,
        executor: &dyn SyncExecutor,
        run: &mut RunLog,
    ) -> SyncResult<bool> {
        let accounts = ctx
            .store
            .accounts_of(ctx.config.system, executor.kind())
            .await?;
        let missing: Vec<_> = accounts
            .into_iter()
            .filter(|account| !ctx.was_seen(&account.uid))
            .collect();
        debug!(accounts = missing.len(), "Missing accounts found");

        for account in &missing {
            if self.cancellation.is_cancelled(ctx.config.id) {
                return Ok(true);
            }
            let outcome = self
                .transactions
                .run_in_new_transaction(Box::pin(executor.process_missing_account(ctx, account)))
                .await;
            self.logs.log_item(run, &account.uid, &outcome).await?;
        }
        Ok(false)
    }
}

/// Connector filter of a custom-filter run: the configured filter and the
/// token condition.
pub fn search_filter(config: &SyncConfig) -> Option<Filter> {
    if !config.custom_filter {
        return None;
    }
    let token = match (&config.token_attribute, &config.token) {
        (Some(attribute), Some(token)) => Some(Filter::gt(attribute.clone(), token.clone())),
        _ => None,
    };
    match (config.filter.clone(), token) {
        (Some(filter), Some(token)) => Some(filter.and_with(token)),
        (filter, token) => filter.or(token),
    }
}

/// Tokens compare numerically when both are integers.
fn is_newer_token(current: Option<&str>, candidate: &str) -> bool {
    let Some(current) = current else {
        return true;
    };
    match (current.parse::<i64>(), candidate.parse::<i64>()) {
        (Ok(current), Ok(candidate)) => candidate > current,
        _ => candidate > current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContractSyncOptions, SyncKindConfig};
    use crate::mapping::AttributeMapping;
    use crate::types::EntityField;

    fn config() -> SyncConfig {
        SyncConfig::new(
            "contracts",
            SystemId::new(),
            "contract",
            SyncKindConfig::Contract(ContractSyncOptions::default()),
            vec![AttributeMapping::entity("id", EntityField::ExternalId).as_uid()],
            "id",
        )
    }

    #[test]
    fn test_token_comparison() {
        assert!(is_newer_token(None, "5"));
        assert!(is_newer_token(Some("9"), "10"));
        assert!(!is_newer_token(Some("10"), "9"));
        assert!(is_newer_token(Some("2024-01-01"), "2024-02-01"));
        assert!(!is_newer_token(Some("b"), "a"));
    }

    #[test]
    fn test_search_filter_without_custom_filter() {
        let mut config = config();
        config.filter = Some(Filter::eq("type", "employee"));
        assert_eq!(search_filter(&config), None);
    }

    #[test]
    fn test_search_filter_combines_token() {
        let config = config()
            .with_custom_filter(Some(Filter::eq("type", "employee")), Some("changed".into()));
        assert_eq!(search_filter(&config), Some(Filter::eq("type", "employee")));

        let mut config = config;
        config.token = Some("42".into());
        assert_eq!(
            search_filter(&config),
            Some(Filter::eq("type", "employee").and_with(Filter::gt("changed", "42")))
        );

        config.filter = None;
        assert_eq!(search_filter(&config), Some(Filter::gt("changed", "42")));
    }

    #[test]
    fn test_cancellation_handle_is_shared() {
        let handle = CancellationHandle::default();
        let other = handle.clone();
        let id = SyncConfigId::new();
        other.cancel(id);
        assert!(handle.is_cancelled(id));
        handle.clear(id);
        assert!(!other.is_cancelled(id));
    }
}
