//! Per-run state handed to executors.

use chrono::NaiveDate;
use idm_connector::{SearchOp, UpdateOp};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::mapping::MappingResolver;
use crate::script::ScriptEvaluator;
use crate::services::SyncServices;
use crate::store::IdmStore;

/// Connector capabilities the engine needs.
pub trait SyncConnector: SearchOp + UpdateOp {}

impl<T: SearchOp + UpdateOp> SyncConnector for T {}

/// Policy flags of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncFlags {
    /// Run the slice temporal resolver after slice changes.
    pub recalculate_slices: bool,
    /// Schedule HR tasks after the batch.
    pub schedule_hr_tasks: bool,
    /// Recalculate automatic roles after each identity.
    pub start_auto_role_rec: bool,
}

impl SyncFlags {
    /// Flags derived from a configuration.
    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        let start_auto_role_rec = match &config.kind {
            crate::config::SyncKindConfig::Identity(options) => options.start_auto_role_rec,
            _ => false,
        };
        Self {
            recalculate_slices: config.start_of_hr_processes,
            schedule_hr_tasks: config.start_of_hr_processes,
            start_auto_role_rec,
        }
    }
}

#[derive(Debug, Default)]
struct RunState {
    /// Entity id per connector UID processed in this run.
    resolved: HashMap<String, Uuid>,
    seen: HashSet<String>,
    touched_contracts: BTreeSet<Uuid>,
}

/// Everything an executor needs while processing one run.
pub struct SyncContext {
    pub config: SyncConfig,
    /// The synchronized system as bound to scripts.
    pub system: Value,
    pub connector: Arc<dyn SyncConnector>,
    pub store: IdmStore,
    pub services: SyncServices,
    pub scripts: Arc<dyn ScriptEvaluator>,
    /// Day used for validity decisions.
    pub today: NaiveDate,
    pub flags: SyncFlags,
    state: Mutex<RunState>,
}

impl SyncContext {
    pub fn new(
        config: SyncConfig,
        connector: Arc<dyn SyncConnector>,
        store: IdmStore,
        services: SyncServices,
        scripts: Arc<dyn ScriptEvaluator>,
        today: NaiveDate,
    ) -> Self {
        let system = json!({
            "id": config.system.to_string(),
            "name": connector.display_name(),
        });
        let flags = SyncFlags::from_config(&config);
        Self {
            config,
            system,
            connector,
            store,
            services,
            scripts,
            today,
            flags,
            state: Mutex::new(RunState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolver over the configured mapping.
    pub fn resolver(&self) -> MappingResolver<'_> {
        MappingResolver::new(&self.config.mapping, self.scripts.as_ref(), self.system.clone())
    }

    /// Record that a UID was read from the connector.
    pub fn mark_seen(&self, uid: &str) {
        self.state().seen.insert(uid.to_string());
    }

    pub fn was_seen(&self, uid: &str) -> bool {
        self.state().seen.contains(uid)
    }

    /// Record the entity a UID resolved to.
    pub fn remember_resolved(&self, uid: &str, entity: Uuid) {
        self.state().resolved.insert(uid.to_string(), entity);
    }

    pub fn resolved(&self, uid: &str) -> Option<Uuid> {
        self.state().resolved.get(uid).copied()
    }

    /// Record a contract changed in this run for HR processing.
    pub fn touch_contract(&self, contract: Uuid) {
        self.state().touched_contracts.insert(contract);
    }

    pub fn touched_contracts(&self) -> Vec<Uuid> {
        self.state().touched_contracts.iter().copied().collect()
    }
}

#[cfg(test)]
impl SyncContext {
    /// Context over in-memory collaborators, dated 2024-06-15.
    pub(crate) fn for_tests(config: SyncConfig) -> Self {
        Self::new(
            config,
            Arc::new(idm_connector::InMemoryConnector::new("test")),
            IdmStore::in_memory(),
            SyncServices::in_memory(),
            Arc::new(crate::script::RhaiScriptEvaluator::new()),
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap_or_default(),
        )
    }
}
