//! Collaborator services the engine calls besides the repositories.
//!
//! Each service is a trait with an in-memory implementation usable by tests
//! and embedders.

use async_trait::async_trait;
use idm_core::{IdmError, IdmResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::EntityKind;
use crate::value::values_equal;

/// Configuration key of the connector page size.
pub const PROPERTY_SYNC_PAGE_SIZE: &str = "idm.sec.acc.sync.page-size";

/// Configuration key of the default organization tree type.
pub const PROPERTY_DEFAULT_TREE_TYPE: &str = "idm.sec.core.tree.default-type";

// ── Forms (EAV) ───────────────────────────────────────────────────────────

/// Owner of extended attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormOwner {
    pub kind: EntityKind,
    pub id: Uuid,
}

impl FormOwner {
    pub fn new(kind: EntityKind, id: Uuid) -> Self {
        Self { kind, id }
    }
}

/// Form definition holding extended attributes of one entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormDefinition {
    pub kind: EntityKind,
    pub code: String,
}

impl FormDefinition {
    /// Main definition of an entity kind.
    pub fn main(kind: EntityKind) -> Self {
        Self {
            kind,
            code: "default".to_string(),
        }
    }
}

/// Extended attribute values.
#[async_trait]
pub trait FormService: Send + Sync {
    /// All values of an owner in a definition, keyed by attribute code.
    async fn get_values(
        &self,
        owner: FormOwner,
        definition: &FormDefinition,
    ) -> IdmResult<BTreeMap<String, Value>>;

    /// Save the given attribute values. Other attributes are kept; null removes a value.
    async fn save_values(
        &self,
        owner: FormOwner,
        definition: &FormDefinition,
        values: BTreeMap<String, Value>,
    ) -> IdmResult<()>;

    /// Owners of the given kind whose attribute equals the value.
    async fn find_owners(
        &self,
        kind: EntityKind,
        definition: &FormDefinition,
        code: &str,
        value: &Value,
    ) -> IdmResult<Vec<Uuid>>;
}

type FormKey = (FormOwner, FormDefinition);

#[derive(Debug, Default)]
pub struct InMemoryFormService {
    values: RwLock<HashMap<FormKey, BTreeMap<String, Value>>>,
}

impl InMemoryFormService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FormService for InMemoryFormService {
    async fn get_values(
        &self,
        owner: FormOwner,
        definition: &FormDefinition,
    ) -> IdmResult<BTreeMap<String, Value>> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Ok(values
            .get(&(owner, definition.clone()))
            .cloned()
            .unwrap_or_default())
    }

    async fn save_values(
        &self,
        owner: FormOwner,
        definition: &FormDefinition,
        values: BTreeMap<String, Value>,
    ) -> IdmResult<()> {
        let mut stored = self.values.write().unwrap_or_else(PoisonError::into_inner);
        let entry = stored.entry((owner, definition.clone())).or_default();
        for (code, value) in values {
            if value.is_null() {
                entry.remove(&code);
            } else {
                entry.insert(code, value);
            }
        }
        Ok(())
    }

    async fn find_owners(
        &self,
        kind: EntityKind,
        definition: &FormDefinition,
        code: &str,
        value: &Value,
    ) -> IdmResult<Vec<Uuid>> {
        let stored = self.values.read().unwrap_or_else(PoisonError::into_inner);
        let mut owners: Vec<Uuid> = stored
            .iter()
            .filter(|((owner, def), _)| owner.kind == kind && def == definition)
            .filter(|(_, values)| values.get(code).is_some_and(|v| values_equal(v, value)))
            .map(|((owner, _), _)| owner.id)
            .collect();
        owners.sort();
        Ok(owners)
    }
}

// ── Configuration properties ──────────────────────────────────────────────

/// Runtime configuration properties addressed by dotted keys.
#[async_trait]
pub trait ConfigurationService: Send + Sync {
    async fn get_value(&self, key: &str) -> IdmResult<Option<String>>;

    async fn set_value(&self, key: &str, value: &str) -> IdmResult<()>;

    async fn get_bool(&self, key: &str) -> IdmResult<Option<bool>> {
        match self.get_value(key).await? {
            None => Ok(None),
            Some(v) => v
                .trim()
                .parse::<bool>()
                .map(Some)
                .map_err(|_| IdmError::validation(key, format!("'{v}' is not a boolean"))),
        }
    }

    async fn get_uuid(&self, key: &str) -> IdmResult<Option<Uuid>> {
        match self.get_value(key).await? {
            None => Ok(None),
            Some(v) => Uuid::parse_str(v.trim())
                .map(Some)
                .map_err(|_| IdmError::validation(key, format!("'{v}' is not a UUID"))),
        }
    }

    async fn get_u32(&self, key: &str) -> IdmResult<Option<u32>> {
        match self.get_value(key).await? {
            None => Ok(None),
            Some(v) => v
                .trim()
                .parse::<u32>()
                .map(Some)
                .map_err(|_| IdmError::validation(key, format!("'{v}' is not a number"))),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryConfigurationService {
    properties: RwLock<HashMap<String, String>>,
}

impl InMemoryConfigurationService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigurationService for InMemoryConfigurationService {
    async fn get_value(&self, key: &str) -> IdmResult<Option<String>> {
        let properties = self.properties.read().unwrap_or_else(PoisonError::into_inner);
        Ok(properties.get(key).cloned())
    }

    async fn set_value(&self, key: &str, value: &str) -> IdmResult<()> {
        let mut properties = self.properties.write().unwrap_or_else(PoisonError::into_inner);
        properties.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ── Workflows ─────────────────────────────────────────────────────────────

/// Workflow engine. Fire and forget from the engine's perspective.
#[async_trait]
pub trait WorkflowService: Send + Sync {
    /// Start a process instance, returning its id.
    async fn start_process(&self, definition_key: &str, variables: Value) -> IdmResult<String>;
}

/// A started process, as recorded by [`InMemoryWorkflowService`].
#[derive(Debug, Clone, PartialEq)]
pub struct StartedProcess {
    pub id: String,
    pub definition_key: String,
    pub variables: Value,
}

#[derive(Debug, Default)]
pub struct InMemoryWorkflowService {
    started: RwLock<Vec<StartedProcess>>,
}

impl InMemoryWorkflowService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&self) -> Vec<StartedProcess> {
        self.started
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl WorkflowService for InMemoryWorkflowService {
    async fn start_process(&self, definition_key: &str, variables: Value) -> IdmResult<String> {
        let id = Uuid::new_v4().to_string();
        info!(definition_key = %definition_key, process_id = %id, "Workflow process started");
        let mut started = self.started.write().unwrap_or_else(PoisonError::into_inner);
        started.push(StartedProcess {
            id: id.clone(),
            definition_key: definition_key.to_string(),
            variables,
        });
        Ok(id)
    }
}

// ── Automatic roles ───────────────────────────────────────────────────────

/// Attribute-based automatic role evaluation.
#[async_trait]
pub trait AutomaticRoleService: Send + Sync {
    async fn recalculate(&self, identity: Uuid) -> IdmResult<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryAutomaticRoleService {
    recalculated: RwLock<Vec<Uuid>>,
}

impl InMemoryAutomaticRoleService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identities recalculated so far, in call order.
    pub fn recalculated(&self) -> Vec<Uuid> {
        self.recalculated
            .read()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AutomaticRoleService for InMemoryAutomaticRoleService {
    async fn recalculate(&self, identity: Uuid) -> IdmResult<()> {
        debug!(identity = %identity, "Automatic roles recalculated");
        let mut recalculated = self
            .recalculated
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        recalculated.push(identity);
        Ok(())
    }
}

// ── HR processes ──────────────────────────────────────────────────────────

/// HR process run as a long-running task over contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HrProcess {
    /// Enable contracts that became valid.
    Enable,
    /// Disable contracts that ended or were disabled.
    Disable,
    /// Handle contracts entering or leaving exclusion.
    Exclusion,
}

impl HrProcess {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            HrProcess::Enable => "enable",
            HrProcess::Disable => "disable",
            HrProcess::Exclusion => "exclusion",
        }
    }

    /// All processes in execution order.
    #[must_use]
    pub fn all() -> [HrProcess; 3] {
        [HrProcess::Enable, HrProcess::Disable, HrProcess::Exclusion]
    }
}

/// An HR task scheduled after a synchronization batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HrTask {
    pub process: HrProcess,
    pub contracts: Vec<Uuid>,
}

/// Scheduler of long-running tasks.
#[async_trait]
pub trait LongRunningTaskScheduler: Send + Sync {
    async fn schedule(&self, task: HrTask) -> IdmResult<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryTaskScheduler {
    scheduled: RwLock<Vec<HrTask>>,
}

impl InMemoryTaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduled(&self) -> Vec<HrTask> {
        self.scheduled
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LongRunningTaskScheduler for InMemoryTaskScheduler {
    async fn schedule(&self, task: HrTask) -> IdmResult<()> {
        info!(
            process = task.process.as_str(),
            contracts = task.contracts.len(),
            "HR task scheduled"
        );
        let mut scheduled = self.scheduled.write().unwrap_or_else(PoisonError::into_inner);
        scheduled.push(task);
        Ok(())
    }
}

/// Collaborator services bundle.
#[derive(Clone)]
pub struct SyncServices {
    pub forms: Arc<dyn FormService>,
    pub configuration: Arc<dyn ConfigurationService>,
    pub workflows: Arc<dyn WorkflowService>,
    pub automatic_roles: Arc<dyn AutomaticRoleService>,
    pub scheduler: Arc<dyn LongRunningTaskScheduler>,
}

impl SyncServices {
    /// Services backed by the in-memory implementations.
    pub fn in_memory() -> Self {
        Self {
            forms: Arc::new(InMemoryFormService::new()),
            configuration: Arc::new(InMemoryConfigurationService::new()),
            workflows: Arc::new(InMemoryWorkflowService::new()),
            automatic_roles: Arc::new(InMemoryAutomaticRoleService::new()),
            scheduler: Arc::new(InMemoryTaskScheduler::new()),
        }
    }
}
