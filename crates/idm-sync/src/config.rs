//! Synchronization configuration.
//!
//! One [`SyncConfig`] per system, entity kind and mapping. Kind-specific
//! options live in [`SyncKindConfig`].

use async_trait::async_trait;
use idm_connector::Filter;
use idm_core::{IdmResult, SyncConfigId, SystemId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::mapping::AttributeMapping;
use crate::types::{EntityKind, FieldRef, SyncActionType};

/// Action for a LINKED connector object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkedAction {
    UpdateEntity,
    UpdateAccount,
    Unlink,
    Ignore,
}

/// Action for an UNLINKED connector object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnlinkedAction {
    Link,
    LinkAndUpdateEntity,
    LinkAndUpdateAccount,
    Unlink,
    Ignore,
}

/// Action for a connector object without a local entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissingEntityAction {
    CreateEntity,
    Ignore,
}

/// Action for a linked entity whose connector object disappeared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissingAccountAction {
    DeleteEntity,
    Unlink,
    Ignore,
}

impl LinkedAction {
    #[must_use]
    pub fn action_type(&self) -> SyncActionType {
        match self {
            LinkedAction::UpdateEntity => SyncActionType::UpdateEntity,
            LinkedAction::UpdateAccount => SyncActionType::UpdateAccount,
            LinkedAction::Unlink => SyncActionType::Unlink,
            LinkedAction::Ignore => SyncActionType::Ignore,
        }
    }
}

impl UnlinkedAction {
    #[must_use]
    pub fn action_type(&self) -> SyncActionType {
        match self {
            UnlinkedAction::Link => SyncActionType::Link,
            UnlinkedAction::LinkAndUpdateEntity => SyncActionType::LinkAndUpdateEntity,
            UnlinkedAction::LinkAndUpdateAccount => SyncActionType::LinkAndUpdateAccount,
            UnlinkedAction::Unlink => SyncActionType::Unlink,
            UnlinkedAction::Ignore => SyncActionType::Ignore,
        }
    }
}

impl MissingEntityAction {
    #[must_use]
    pub fn action_type(&self) -> SyncActionType {
        match self {
            MissingEntityAction::CreateEntity => SyncActionType::CreateEntity,
            MissingEntityAction::Ignore => SyncActionType::Ignore,
        }
    }
}

impl MissingAccountAction {
    #[must_use]
    pub fn action_type(&self) -> SyncActionType {
        match self {
            MissingAccountAction::DeleteEntity => SyncActionType::DeleteEntity,
            MissingAccountAction::Unlink => SyncActionType::Unlink,
            MissingAccountAction::Ignore => SyncActionType::Ignore,
        }
    }
}

macro_rules! display_via_action_type {
    ($($name:ty),*) => {
        $(impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.action_type())
            }
        })*
    };
}

display_via_action_type!(LinkedAction, UnlinkedAction, MissingEntityAction, MissingAccountAction);

/// Action of one situation plus an optional workflow routing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasePolicy<A> {
    pub action: A,
    /// Workflow definition started instead of applying the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_key: Option<String>,
}

impl<A> CasePolicy<A> {
    pub fn new(action: A) -> Self {
        Self {
            action,
            workflow_key: None,
        }
    }

    #[must_use]
    pub fn with_workflow(mut self, key: impl Into<String>) -> Self {
        self.workflow_key = Some(key.into());
        self
    }
}

/// Options of identity synchronization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySyncOptions {
    /// Role granted on the prime contract of linked or updated identities.
    #[serde(default)]
    pub default_role: Option<Uuid>,
    /// Recalculate automatic roles after each identity.
    #[serde(default)]
    pub start_auto_role_rec: bool,
}

/// Options shared by contract and contract-slice synchronization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSyncOptions {
    /// Leader used when the mapped leader is absent or unknown.
    #[serde(default)]
    pub default_leader: Option<Uuid>,
    /// Tree type in which work positions are resolved by code.
    #[serde(default)]
    pub default_tree_type: Option<Uuid>,
    /// Work position used when the mapped one is absent or unknown.
    #[serde(default)]
    pub default_tree_node: Option<Uuid>,
}

/// Options of organization tree synchronization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSyncOptions {
    /// Tree type receiving the nodes; falls back to the configured default type.
    #[serde(default)]
    pub tree_type: Option<Uuid>,
    #[serde(default)]
    pub roots_filter_script: Option<String>,
}

/// Options of role catalogue synchronization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogueSyncOptions {
    #[serde(default)]
    pub roots_filter_script: Option<String>,
}

/// Options of role synchronization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSyncOptions {
    /// Connector attribute holding a DN-like path of catalogue folders.
    #[serde(default)]
    pub catalogue_attribute: Option<String>,
    /// Folder under which derived catalogue folders are created.
    #[serde(default)]
    pub catalogue_root: Option<Uuid>,
    /// Put every role into this folder instead of deriving folders.
    #[serde(default)]
    pub all_to_one_catalogue: Option<Uuid>,
    /// Remove catalogue links the synchronized placement no longer implies.
    #[serde(default)]
    pub remove_catalogue_links: bool,
    /// Connector attribute listing role members.
    #[serde(default)]
    pub members_attribute: Option<String>,
    /// Identity extended attribute matched against member values.
    #[serde(default)]
    pub member_identifier_attribute: Option<String>,
    /// Remove direct assignments of members no longer listed.
    #[serde(default)]
    pub remove_members: bool,
    /// Provisioning system receiving a role-system mapping.
    #[serde(default)]
    pub forward_to_system: Option<SystemId>,
    /// Schema attribute on the provisioning system carrying the role code.
    #[serde(default)]
    pub forward_attribute: Option<String>,
}

/// Kind-specific part of a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncKindConfig {
    Identity(IdentitySyncOptions),
    Contract(ContractSyncOptions),
    ContractSlice(ContractSyncOptions),
    Tree(TreeSyncOptions),
    RoleCatalogue(CatalogueSyncOptions),
    Role(RoleSyncOptions),
}

impl SyncKindConfig {
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            SyncKindConfig::Identity(_) => EntityKind::Identity,
            SyncKindConfig::Contract(_) => EntityKind::Contract,
            SyncKindConfig::ContractSlice(_) => EntityKind::ContractSlice,
            SyncKindConfig::Tree(_) => EntityKind::Tree,
            SyncKindConfig::RoleCatalogue(_) => EntityKind::RoleCatalogue,
            SyncKindConfig::Role(_) => EntityKind::Role,
        }
    }

    /// Contract options of contract and slice configurations.
    #[must_use]
    pub fn contract_options(&self) -> Option<&ContractSyncOptions> {
        match self {
            SyncKindConfig::Contract(o) | SyncKindConfig::ContractSlice(o) => Some(o),
            _ => None,
        }
    }

    /// Roots filter of tree and catalogue configurations.
    #[must_use]
    pub fn roots_filter_script(&self) -> Option<&str> {
        match self {
            SyncKindConfig::Tree(o) => o.roots_filter_script.as_deref(),
            SyncKindConfig::RoleCatalogue(o) => o.roots_filter_script.as_deref(),
            _ => None,
        }
    }
}

/// Synchronization configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub id: SyncConfigId,
    pub name: String,
    pub system: SystemId,
    /// Object class searched on the connector.
    pub object_class: String,
    pub enabled: bool,
    pub mapping: Vec<AttributeMapping>,
    /// Schema attribute name of the mapping used for correlation.
    pub correlation_attribute: String,
    pub linked: CasePolicy<LinkedAction>,
    pub unlinked: CasePolicy<UnlinkedAction>,
    pub missing_entity: CasePolicy<MissingEntityAction>,
    pub missing_account: CasePolicy<MissingAccountAction>,
    /// Run the missing-account pass and link created entities.
    pub reconciliation: bool,
    /// Search with `filter` and the token condition instead of reading everything.
    pub custom_filter: bool,
    #[serde(default)]
    pub filter: Option<Filter>,
    /// Attribute whose greatest value is kept as the token.
    #[serde(default)]
    pub token_attribute: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    pub differential_sync: bool,
    /// Run slice recalculation and schedule HR processes.
    pub start_of_hr_processes: bool,
    pub kind: SyncKindConfig,
}

impl SyncConfig {
    /// Configuration with default policies: update linked, link unlinked,
    /// create missing entities, ignore missing accounts.
    pub fn new(
        name: impl Into<String>,
        system: SystemId,
        object_class: impl Into<String>,
        kind: SyncKindConfig,
        mapping: Vec<AttributeMapping>,
        correlation_attribute: impl Into<String>,
    ) -> Self {
        Self {
            id: SyncConfigId::new(),
            name: name.into(),
            system,
            object_class: object_class.into(),
            enabled: true,
            mapping,
            correlation_attribute: correlation_attribute.into(),
            linked: CasePolicy::new(LinkedAction::UpdateEntity),
            unlinked: CasePolicy::new(UnlinkedAction::Link),
            missing_entity: CasePolicy::new(MissingEntityAction::CreateEntity),
            missing_account: CasePolicy::new(MissingAccountAction::Ignore),
            reconciliation: false,
            custom_filter: false,
            filter: None,
            token_attribute: None,
            token: None,
            differential_sync: false,
            start_of_hr_processes: true,
            kind,
        }
    }

    #[must_use]
    pub fn entity_kind(&self) -> EntityKind {
        self.kind.kind()
    }

    #[must_use]
    pub fn with_linked(mut self, action: LinkedAction) -> Self {
        self.linked = CasePolicy::new(action);
        self
    }

    #[must_use]
    pub fn with_unlinked(mut self, action: UnlinkedAction) -> Self {
        self.unlinked = CasePolicy::new(action);
        self
    }

    #[must_use]
    pub fn with_missing_entity(mut self, action: MissingEntityAction) -> Self {
        self.missing_entity = CasePolicy::new(action);
        self
    }

    #[must_use]
    pub fn with_missing_account(mut self, action: MissingAccountAction) -> Self {
        self.missing_account = CasePolicy::new(action);
        self
    }

    #[must_use]
    pub fn with_reconciliation(mut self, reconciliation: bool) -> Self {
        self.reconciliation = reconciliation;
        self
    }

    #[must_use]
    pub fn with_differential_sync(mut self, differential: bool) -> Self {
        self.differential_sync = differential;
        self
    }

    #[must_use]
    pub fn with_start_of_hr_processes(mut self, start: bool) -> Self {
        self.start_of_hr_processes = start;
        self
    }

    /// Search with a custom filter and token attribute.
    #[must_use]
    pub fn with_custom_filter(mut self, filter: Option<Filter>, token_attribute: Option<String>) -> Self {
        self.custom_filter = true;
        self.filter = filter;
        self.token_attribute = token_attribute;
        self
    }

    /// The mapping used for correlation.
    #[must_use]
    pub fn correlation_mapping(&self) -> Option<&AttributeMapping> {
        self.mapping
            .iter()
            .find(|m| m.name == self.correlation_attribute)
    }

    /// Check the configuration before a run.
    pub fn validate(&self) -> SyncResult<()> {
        let kind = self.entity_kind();
        if self.mapping.is_empty() {
            return Err(SyncError::configuration("attribute mapping is empty"));
        }

        match self.mapping.iter().filter(|m| m.uid).count() {
            0 => return Err(SyncError::configuration("no UID attribute is mapped")),
            1 => {}
            n => {
                return Err(SyncError::configuration(format!(
                    "{n} attributes are mapped as UID, expected one"
                )))
            }
        }

        if self.correlation_attribute.is_empty() {
            return Err(SyncError::configuration("correlation attribute is not set"));
        }
        if self.correlation_mapping().is_none() {
            return Err(SyncError::configuration(format!(
                "correlation attribute '{}' is not mapped",
                self.correlation_attribute
            )));
        }

        let mut names = HashSet::new();
        for mapping in &self.mapping {
            if !names.insert(mapping.name.as_str()) {
                return Err(SyncError::configuration(format!(
                    "attribute '{}' is mapped twice",
                    mapping.name
                )));
            }
            if let FieldRef::Entity(field) = mapping.target {
                if !kind.supports(field) {
                    return Err(SyncError::configuration(format!(
                        "field '{field}' does not belong to {kind}"
                    )));
                }
            }
        }

        if self.reconciliation && self.custom_filter {
            return Err(SyncError::configuration(
                "reconciliation cannot be combined with a custom filter",
            ));
        }

        let workflow_keys = [
            &self.linked.workflow_key,
            &self.unlinked.workflow_key,
            &self.missing_entity.workflow_key,
            &self.missing_account.workflow_key,
        ];
        if workflow_keys
            .iter()
            .any(|k| k.as_ref().is_some_and(|k| k.trim().is_empty()))
        {
            return Err(SyncError::configuration("workflow key is empty"));
        }

        if let SyncKindConfig::Role(options) = &self.kind {
            if options.forward_attribute.is_some() && options.forward_to_system.is_none() {
                return Err(SyncError::configuration(
                    "forward attribute requires a forward system",
                ));
            }
            if options.members_attribute.is_some() && options.member_identifier_attribute.is_none()
            {
                return Err(SyncError::configuration(
                    "members attribute requires a member identifier attribute",
                ));
            }
        }

        Ok(())
    }
}

/// Storage of synchronization configurations.
#[async_trait]
pub trait SyncConfigStore: Send + Sync {
    async fn get(&self, id: SyncConfigId) -> IdmResult<Option<SyncConfig>>;

    async fn save(&self, config: SyncConfig) -> IdmResult<SyncConfig>;
}

#[derive(Debug, Default)]
pub struct InMemorySyncConfigStore {
    configs: RwLock<HashMap<SyncConfigId, SyncConfig>>,
}

impl InMemorySyncConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncConfigStore for InMemorySyncConfigStore {
    async fn get(&self, id: SyncConfigId) -> IdmResult<Option<SyncConfig>> {
        let configs = self.configs.read().unwrap_or_else(PoisonError::into_inner);
        Ok(configs.get(&id).cloned())
    }

    async fn save(&self, config: SyncConfig) -> IdmResult<SyncConfig> {
        let mut configs = self.configs.write().unwrap_or_else(PoisonError::into_inner);
        configs.insert(config.id, config.clone());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityField;

    fn contract_config() -> SyncConfig {
        SyncConfig::new(
            "hr contracts",
            SystemId::new(),
            "contract",
            SyncKindConfig::Contract(ContractSyncOptions::default()),
            vec![
                AttributeMapping::entity("id", EntityField::ExternalId).as_uid(),
                AttributeMapping::entity("name", EntityField::Position),
            ],
            "id",
        )
    }

    #[test]
    fn test_valid_config() {
        assert!(contract_config().validate().is_ok());
    }

    #[test]
    fn test_missing_uid_mapping_is_rejected() {
        let mut config = contract_config();
        config.mapping[0].uid = false;
        let err = config.validate().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("UID"));
    }

    #[test]
    fn test_unmapped_correlation_attribute_is_rejected() {
        let mut config = contract_config();
        config.correlation_attribute = "employee_no".to_string();
        assert!(config.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_field_of_other_kind_is_rejected() {
        let mut config = contract_config();
        config
            .mapping
            .push(AttributeMapping::entity("login", EntityField::Username));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("username"));
    }

    #[test]
    fn test_reconciliation_with_custom_filter_is_rejected() {
        let config = contract_config()
            .with_reconciliation(true)
            .with_custom_filter(None, Some("changed".to_string()));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_kind_config_serde_tag() {
        let json = serde_json::to_value(SyncKindConfig::Tree(TreeSyncOptions::default())).unwrap();
        assert_eq!(json["kind"], "tree");
        assert_eq!(
            SyncKindConfig::ContractSlice(ContractSyncOptions::default()).kind(),
            EntityKind::ContractSlice
        );
    }
}
