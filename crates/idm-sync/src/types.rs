//! Common types for synchronization.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of local entity a synchronization configuration targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Identity,
    Contract,
    ContractSlice,
    Tree,
    RoleCatalogue,
    Role,
}

impl EntityKind {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Identity => "identity",
            EntityKind::Contract => "contract",
            EntityKind::ContractSlice => "contract_slice",
            EntityKind::Tree => "tree",
            EntityKind::RoleCatalogue => "role_catalogue",
            EntityKind::Role => "role",
        }
    }

    /// Entity fields a mapping of this kind may target.
    #[must_use]
    pub fn fields(&self) -> &'static [EntityField] {
        use EntityField::*;
        match self {
            EntityKind::Identity => &[
                Username,
                FirstName,
                LastName,
                Email,
                Phone,
                Description,
                Disabled,
                ExternalId,
            ],
            EntityKind::Contract => &[
                Identity,
                Position,
                WorkPosition,
                Main,
                ValidFrom,
                ValidTill,
                State,
                Guarantees,
                Description,
                ExternalId,
            ],
            EntityKind::ContractSlice => &[
                Identity,
                Position,
                WorkPosition,
                Main,
                ValidFrom,
                ValidTill,
                State,
                Guarantees,
                Description,
                ExternalId,
                ContractCode,
            ],
            EntityKind::Tree => &[Code, Name, Parent, Disabled, ExternalId],
            EntityKind::RoleCatalogue => &[Code, Name, Parent, Description, ExternalId],
            EntityKind::Role => &[Code, Name, Description, Disabled, ExternalId],
        }
    }

    /// Check whether the kind carries the given field.
    #[must_use]
    pub fn supports(&self, field: EntityField) -> bool {
        self.fields().contains(&field)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "identity" => Ok(EntityKind::Identity),
            "contract" => Ok(EntityKind::Contract),
            "contract_slice" => Ok(EntityKind::ContractSlice),
            "tree" => Ok(EntityKind::Tree),
            "role_catalogue" => Ok(EntityKind::RoleCatalogue),
            "role" => Ok(EntityKind::Role),
            _ => Err(format!("Unknown entity kind: {s}")),
        }
    }
}

/// A persisted field of a local entity, addressed without reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityField {
    Username,
    FirstName,
    LastName,
    Email,
    Phone,
    Description,
    Disabled,
    ExternalId,
    /// Owner identity of a contract or slice (username or id).
    Identity,
    Position,
    /// Tree node of the work position (code or id).
    WorkPosition,
    Main,
    ValidFrom,
    ValidTill,
    State,
    /// Guarantees (leaders) of a contract or slice (usernames or ids).
    Guarantees,
    /// Code grouping slices of one contract.
    ContractCode,
    Code,
    Name,
    /// Parent node or catalogue (account UID or id).
    Parent,
}

impl EntityField {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityField::Username => "username",
            EntityField::FirstName => "first_name",
            EntityField::LastName => "last_name",
            EntityField::Email => "email",
            EntityField::Phone => "phone",
            EntityField::Description => "description",
            EntityField::Disabled => "disabled",
            EntityField::ExternalId => "external_id",
            EntityField::Identity => "identity",
            EntityField::Position => "position",
            EntityField::WorkPosition => "work_position",
            EntityField::Main => "main",
            EntityField::ValidFrom => "valid_from",
            EntityField::ValidTill => "valid_till",
            EntityField::State => "state",
            EntityField::Guarantees => "guarantees",
            EntityField::ContractCode => "contract_code",
            EntityField::Code => "code",
            EntityField::Name => "name",
            EntityField::Parent => "parent",
        }
    }
}

impl fmt::Display for EntityField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Target of an attribute mapping: an entity field or an extended (EAV) attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "snake_case")]
pub enum FieldRef {
    Entity(EntityField),
    Extended(String),
}

impl FieldRef {
    /// Check if the target is an extended attribute.
    #[must_use]
    pub fn is_extended(&self) -> bool {
        matches!(self, FieldRef::Extended(_))
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldRef::Entity(field) => write!(f, "{field}"),
            FieldRef::Extended(code) => write!(f, "eav:{code}"),
        }
    }
}

/// Relationship of a connector object (or local entity) to the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncSituation {
    /// Entity found and linked through an account.
    Linked,
    /// Entity found by correlation but not linked.
    Unlinked,
    /// No local entity for the connector object.
    MissingEntity,
    /// Linked local entity without a live connector object.
    MissingAccount,
}

impl SyncSituation {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncSituation::Linked => "linked",
            SyncSituation::Unlinked => "unlinked",
            SyncSituation::MissingEntity => "missing_entity",
            SyncSituation::MissingAccount => "missing_account",
        }
    }

    /// Action type under which an IGNORE decision of this situation is logged.
    #[must_use]
    pub fn action_type(&self) -> SyncActionType {
        match self {
            SyncSituation::Linked => SyncActionType::Linked,
            SyncSituation::Unlinked => SyncActionType::Unlinked,
            SyncSituation::MissingEntity => SyncActionType::MissingEntity,
            SyncSituation::MissingAccount => SyncActionType::MissingAccount,
        }
    }
}

impl fmt::Display for SyncSituation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Action type of a synchronization item, also the grouping key of action logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncActionType {
    CreateEntity,
    UpdateEntity,
    DeleteEntity,
    Link,
    LinkAndUpdateEntity,
    LinkAndUpdateAccount,
    UpdateAccount,
    Unlink,
    Ignore,
    Linked,
    Unlinked,
    MissingEntity,
    MissingAccount,
    /// The item failed before an action was decided.
    Unknown,
}

impl SyncActionType {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncActionType::CreateEntity => "CREATE_ENTITY",
            SyncActionType::UpdateEntity => "UPDATE_ENTITY",
            SyncActionType::DeleteEntity => "DELETE_ENTITY",
            SyncActionType::Link => "LINK",
            SyncActionType::LinkAndUpdateEntity => "LINK_AND_UPDATE_ENTITY",
            SyncActionType::LinkAndUpdateAccount => "LINK_AND_UPDATE_ACCOUNT",
            SyncActionType::UpdateAccount => "UPDATE_ACCOUNT",
            SyncActionType::Unlink => "UNLINK",
            SyncActionType::Ignore => "IGNORE",
            SyncActionType::Linked => "LINKED",
            SyncActionType::Unlinked => "UNLINKED",
            SyncActionType::MissingEntity => "MISSING_ENTITY",
            SyncActionType::MissingAccount => "MISSING_ACCOUNT",
            SyncActionType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for SyncActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SyncActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CREATE_ENTITY" => Ok(SyncActionType::CreateEntity),
            "UPDATE_ENTITY" => Ok(SyncActionType::UpdateEntity),
            "DELETE_ENTITY" => Ok(SyncActionType::DeleteEntity),
            "LINK" => Ok(SyncActionType::Link),
            "LINK_AND_UPDATE_ENTITY" => Ok(SyncActionType::LinkAndUpdateEntity),
            "LINK_AND_UPDATE_ACCOUNT" => Ok(SyncActionType::LinkAndUpdateAccount),
            "UPDATE_ACCOUNT" => Ok(SyncActionType::UpdateAccount),
            "UNLINK" => Ok(SyncActionType::Unlink),
            "IGNORE" => Ok(SyncActionType::Ignore),
            "LINKED" => Ok(SyncActionType::Linked),
            "UNLINKED" => Ok(SyncActionType::Unlinked),
            "MISSING_ENTITY" => Ok(SyncActionType::MissingEntity),
            "MISSING_ACCOUNT" => Ok(SyncActionType::MissingAccount),
            "UNKNOWN" => Ok(SyncActionType::Unknown),
            _ => Err(format!("Unknown sync action type: {s}")),
        }
    }
}

/// Outcome of one item, and the aggregate outcome of an action log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationResult {
    Success,
    Warning,
    Error,
    Ignore,
    /// Delegated to a workflow process.
    Wf,
}

impl OperationResult {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationResult::Success => "SUCCESS",
            OperationResult::Warning => "WARNING",
            OperationResult::Error => "ERROR",
            OperationResult::Ignore => "IGNORE",
            OperationResult::Wf => "WF",
        }
    }

    /// Severity rank: ERROR > WARNING > WF > SUCCESS > IGNORE.
    #[must_use]
    pub fn severity(&self) -> u8 {
        match self {
            OperationResult::Ignore => 0,
            OperationResult::Success => 1,
            OperationResult::Wf => 2,
            OperationResult::Warning => 3,
            OperationResult::Error => 4,
        }
    }

    /// The more severe of two results.
    #[must_use]
    pub fn merge(self, other: OperationResult) -> OperationResult {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    /// Check if this is an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, OperationResult::Error)
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OperationResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SUCCESS" => Ok(OperationResult::Success),
            "WARNING" => Ok(OperationResult::Warning),
            "ERROR" => Ok(OperationResult::Error),
            "IGNORE" => Ok(OperationResult::Ignore),
            "WF" => Ok(OperationResult::Wf),
            _ => Err(format!("Unknown operation result: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_roundtrip() {
        for kind in [
            EntityKind::Identity,
            EntityKind::Contract,
            EntityKind::ContractSlice,
            EntityKind::Tree,
            EntityKind::RoleCatalogue,
            EntityKind::Role,
        ] {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
        assert!("account".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_kind_supports_fields() {
        assert!(EntityKind::ContractSlice.supports(EntityField::ContractCode));
        assert!(!EntityKind::Contract.supports(EntityField::ContractCode));
        assert!(EntityKind::Tree.supports(EntityField::Parent));
        assert!(!EntityKind::Role.supports(EntityField::Parent));
    }

    #[test]
    fn test_result_merge_follows_severity() {
        use OperationResult::*;
        assert_eq!(Ignore.merge(Success), Success);
        assert_eq!(Success.merge(Wf), Wf);
        assert_eq!(Wf.merge(Warning), Warning);
        assert_eq!(Warning.merge(Error), Error);
        assert_eq!(Error.merge(Ignore), Error);
    }

    #[test]
    fn test_situation_action_type() {
        assert_eq!(
            SyncSituation::MissingEntity.action_type(),
            SyncActionType::MissingEntity
        );
        assert_eq!(
            "link_and_update_entity".parse::<SyncActionType>().unwrap(),
            SyncActionType::LinkAndUpdateEntity
        );
    }

    #[test]
    fn test_field_ref_serde() {
        let json = serde_json::to_value(FieldRef::Entity(EntityField::WorkPosition)).unwrap();
        assert_eq!(json["type"], "entity");
        assert_eq!(json["name"], "work_position");

        let back: FieldRef =
            serde_json::from_value(serde_json::json!({"type": "extended", "name": "dept"}))
                .unwrap();
        assert_eq!(back, FieldRef::Extended("dept".to_string()));
    }
}
