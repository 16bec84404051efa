use chrono::NaiveDate;
use idm_core::SystemId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::store::{criterion, FieldMatch, Record, SyncEntity};
use crate::types::{EntityField, EntityKind};
use crate::value::{from_string, from_uuid};

/// A role that can be assigned to identities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub disabled: bool,
    pub external_id: Option<String>,
}

impl Role {
    pub fn new(code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            id: Uuid::new_v4(),
            name: code.clone(),
            code,
            description: None,
            disabled: false,
            external_id: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoleFilter {
    pub code: Option<String>,
    pub field: Option<FieldMatch>,
}

impl Record for Role {
    type Filter = RoleFilter;
    const NAME: &'static str = "Role";

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &RoleFilter) -> bool {
        criterion(&filter.code, &self.code)
            && filter.field.as_ref().map_or(true, |f| f.matches(self))
    }
}

impl SyncEntity for Role {
    const KIND: EntityKind = EntityKind::Role;

    fn field(&self, field: EntityField) -> Value {
        match field {
            EntityField::Code => Value::String(self.code.clone()),
            EntityField::Name => Value::String(self.name.clone()),
            EntityField::Description => from_string(self.description.as_deref()),
            EntityField::Disabled => Value::Bool(self.disabled),
            EntityField::ExternalId => from_string(self.external_id.as_deref()),
            _ => Value::Null,
        }
    }

    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn filter_by(field: FieldMatch) -> RoleFilter {
        RoleFilter {
            field: Some(field),
            ..RoleFilter::default()
        }
    }
}

/// Folder of the role catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleCatalogue {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub parent: Option<Uuid>,
    pub description: Option<String>,
    pub external_id: Option<String>,
}

impl RoleCatalogue {
    pub fn new(code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            id: Uuid::new_v4(),
            name: code.clone(),
            code,
            parent: None,
            description: None,
            external_id: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoleCatalogueFilter {
    pub parent: Option<Uuid>,
    /// Only folders without a parent.
    pub roots_only: bool,
    pub code: Option<String>,
    pub field: Option<FieldMatch>,
}

impl Record for RoleCatalogue {
    type Filter = RoleCatalogueFilter;
    const NAME: &'static str = "RoleCatalogue";

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &RoleCatalogueFilter) -> bool {
        filter.parent.map_or(true, |p| self.parent == Some(p))
            && (!filter.roots_only || self.parent.is_none())
            && criterion(&filter.code, &self.code)
            && filter.field.as_ref().map_or(true, |f| f.matches(self))
    }
}

impl SyncEntity for RoleCatalogue {
    const KIND: EntityKind = EntityKind::RoleCatalogue;

    fn field(&self, field: EntityField) -> Value {
        match field {
            EntityField::Code => Value::String(self.code.clone()),
            EntityField::Name => Value::String(self.name.clone()),
            EntityField::Parent => from_uuid(self.parent),
            EntityField::Description => from_string(self.description.as_deref()),
            EntityField::ExternalId => from_string(self.external_id.as_deref()),
            _ => Value::Null,
        }
    }

    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn filter_by(field: FieldMatch) -> RoleCatalogueFilter {
        RoleCatalogueFilter {
            field: Some(field),
            ..RoleCatalogueFilter::default()
        }
    }
}

/// Placement of a role in a catalogue folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleCatalogueRole {
    pub id: Uuid,
    pub role: Uuid,
    pub catalogue: Uuid,
}

impl RoleCatalogueRole {
    pub fn new(role: Uuid, catalogue: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            catalogue,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoleCatalogueRoleFilter {
    pub role: Option<Uuid>,
    pub catalogue: Option<Uuid>,
}

impl Record for RoleCatalogueRole {
    type Filter = RoleCatalogueRoleFilter;
    const NAME: &'static str = "RoleCatalogueRole";

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &RoleCatalogueRoleFilter) -> bool {
        criterion(&filter.role, &self.role) && criterion(&filter.catalogue, &self.catalogue)
    }
}

/// Role assigned to an identity through one of its contracts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRole {
    pub id: Uuid,
    pub identity: Uuid,
    pub contract: Uuid,
    pub role: Uuid,
    pub valid_from: Option<NaiveDate>,
    pub valid_till: Option<NaiveDate>,
    /// Assigned by automatic-role rules rather than directly.
    pub automatic: bool,
}

impl IdentityRole {
    pub fn new(identity: Uuid, contract: Uuid, role: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
            contract,
            role,
            valid_from: None,
            valid_till: None,
            automatic: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IdentityRoleFilter {
    pub identity: Option<Uuid>,
    pub contract: Option<Uuid>,
    pub role: Option<Uuid>,
}

impl Record for IdentityRole {
    type Filter = IdentityRoleFilter;
    const NAME: &'static str = "IdentityRole";

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &IdentityRoleFilter) -> bool {
        criterion(&filter.identity, &self.identity)
            && criterion(&filter.contract, &self.contract)
            && criterion(&filter.role, &self.role)
    }
}

/// Role provisioned to a system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleSystem {
    pub id: Uuid,
    pub role: Uuid,
    pub system: SystemId,
}

impl RoleSystem {
    pub fn new(role: Uuid, system: SystemId) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            system,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoleSystemFilter {
    pub role: Option<Uuid>,
    pub system: Option<SystemId>,
}

impl Record for RoleSystem {
    type Filter = RoleSystemFilter;
    const NAME: &'static str = "RoleSystem";

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &RoleSystemFilter) -> bool {
        criterion(&filter.role, &self.role) && criterion(&filter.system, &self.system)
    }
}

/// Attribute a role contributes to accounts on its system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleSystemAttribute {
    pub id: Uuid,
    pub role_system: Uuid,
    /// Schema attribute on the target system.
    pub name: String,
    pub value: String,
    /// Values of all roles are merged into one multi-valued attribute.
    pub merge_value: bool,
}

impl RoleSystemAttribute {
    pub fn new(role_system: Uuid, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role_system,
            name: name.into(),
            value: value.into(),
            merge_value: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoleSystemAttributeFilter {
    pub role_system: Option<Uuid>,
    pub name: Option<String>,
}

impl Record for RoleSystemAttribute {
    type Filter = RoleSystemAttributeFilter;
    const NAME: &'static str = "RoleSystemAttribute";

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &RoleSystemAttributeFilter) -> bool {
        criterion(&filter.role_system, &self.role_system) && criterion(&filter.name, &self.name)
    }
}
