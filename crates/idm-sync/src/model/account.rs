use idm_core::SystemId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::{criterion, Record};
use crate::types::EntityKind;

/// An account on an external system, known by its UID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub system: SystemId,
    pub uid: String,
    /// Kind of entity the account belongs to.
    pub kind: EntityKind,
}

impl Account {
    pub fn new(system: SystemId, uid: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            system,
            uid: uid.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AccountFilter {
    pub system: Option<SystemId>,
    pub uid: Option<String>,
    pub kind: Option<EntityKind>,
}

impl AccountFilter {
    pub fn of_system(system: SystemId, kind: EntityKind) -> Self {
        Self {
            system: Some(system),
            uid: None,
            kind: Some(kind),
        }
    }
}

impl Record for Account {
    type Filter = AccountFilter;
    const NAME: &'static str = "Account";

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &AccountFilter) -> bool {
        criterion(&filter.system, &self.system)
            && criterion(&filter.uid, &self.uid)
            && criterion(&filter.kind, &self.kind)
    }
}

/// Join between a local entity and an account.
///
/// One join type covers identity, contract, slice, tree, catalogue and role
/// accounts; `kind` names the entity side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityAccount {
    pub id: Uuid,
    pub account: Uuid,
    pub entity: Uuid,
    pub kind: EntityKind,
    /// The entity owns the account lifecycle.
    pub ownership: bool,
}

impl EntityAccount {
    pub fn new(account: Uuid, entity: Uuid, kind: EntityKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            account,
            entity,
            kind,
            ownership: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntityAccountFilter {
    pub account: Option<Uuid>,
    pub entity: Option<Uuid>,
    pub kind: Option<EntityKind>,
}

impl Record for EntityAccount {
    type Filter = EntityAccountFilter;
    const NAME: &'static str = "EntityAccount";

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &EntityAccountFilter) -> bool {
        criterion(&filter.account, &self.account)
            && criterion(&filter.entity, &self.entity)
            && criterion(&filter.kind, &self.kind)
    }
}
