use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::store::{criterion, FieldMatch, Record, SyncEntity};
use crate::types::{EntityField, EntityKind};
use crate::value::from_string;

/// A person managed by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub description: Option<String>,
    pub disabled: bool,
    pub external_id: Option<String>,
}

impl Identity {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            first_name: None,
            last_name: None,
            email: None,
            phone: None,
            description: None,
            disabled: false,
            external_id: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IdentityFilter {
    pub username: Option<String>,
    pub field: Option<FieldMatch>,
}

impl IdentityFilter {
    pub fn by_username(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Self::default()
        }
    }
}

impl Record for Identity {
    type Filter = IdentityFilter;
    const NAME: &'static str = "Identity";

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &IdentityFilter) -> bool {
        criterion(&filter.username, &self.username)
            && filter.field.as_ref().map_or(true, |f| f.matches(self))
    }
}

impl SyncEntity for Identity {
    const KIND: EntityKind = EntityKind::Identity;

    fn field(&self, field: EntityField) -> Value {
        match field {
            EntityField::Username => Value::String(self.username.clone()),
            EntityField::FirstName => from_string(self.first_name.as_deref()),
            EntityField::LastName => from_string(self.last_name.as_deref()),
            EntityField::Email => from_string(self.email.as_deref()),
            EntityField::Phone => from_string(self.phone.as_deref()),
            EntityField::Description => from_string(self.description.as_deref()),
            EntityField::Disabled => Value::Bool(self.disabled),
            EntityField::ExternalId => from_string(self.external_id.as_deref()),
            _ => Value::Null,
        }
    }

    fn display_name(&self) -> String {
        self.username.clone()
    }

    fn filter_by(field: FieldMatch) -> IdentityFilter {
        IdentityFilter {
            field: Some(field),
            ..IdentityFilter::default()
        }
    }
}
