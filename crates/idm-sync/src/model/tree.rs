use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::store::{criterion, FieldMatch, Record, SyncEntity};
use crate::types::{EntityField, EntityKind};
use crate::value::{from_string, from_uuid};

/// Type (root container) of an organization tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeType {
    pub id: Uuid,
    pub code: String,
    pub name: String,
}

impl TreeType {
    pub fn new(code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            id: Uuid::new_v4(),
            name: code.clone(),
            code,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TreeTypeFilter {
    pub code: Option<String>,
}

impl Record for TreeType {
    type Filter = TreeTypeFilter;
    const NAME: &'static str = "TreeType";

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &TreeTypeFilter) -> bool {
        criterion(&filter.code, &self.code)
    }
}

/// Node of an organization tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: Uuid,
    pub tree_type: Uuid,
    pub code: String,
    pub name: String,
    pub parent: Option<Uuid>,
    pub disabled: bool,
    pub external_id: Option<String>,
}

impl TreeNode {
    pub fn new(tree_type: Uuid, code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            id: Uuid::new_v4(),
            tree_type,
            name: code.clone(),
            code,
            parent: None,
            disabled: false,
            external_id: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TreeNodeFilter {
    pub tree_type: Option<Uuid>,
    pub parent: Option<Uuid>,
    pub code: Option<String>,
    pub field: Option<FieldMatch>,
}

impl Record for TreeNode {
    type Filter = TreeNodeFilter;
    const NAME: &'static str = "TreeNode";

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &TreeNodeFilter) -> bool {
        criterion(&filter.tree_type, &self.tree_type)
            && filter.parent.map_or(true, |p| self.parent == Some(p))
            && criterion(&filter.code, &self.code)
            && filter.field.as_ref().map_or(true, |f| f.matches(self))
    }
}

impl SyncEntity for TreeNode {
    const KIND: EntityKind = EntityKind::Tree;

    fn field(&self, field: EntityField) -> Value {
        match field {
            EntityField::Code => Value::String(self.code.clone()),
            EntityField::Name => Value::String(self.name.clone()),
            EntityField::Parent => from_uuid(self.parent),
            EntityField::Disabled => Value::Bool(self.disabled),
            EntityField::ExternalId => from_string(self.external_id.as_deref()),
            _ => Value::Null,
        }
    }

    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn filter_by(field: FieldMatch) -> TreeNodeFilter {
        TreeNodeFilter {
            field: Some(field),
            ..TreeNodeFilter::default()
        }
    }
}
