//! Attribute mapping between connector schema attributes and entity fields.

use idm_connector::{AttributeDelta, AttributeValue, ConnectorObject};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::script::{ScriptEvaluator, TransformContext};
use crate::types::{EntityField, FieldRef};

/// Attribute name carrying the UID in script bindings.
pub const UID_ATTRIBUTE: &str = "__UID__";

/// Mapping of one schema attribute to one entity field or extended attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeMapping {
    /// Schema attribute name on the connector object.
    pub name: String,
    pub target: FieldRef,
    /// The attribute carries the object UID.
    #[serde(default)]
    pub uid: bool,
    /// Script applied when reading from the system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform_from_resource: Option<String>,
    /// Script applied when writing to the system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform_to_resource: Option<String>,
}

impl AttributeMapping {
    /// Map a schema attribute to an entity field.
    pub fn entity(name: impl Into<String>, field: EntityField) -> Self {
        Self {
            name: name.into(),
            target: FieldRef::Entity(field),
            uid: false,
            transform_from_resource: None,
            transform_to_resource: None,
        }
    }

    /// Map a schema attribute to an extended attribute.
    pub fn extended(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            target: FieldRef::Extended(code.into()),
            ..Self::entity(name, EntityField::Code)
        }
    }

    /// Mark the mapping as the UID mapping.
    #[must_use]
    pub fn as_uid(mut self) -> Self {
        self.uid = true;
        self
    }

    #[must_use]
    pub fn with_transform_from(mut self, script: impl Into<String>) -> Self {
        self.transform_from_resource = Some(script.into());
        self
    }

    #[must_use]
    pub fn with_transform_to(mut self, script: impl Into<String>) -> Self {
        self.transform_to_resource = Some(script.into());
        self
    }
}

/// Values produced by inbound mapping, keyed by target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedValues {
    pub fields: BTreeMap<EntityField, Value>,
    pub extended: BTreeMap<String, Value>,
}

impl MappedValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mapped value of an entity field; `None` when the field is not mapped.
    pub fn get(&self, field: EntityField) -> Option<&Value> {
        self.fields.get(&field)
    }

    /// Whether the field is mapped (even to null).
    pub fn has(&self, field: EntityField) -> bool {
        self.fields.contains_key(&field)
    }

    pub fn value(&self, target: &FieldRef) -> Option<&Value> {
        match target {
            FieldRef::Entity(field) => self.fields.get(field),
            FieldRef::Extended(code) => self.extended.get(code),
        }
    }

    pub fn insert(&mut self, target: FieldRef, value: Value) {
        match target {
            FieldRef::Entity(field) => {
                self.fields.insert(field, value);
            }
            FieldRef::Extended(code) => {
                self.extended.insert(code, value);
            }
        }
    }

    /// JSON object of all values, as handed to workflow processes.
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (field, value) in &self.fields {
            map.insert(field.as_str().to_string(), value.clone());
        }
        for (code, value) in &self.extended {
            map.insert(format!("eav:{code}"), value.clone());
        }
        Value::Object(map)
    }
}

/// Applies a mapping set in either direction.
pub struct MappingResolver<'a> {
    mappings: &'a [AttributeMapping],
    scripts: &'a dyn ScriptEvaluator,
    system: Value,
}

impl<'a> MappingResolver<'a> {
    pub fn new(mappings: &'a [AttributeMapping], scripts: &'a dyn ScriptEvaluator, system: Value) -> Self {
        Self {
            mappings,
            scripts,
            system,
        }
    }

    /// The mapping flagged as UID.
    pub fn uid_mapping(&self) -> Option<&'a AttributeMapping> {
        self.mappings.iter().find(|m| m.uid)
    }

    /// Mapping by schema attribute name.
    pub fn by_name(&self, name: &str) -> Option<&'a AttributeMapping> {
        self.mappings.iter().find(|m| m.name == name)
    }

    /// Mapping targeting an entity field.
    pub fn by_field(&self, field: EntityField) -> Option<&'a AttributeMapping> {
        self.mappings
            .iter()
            .find(|m| m.target == FieldRef::Entity(field))
    }

    pub(crate) fn ic_attributes(object: &ConnectorObject) -> Value {
        let mut attrs = object.attributes.to_json();
        if let Value::Object(map) = &mut attrs {
            map.insert(
                UID_ATTRIBUTE.to_string(),
                Value::String(object.uid.value().to_string()),
            );
        }
        attrs
    }

    /// Transformed value of one mapping for a connector object.
    pub fn inbound_value(
        &self,
        mapping: &AttributeMapping,
        object: &ConnectorObject,
    ) -> SyncResult<Value> {
        let raw = if mapping.uid {
            Value::String(object.uid.value().to_string())
        } else {
            object
                .attributes
                .get(&mapping.name)
                .map(AttributeValue::to_json)
                .unwrap_or(Value::Null)
        };
        match &mapping.transform_from_resource {
            None => Ok(raw),
            Some(script) => {
                let ic_attributes = Self::ic_attributes(object);
                self.scripts
                    .transform(
                        script,
                        &TransformContext {
                            attribute_value: &raw,
                            ic_attributes: &ic_attributes,
                            system: &self.system,
                        },
                    )
                    .map_err(|e| SyncError::mapping(&mapping.name, e.to_string()))
            }
        }
    }

    /// Map a connector object to entity values.
    pub fn inbound(&self, object: &ConnectorObject) -> SyncResult<MappedValues> {
        let mut values = MappedValues::new();
        for mapping in self.mappings {
            let value = self.inbound_value(mapping, object)?;
            values.insert(mapping.target.clone(), value);
        }
        debug!(
            uid = %object.uid,
            fields = values.fields.len(),
            extended = values.extended.len(),
            "Inbound mapping resolved"
        );
        Ok(values)
    }

    /// Map entity values to an attribute delta for the connector. The UID mapping is skipped.
    pub fn outbound(&self, values: &MappedValues) -> SyncResult<AttributeDelta> {
        let entity_json = values.to_json();
        let mut delta = AttributeDelta::new();
        for mapping in self.mappings.iter().filter(|m| !m.uid) {
            let Some(value) = values.value(&mapping.target) else {
                continue;
            };
            let value = match &mapping.transform_to_resource {
                None => value.clone(),
                Some(script) => self
                    .scripts
                    .transform(
                        script,
                        &TransformContext {
                            attribute_value: value,
                            ic_attributes: &entity_json,
                            system: &self.system,
                        },
                    )
                    .map_err(|e| SyncError::mapping(&mapping.name, e.to_string()))?,
            };
            if value.is_null() {
                delta.clear_attribute(&mapping.name);
            } else {
                delta.replace(&mapping.name, AttributeValue::from_json(&value));
            }
        }
        Ok(delta)
    }
}
