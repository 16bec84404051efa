//! Connector operation types
//!
//! UIDs, attribute sets, deltas, filters, pagination and the connector object
//! envelope returned by searches.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Unique identifier for an object in a target system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uid {
    /// The attribute name used as the identifier (e.g., "dn", "id", "uid").
    attribute_name: String,
    /// The actual value of the identifier.
    value: String,
}

impl Uid {
    /// Create a new UID with the given attribute name and value.
    pub fn new(attribute_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            value: value.into(),
        }
    }

    /// Create a UID using the default "uid" attribute name.
    pub fn from_value(value: impl Into<String>) -> Self {
        Self::new("uid", value)
    }

    /// Get the attribute name.
    pub fn attribute_name(&self) -> &str {
        &self.attribute_name
    }

    /// Get the value.
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.attribute_name, self.value)
    }
}

/// A set of attributes read from or written to a target system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeSet {
    #[serde(flatten)]
    attributes: HashMap<String, AttributeValue>,
}

impl AttributeSet {
    /// Create a new empty attribute set.
    pub fn new() -> Self {
        Self {
            attributes: HashMap::new(),
        }
    }

    /// Set an attribute value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Set an attribute using builder pattern.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Get an attribute value.
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Get a single-valued string attribute.
    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.as_string())
    }

    /// Check if an attribute exists.
    pub fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Remove an attribute.
    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        self.attributes.remove(name)
    }

    /// Get all attribute names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(|s| s.as_str())
    }

    /// Get the number of attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Iterate over all attributes.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.attributes.iter()
    }

    /// Render the set as a JSON object, the form handed to transformation scripts.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// Apply a delta in place.
    pub fn apply(&mut self, delta: &AttributeDelta) {
        for (name, value) in delta.replace.iter().chain(delta.add.iter()) {
            self.attributes.insert(name.clone(), value.clone());
        }
        for name in &delta.clear {
            self.attributes.remove(name);
        }
    }
}

impl FromIterator<(String, AttributeValue)> for AttributeSet {
    fn from_iter<T: IntoIterator<Item = (String, AttributeValue)>>(iter: T) -> Self {
        Self {
            attributes: iter.into_iter().collect(),
        }
    }
}

/// A value for an attribute, which may be single or multi-valued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// No value (null).
    Null,
    /// A single string value.
    String(String),
    /// A single integer value.
    Integer(i64),
    /// A single boolean value.
    Boolean(bool),
    /// A single floating-point value.
    Float(f64),
    /// Multiple values.
    Array(Vec<AttributeValue>),
    /// JSON object value.
    Object(serde_json::Map<String, Value>),
}

impl AttributeValue {
    /// Check if this is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Get as a string if this is a single string value.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as strings (works for both single and multi-valued).
    pub fn as_strings(&self) -> Vec<&str> {
        match self {
            AttributeValue::String(s) => vec![s.as_str()],
            AttributeValue::Array(arr) => arr.iter().filter_map(|v| v.as_string()).collect(),
            _ => vec![],
        }
    }

    /// Get as an integer if this is an integer value.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Text form used for filter comparison; `None` for null and composite values.
    pub fn as_text(&self) -> Option<String> {
        match self {
            AttributeValue::String(s) => Some(s.clone()),
            AttributeValue::Integer(i) => Some(i.to_string()),
            AttributeValue::Boolean(b) => Some(b.to_string()),
            AttributeValue::Float(f) => Some(f.to_string()),
            _ => None,
        }
    }

    /// Convert to a JSON value.
    pub fn to_json(&self) -> Value {
        match self {
            AttributeValue::Null => Value::Null,
            AttributeValue::String(s) => Value::String(s.clone()),
            AttributeValue::Integer(i) => Value::from(*i),
            AttributeValue::Boolean(b) => Value::Bool(*b),
            AttributeValue::Float(f) => Value::from(*f),
            AttributeValue::Array(arr) => Value::Array(arr.iter().map(Self::to_json).collect()),
            AttributeValue::Object(map) => Value::Object(map.clone()),
        }
    }

    /// Convert from a JSON value.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => AttributeValue::Null,
            Value::Bool(b) => AttributeValue::Boolean(*b),
            Value::Number(n) => n
                .as_i64()
                .map(AttributeValue::Integer)
                .unwrap_or_else(|| AttributeValue::Float(n.as_f64().unwrap_or_default())),
            Value::String(s) => AttributeValue::String(s.clone()),
            Value::Array(arr) => AttributeValue::Array(arr.iter().map(Self::from_json).collect()),
            Value::Object(map) => AttributeValue::Object(map.clone()),
        }
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Integer(i)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Boolean(b)
    }
}

impl From<Option<String>> for AttributeValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(AttributeValue::Null, AttributeValue::String)
    }
}

impl<T: Into<AttributeValue>> From<Vec<T>> for AttributeValue {
    fn from(vec: Vec<T>) -> Self {
        AttributeValue::Array(vec.into_iter().map(Into::into).collect())
    }
}

/// Changes to apply to an object during update operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributeDelta {
    /// Attributes to add (or replace if single-valued).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub add: HashMap<String, AttributeValue>,

    /// Attributes to replace entirely.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub replace: HashMap<String, AttributeValue>,

    /// Attributes to clear (remove all values).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clear: Vec<String>,
}

impl AttributeDelta {
    /// Create a new empty delta.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace an attribute value entirely.
    pub fn replace(
        &mut self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> &mut Self {
        self.replace.insert(name.into(), value.into());
        self
    }

    /// Clear all values from an attribute.
    pub fn clear_attribute(&mut self, name: impl Into<String>) -> &mut Self {
        self.clear.push(name.into());
        self
    }

    /// Check if this delta has any changes.
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.replace.is_empty() && self.clear.is_empty()
    }

    /// Get all affected attribute names.
    pub fn affected_attributes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        names.extend(self.add.keys().map(|s| s.as_str()));
        names.extend(self.replace.keys().map(|s| s.as_str()));
        names.extend(self.clear.iter().map(|s| s.as_str()));
        names.sort();
        names.dedup();
        names
    }
}

/// Filter for search operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    /// Match objects where attribute equals value.
    Equals { attribute: String, value: String },

    /// Match objects where attribute is greater than value.
    GreaterThan { attribute: String, value: String },

    /// Match objects where attribute is less than value.
    LessThan { attribute: String, value: String },

    /// Match objects where attribute exists (has a non-null value).
    Present { attribute: String },

    /// Logical AND of multiple filters.
    And { filters: Vec<Filter> },

    /// Logical OR of multiple filters.
    Or { filters: Vec<Filter> },

    /// Logical NOT of a filter.
    Not { filter: Box<Filter> },
}

impl Filter {
    /// Create an equals filter.
    pub fn eq(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Create a greater-than filter.
    pub fn gt(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::GreaterThan {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Create a present (attribute exists) filter.
    pub fn present(attribute: impl Into<String>) -> Self {
        Filter::Present {
            attribute: attribute.into(),
        }
    }

    /// Create a NOT filter (negation).
    pub fn negate(filter: Filter) -> Self {
        Filter::Not {
            filter: Box::new(filter),
        }
    }

    /// Combine this filter with another using AND.
    pub fn and_with(self, other: Filter) -> Self {
        match self {
            Filter::And { mut filters } => {
                filters.push(other);
                Filter::And { filters }
            }
            _ => Filter::And {
                filters: vec![self, other],
            },
        }
    }

    /// Combine this filter with another using OR.
    pub fn or_with(self, other: Filter) -> Self {
        match self {
            Filter::Or { mut filters } => {
                filters.push(other);
                Filter::Or { filters }
            }
            _ => Filter::Or {
                filters: vec![self, other],
            },
        }
    }

    /// Evaluate the filter against an attribute set.
    ///
    /// Ordering comparisons are numeric when both sides parse as integers and
    /// lexical otherwise, so ISO dates and numeric tokens both order correctly.
    pub fn matches(&self, attributes: &AttributeSet) -> bool {
        match self {
            Filter::Equals { attribute, value } => attributes
                .get(attribute)
                .map(|v| match v {
                    AttributeValue::Array(items) => items
                        .iter()
                        .any(|i| i.as_text().as_deref() == Some(value.as_str())),
                    other => other.as_text().as_deref() == Some(value.as_str()),
                })
                .unwrap_or(false),
            Filter::GreaterThan { attribute, value } => {
                compare_attribute(attributes, attribute, value) == Some(Ordering::Greater)
            }
            Filter::LessThan { attribute, value } => {
                compare_attribute(attributes, attribute, value) == Some(Ordering::Less)
            }
            Filter::Present { attribute } => attributes
                .get(attribute)
                .map(|v| !v.is_null())
                .unwrap_or(false),
            Filter::And { filters } => filters.iter().all(|f| f.matches(attributes)),
            Filter::Or { filters } => filters.iter().any(|f| f.matches(attributes)),
            Filter::Not { filter } => !filter.matches(attributes),
        }
    }
}

fn compare_attribute(attributes: &AttributeSet, attribute: &str, value: &str) -> Option<Ordering> {
    let actual = attributes.get(attribute)?.as_text()?;
    match (actual.parse::<i64>(), value.parse::<i64>()) {
        (Ok(a), Ok(b)) => Some(a.cmp(&b)),
        _ => Some(actual.as_str().cmp(value)),
    }
}

/// Pagination request for search operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRequest {
    /// Maximum number of results to return.
    pub page_size: u32,

    /// Opaque cursor returned by the previous page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl PageRequest {
    /// Create a new page request with the given page size.
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            cursor: None,
        }
    }

    /// Set the cursor for cursor-based pagination.
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(100)
    }
}

/// One record of an external system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorObject {
    /// Unique identifier on the target system.
    pub uid: Uid,
    /// Object class the record belongs to.
    pub object_class: String,
    /// Attribute values as read from the target system.
    pub attributes: AttributeSet,
}

impl ConnectorObject {
    /// Create a new connector object.
    pub fn new(uid: Uid, object_class: impl Into<String>, attributes: AttributeSet) -> Self {
        Self {
            uid,
            object_class: object_class.into(),
            attributes,
        }
    }
}

/// Result of a search operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// The matching objects.
    pub objects: Vec<ConnectorObject>,

    /// Cursor for the next page (if more results available).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,

    /// Whether there are more results available.
    pub has_more: bool,
}

impl SearchResult {
    /// Create a new search result.
    pub fn new(objects: Vec<ConnectorObject>) -> Self {
        Self {
            objects,
            next_cursor: None,
            has_more: false,
        }
    }

    /// Create an empty search result.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Set the next cursor.
    pub fn with_next_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.next_cursor = Some(cursor.into());
        self.has_more = true;
        self
    }

    /// Get the number of objects in this page.
    pub fn count(&self) -> usize {
        self.objects.len()
    }
}
