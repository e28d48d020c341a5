// ── Internal value representation ──
//
// Parsed response data. Plain nodes are owned and immutable once built;
// `Entity` nodes reference the single live instance for their identity key,
// so the same logical entity reached through different queries is the same
// allocation.

use std::sync::Arc;

use chrono::NaiveDate;
use indexmap::IndexMap;

use crate::entity::EntityInstance;

/// Ordered field map used by object values and entity instances.
pub type Fields = IndexMap<String, Value>;

/// A parsed internal value.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    Array(Vec<Value>),
    Object(Fields),
    Entity(Arc<EntityInstance>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            // Entities compare by identity: one key, one live instance.
            (Self::Entity(a), Self::Entity(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Value {
    /// Build an object value from `(name, value)` pairs.
    pub fn object<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Human-readable kind, used in serialization errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Date(_) => "date",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Entity(_) => "entity",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(n) => {
                #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
                let float = *n as f64;
                Some(float)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Fields> {
        match self {
            Self::Object(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&Arc<EntityInstance>> {
        match self {
            Self::Entity(instance) => Some(instance),
            _ => None,
        }
    }

    /// Field lookup on object values and entity instances.
    ///
    /// Entity lookups clone the current field value; plain object lookups
    /// clone for symmetry.
    pub fn get(&self, field: &str) -> Option<Value> {
        match self {
            Self::Object(fields) => fields.get(field).cloned(),
            Self::Entity(instance) => instance.get(field),
            _ => None,
        }
    }

    /// Whether any entity reachable through plain containers is currently
    /// observed. Traversal stops at entity nodes: an entity's own observers
    /// speak for it, nested entities speak for themselves when reached
    /// through their own containing value.
    pub fn is_observed(&self) -> bool {
        match self {
            Self::Entity(instance) => instance.is_observed(),
            Self::Array(items) => items.iter().any(Value::is_observed),
            Self::Object(fields) => fields.values().any(Value::is_observed),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}
