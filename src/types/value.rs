//! Runtime values.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter, Result as FmtResult};

use itertools::Itertools;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::extensions::ExtensionValue;

use super::EntityUid;

/// Every value a request, an entity attribute, or an expression can hold.
///
/// Sets are ordered and deduplicated; records are ordered by key, so
/// equality, ordering and hashing are all structural.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Bool(bool),
    Long(i64),
    String(String),
    EntityUid(EntityUid),
    Set(BTreeSet<Value>),
    Record(BTreeMap<String, Value>),
    Extension(ExtensionValue),
}

impl Value {
    /// Short type name used in error messages.
    pub fn type_name(&self) -> String {
        match self {
            Value::Bool(_) => "bool".to_string(),
            Value::Long(_) => "long".to_string(),
            Value::String(_) => "string".to_string(),
            Value::EntityUid(uid) => format!("entity of type `{}`", uid.entity_type()),
            Value::Set(_) => "set".to_string(),
            Value::Record(_) => "record".to_string(),
            Value::Extension(ext) => ext.kind().to_string(),
        }
    }

    pub fn set(values: impl IntoIterator<Item = Value>) -> Self {
        Value::Set(values.into_iter().collect())
    }

    pub fn record<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Record(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Long(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::EntityUid(uid) => write!(f, "{uid}"),
            Value::Set(values) => write!(f, "[{}]", values.iter().join(", ")),
            Value::Record(attrs) => write!(
                f,
                "{{{}}}",
                attrs.iter().map(|(k, v)| format!("{k:?}: {v}")).join(", ")
            ),
            Value::Extension(ext) => write!(f, "{ext}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Long(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Long(n.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<EntityUid> for Value {
    fn from(uid: EntityUid) -> Self {
        Value::EntityUid(uid)
    }
}

impl From<ExtensionValue> for Value {
    fn from(ext: ExtensionValue) -> Self {
        Value::Extension(ext)
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, ser: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(ser)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(de: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let json = serde_json::Value::deserialize(de)?;
        Value::from_json(&json).map_err(D::Error::custom)
    }
}
