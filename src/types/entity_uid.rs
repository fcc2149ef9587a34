//! Entity type names and entity identifiers.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::PolicyError;

/// The basename shared by all action entity types (`Action`, `NS::Action`).
pub const ACTION_BASENAME: &str = "Action";

/// A possibly namespaced entity type name, e.g. `User` or `Photos::Album`.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct EntityType(String);

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        EntityType(name.into())
    }

    /// Qualify `name` with `namespace` unless it already carries one.
    pub fn qualified(namespace: &str, name: &str) -> Self {
        if namespace.is_empty() || name.contains("::") {
            EntityType::new(name)
        } else {
            EntityType(format!("{namespace}::{name}"))
        }
    }

    /// The action entity type of a namespace.
    pub fn action_in(namespace: &str) -> Self {
        Self::qualified(namespace, ACTION_BASENAME)
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// The last path segment.
    pub fn basename(&self) -> &str {
        self.0.rsplit("::").next().unwrap_or(&self.0)
    }

    /// Everything before the last path segment; empty without a namespace.
    pub fn namespace(&self) -> &str {
        self.0.rfind("::").map(|idx| &self.0[..idx]).unwrap_or("")
    }

    pub fn is_action(&self) -> bool {
        self.basename() == ACTION_BASENAME
    }
}

impl Display for EntityType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

impl FromStr for EntityType {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.split("::").all(is_identifier) {
            Ok(EntityType::new(s))
        } else {
            Err(PolicyError::ParseError(format!(
                "`{s}` is not a valid entity type name"
            )))
        }
    }
}

/// A unique entity identifier: type plus id, written `Type::"id"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "EntityUidJson", into = "TypeAndId")]
pub struct EntityUid {
    ty: EntityType,
    eid: String,
}

impl EntityUid {
    pub fn new(ty: EntityType, id: impl Into<String>) -> Self {
        Self { ty, eid: id.into() }
    }

    /// Shorthand for `EntityUid::new(EntityType::new(ty), id)`.
    pub fn of(ty: &str, id: &str) -> Self {
        Self::new(EntityType::new(ty), id)
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.ty
    }

    pub fn id(&self) -> &str {
        &self.eid
    }

    pub fn is_action(&self) -> bool {
        self.ty.is_action()
    }
}

impl Display for EntityUid {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}::\"", self.ty)?;
        for c in self.eid.chars() {
            match c {
                '"' => write!(f, "\\\"")?,
                '\\' => write!(f, "\\\\")?,
                '\n' => write!(f, "\\n")?,
                '\t' => write!(f, "\\t")?,
                c => write!(f, "{c}")?,
            }
        }
        write!(f, "\"")
    }
}

fn unescape(raw: &str) -> Result<String, PolicyError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            if c == '"' {
                return Err(PolicyError::ParseError(format!(
                    "unescaped quote in entity id `{raw}`"
                )));
            }
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            other => {
                return Err(PolicyError::ParseError(format!(
                    "invalid escape `\\{}` in entity id `{raw}`",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}

impl FromStr for EntityUid {
    type Err = PolicyError;

    /// Parse `Type::"id"` or `NS::Type::"id"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (ty, rest) = s.split_once("::\"").ok_or_else(|| {
            PolicyError::ParseError(format!("`{s}` is not an entity reference"))
        })?;
        let raw_id = rest.strip_suffix('"').ok_or_else(|| {
            PolicyError::ParseError(format!("unterminated entity id in `{s}`"))
        })?;
        Ok(Self {
            ty: ty.parse()?,
            eid: unescape(raw_id)?,
        })
    }
}

/// The `{"type": ..., "id": ...}` JSON shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TypeAndId {
    #[serde(rename = "type")]
    ty: EntityType,
    id: String,
}

/// Accepted JSON shapes for an entity reference.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EntityUidJson {
    Escaped { __entity: TypeAndId },
    Plain(TypeAndId),
}

impl From<EntityUidJson> for EntityUid {
    fn from(json: EntityUidJson) -> Self {
        let (EntityUidJson::Escaped { __entity: inner } | EntityUidJson::Plain(inner)) = json;
        EntityUid {
            ty: inner.ty,
            eid: inner.id,
        }
    }
}

impl From<EntityUid> for TypeAndId {
    fn from(uid: EntityUid) -> Self {
        TypeAndId {
            ty: uid.ty,
            id: uid.eid,
        }
    }
}
