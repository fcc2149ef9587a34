//! Types as declared in a schema.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter, Result as FmtResult};

use itertools::Itertools;

use crate::extensions::ExtensionKind;
use crate::types::{EntityType, EntityUid};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SchemaType {
    Bool,
    Long,
    String,
    Set(Box<SchemaType>),
    Record(RecordType),
    Entity(EntityType),
    Extension(ExtensionKind),
}

impl Display for SchemaType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            SchemaType::Bool => write!(f, "Bool"),
            SchemaType::Long => write!(f, "Long"),
            SchemaType::String => write!(f, "String"),
            SchemaType::Set(element) => write!(f, "Set<{element}>"),
            SchemaType::Record(record) => write!(f, "{record}"),
            SchemaType::Entity(ty) => write!(f, "Entity<{ty}>"),
            SchemaType::Extension(kind) => write!(f, "{kind}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeType {
    pub ty: SchemaType,
    pub required: bool,
}

impl AttributeType {
    pub fn required(ty: SchemaType) -> Self {
        Self { ty, required: true }
    }

    pub fn optional(ty: SchemaType) -> Self {
        Self {
            ty,
            required: false,
        }
    }
}

/// A record shape. When `additional_attributes` is false, attributes beyond
/// `attrs` are illegal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RecordType {
    pub attrs: BTreeMap<String, AttributeType>,
    pub additional_attributes: bool,
}

impl RecordType {
    pub fn new(attrs: impl IntoIterator<Item = (String, AttributeType)>) -> Self {
        Self {
            attrs: attrs.into_iter().collect(),
            additional_attributes: false,
        }
    }

    pub fn get(&self, attr: &str) -> Option<&AttributeType> {
        self.attrs.get(attr)
    }
}

impl Display for RecordType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let attrs = self
            .attrs
            .iter()
            .map(|(name, attr)| {
                let marker = if attr.required { "" } else { "?" };
                format!("{name}{marker}: {}", attr.ty)
            })
            .join(", ");
        write!(f, "{{{attrs}}}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntityTypeSchema {
    pub member_of_types: BTreeSet<EntityType>,
    pub shape: RecordType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSchema {
    pub uid: EntityUid,
    /// Action groups this action is a member of.
    pub member_of: BTreeSet<EntityUid>,
    pub principal_types: BTreeSet<EntityType>,
    pub resource_types: BTreeSet<EntityType>,
    pub context: RecordType,
}

impl ActionSchema {
    pub fn new(uid: EntityUid) -> Self {
        Self {
            uid,
            member_of: BTreeSet::new(),
            principal_types: BTreeSet::new(),
            resource_types: BTreeSet::new(),
            context: RecordType::default(),
        }
    }
}
