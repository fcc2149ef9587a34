//! Schemas: entity shapes and action signatures.
//!
//! A schema is closed world. Entity types and actions that are not declared
//! are illegal wherever a schema is in use.

mod json;
mod types;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::str::FromStr;

use tracing::debug;

use crate::error::PolicyError;
use crate::types::{Entity, EntityType, EntityUid};

pub use types::{ActionSchema, AttributeType, EntityTypeSchema, RecordType, SchemaType};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    entity_types: BTreeMap<EntityType, EntityTypeSchema>,
    actions: BTreeMap<EntityUid, ActionSchema>,
}

impl Schema {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse the JSON schema format.
    pub fn from_json(json: serde_json::Value) -> Result<Self, PolicyError> {
        let schema = json::parse(json)?;
        debug!(
            event = "Schema",
            phase = "Loaded",
            entity_types = schema.entity_types.len(),
            actions = schema.actions.len()
        );
        Ok(schema)
    }

    pub fn add_entity_type(
        &mut self,
        ty: EntityType,
        declared: EntityTypeSchema,
    ) -> Result<(), PolicyError> {
        if self.entity_types.contains_key(&ty) {
            return Err(PolicyError::SchemaError(format!(
                "entity type `{ty}` is declared twice"
            )));
        }
        self.entity_types.insert(ty, declared);
        Ok(())
    }

    pub fn add_action(&mut self, declared: ActionSchema) -> Result<(), PolicyError> {
        if self.actions.contains_key(&declared.uid) {
            return Err(PolicyError::SchemaError(format!(
                "action `{}` is declared twice",
                declared.uid
            )));
        }
        self.actions.insert(declared.uid.clone(), declared);
        Ok(())
    }

    /// Every type and action a declaration mentions must itself be declared.
    pub fn check_references(&self) -> Result<(), PolicyError> {
        for (ty, declared) in &self.entity_types {
            for parent in &declared.member_of_types {
                self.require_entity_type(parent, &format!("memberOfTypes of `{ty}`"))?;
            }
            for (attr, attr_type) in &declared.shape.attrs {
                self.check_type(&attr_type.ty, &format!("attribute `{attr}` of `{ty}`"))?;
            }
        }
        for (uid, action) in &self.actions {
            for group in &action.member_of {
                if !self.actions.contains_key(group) {
                    return Err(PolicyError::SchemaError(format!(
                        "action `{uid}` is a member of undeclared action `{group}`"
                    )));
                }
            }
            for ty in action.principal_types.iter().chain(&action.resource_types) {
                self.require_entity_type(ty, &format!("appliesTo of `{uid}`"))?;
            }
            for (attr, attr_type) in &action.context.attrs {
                self.check_type(&attr_type.ty, &format!("context attribute `{attr}` of `{uid}`"))?;
            }
        }
        Ok(())
    }

    fn require_entity_type(&self, ty: &EntityType, used_in: &str) -> Result<(), PolicyError> {
        if self.entity_types.contains_key(ty) {
            Ok(())
        } else {
            Err(PolicyError::SchemaError(format!(
                "undeclared entity type `{ty}` in {used_in}"
            )))
        }
    }

    fn check_type(&self, ty: &SchemaType, used_in: &str) -> Result<(), PolicyError> {
        match ty {
            SchemaType::Entity(entity_type) => self.require_entity_type(entity_type, used_in),
            SchemaType::Set(element) => self.check_type(element, used_in),
            SchemaType::Record(record) => record
                .attrs
                .values()
                .try_for_each(|attr| self.check_type(&attr.ty, used_in)),
            _ => Ok(()),
        }
    }

    pub fn entity_type(&self, ty: &EntityType) -> Option<&EntityTypeSchema> {
        self.entity_types.get(ty)
    }

    pub fn entity_types(&self) -> impl Iterator<Item = (&EntityType, &EntityTypeSchema)> {
        self.entity_types.iter()
    }

    pub fn action(&self, uid: &EntityUid) -> Option<&ActionSchema> {
        self.actions.get(uid)
    }

    pub fn actions(&self) -> impl Iterator<Item = &ActionSchema> {
        self.actions.values()
    }

    /// Declared entity types plus the entity types of declared actions.
    pub fn is_known_entity_type(&self, ty: &EntityType) -> bool {
        self.entity_types.contains_key(ty) || self.actions.keys().any(|a| a.entity_type() == ty)
    }

    /// Action groups `uid` belongs to, transitively.
    pub fn action_ancestors(&self, uid: &EntityUid) -> BTreeSet<EntityUid> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&EntityUid> = self
            .actions
            .get(uid)
            .map(|a| a.member_of.iter().collect())
            .unwrap_or_default();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next.clone()) {
                if let Some(action) = self.actions.get(next) {
                    queue.extend(action.member_of.iter());
                }
            }
        }
        seen
    }

    /// Declared actions that are `group` or a member of it, transitively.
    pub fn actions_in(&self, group: &EntityUid) -> Vec<&ActionSchema> {
        self.actions
            .values()
            .filter(|a| &a.uid == group || self.action_ancestors(&a.uid).contains(group))
            .collect()
    }

    /// Action entities with their action-group parents.
    pub fn action_entities(&self) -> Vec<Entity> {
        self.actions
            .values()
            .map(|a| Entity::new(a.uid.clone()).with_parents(a.member_of.iter().cloned()))
            .collect()
    }
}

impl FromStr for Schema {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let json: serde_json::Value =
            serde_json::from_str(s).map_err(|e| PolicyError::SchemaError(e.to_string()))?;
        Schema::from_json(json)
    }
}
