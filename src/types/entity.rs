//! Entities: a uid, typed attributes and the set of parents it is a member of.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};

use super::{EntityUid, Value};

/// One node of the entity graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    uid: EntityUid,
    #[serde(default)]
    attrs: BTreeMap<String, Value>,
    #[serde(default)]
    parents: BTreeSet<EntityUid>,
}

impl Entity {
    /// An entity with no attributes and no parents.
    pub fn new(uid: EntityUid) -> Self {
        Self {
            uid,
            attrs: BTreeMap::new(),
            parents: BTreeSet::new(),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn with_parent(mut self, parent: EntityUid) -> Self {
        self.parents.insert(parent);
        self
    }

    pub fn with_parents(mut self, parents: impl IntoIterator<Item = EntityUid>) -> Self {
        self.parents.extend(parents);
        self
    }

    pub fn uid(&self) -> &EntityUid {
        &self.uid
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    pub fn attrs(&self) -> &BTreeMap<String, Value> {
        &self.attrs
    }

    pub fn parents(&self) -> &BTreeSet<EntityUid> {
        &self.parents
    }
}

impl Display for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_from_json() {
        let entity: Entity = serde_json::from_str(
            r#"{
                "uid": {"type": "User", "id": "alice"},
                "attrs": {"age": 25, "manager": {"__entity": {"type": "User", "id": "bob"}}},
                "parents": [{"type": "UserGroup", "id": "jane_friends"}]
            }"#,
        )
        .unwrap();

        assert_eq!(entity.uid(), &EntityUid::of("User", "alice"));
        assert_eq!(entity.attr("age"), Some(&Value::Long(25)));
        assert_eq!(
            entity.attr("manager"),
            Some(&Value::EntityUid(EntityUid::of("User", "bob")))
        );
        assert!(entity
            .parents()
            .contains(&EntityUid::of("UserGroup", "jane_friends")));
    }

    #[test]
    fn test_entity_defaults() {
        let entity: Entity =
            serde_json::from_str(r#"{"uid": {"__entity": {"type": "Photo", "id": "a.jpg"}}}"#)
                .unwrap();
        assert!(entity.attrs().is_empty());
        assert!(entity.parents().is_empty());
    }

    #[test]
    fn test_builder() {
        let entity = Entity::new(EntityUid::of("User", "alice"))
            .with_attr("age", 25)
            .with_parent(EntityUid::of("Group", "admins"));
        assert_eq!(entity.attr("age"), Some(&Value::Long(25)));
        assert_eq!(entity.parents().len(), 1);
        assert_eq!(entity.to_string(), r#"User::"alice""#);
    }
}
