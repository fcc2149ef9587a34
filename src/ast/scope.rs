//! Policy scope: the principal, action and resource constraints.

use std::fmt::{Display, Formatter, Result as FmtResult};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum_macros::Display as StrumDisplay;

use crate::error::PolicyError;
use crate::types::{EntityType, EntityUid};

/// Template slots.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, StrumDisplay,
)]
pub enum SlotId {
    #[serde(rename = "?principal")]
    #[strum(serialize = "?principal")]
    Principal,
    #[serde(rename = "?resource")]
    #[strum(serialize = "?resource")]
    Resource,
}

/// Either a concrete entity or a slot filled in when a template is linked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityReference {
    Euid(EntityUid),
    Slot(SlotId),
}

impl Display for EntityReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            EntityReference::Euid(uid) => write!(f, "{uid}"),
            EntityReference::Slot(slot) => write!(f, "{slot}"),
        }
    }
}

impl From<EntityUid> for EntityReference {
    fn from(uid: EntityUid) -> Self {
        EntityReference::Euid(uid)
    }
}

impl From<SlotId> for EntityReference {
    fn from(slot: SlotId) -> Self {
        EntityReference::Slot(slot)
    }
}

/// Constraint on the principal or the resource of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "ScopeJson", into = "ScopeJson")]
pub enum ScopeConstraint {
    #[default]
    Any,
    Eq(EntityReference),
    In(EntityReference),
    Is(EntityType),
    IsIn(EntityType, EntityReference),
}

impl ScopeConstraint {
    pub fn slot(&self) -> Option<SlotId> {
        match self {
            Self::Eq(EntityReference::Slot(s))
            | Self::In(EntityReference::Slot(s))
            | Self::IsIn(_, EntityReference::Slot(s)) => Some(*s),
            _ => None,
        }
    }

    /// The entity type the constraint pins, if any.
    pub fn entity_type(&self) -> Option<&EntityType> {
        match self {
            Self::Is(ty) | Self::IsIn(ty, _) => Some(ty),
            Self::Eq(EntityReference::Euid(uid)) => Some(uid.entity_type()),
            _ => None,
        }
    }

    /// Write the constraint as it appears in policy text, `var` being
    /// `principal` or `resource`.
    pub fn fmt_for(&self, var: &str) -> String {
        match self {
            Self::Any => var.to_string(),
            Self::Eq(r) => format!("{var} == {r}"),
            Self::In(r) => format!("{var} in {r}"),
            Self::Is(ty) => format!("{var} is {ty}"),
            Self::IsIn(ty, r) => format!("{var} is {ty} in {r}"),
        }
    }
}

/// Constraint on the action of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "ScopeJson", into = "ScopeJson")]
pub enum ActionConstraint {
    #[default]
    Any,
    Eq(EntityUid),
    In(Vec<EntityUid>),
}

impl ActionConstraint {
    /// The actions named by the constraint; empty for `Any`.
    pub fn actions(&self) -> Vec<&EntityUid> {
        match self {
            Self::Any => vec![],
            Self::Eq(uid) => vec![uid],
            Self::In(uids) => uids.iter().collect(),
        }
    }
}

impl Display for ActionConstraint {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Any => write!(f, "action"),
            Self::Eq(uid) => write!(f, "action == {uid}"),
            Self::In(uids) => write!(f, "action in [{}]", uids.iter().join(", ")),
        }
    }
}

/// The JSON form shared by all three scope constraints:
/// `{"op": "All"}`, `{"op": "==", "entity": ..}`, `{"op": "==", "slot": ..}`,
/// `{"op": "in", "entities": [..]}`, `{"op": "is", "entity_type": .., "in": {..}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ScopeJson {
    op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entity: Option<EntityUid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    slot: Option<SlotId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entities: Option<Vec<EntityUid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entity_type: Option<EntityType>,
    #[serde(rename = "in", default, skip_serializing_if = "Option::is_none")]
    in_ref: Option<RefJson>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RefJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entity: Option<EntityUid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    slot: Option<SlotId>,
}

impl RefJson {
    fn from_reference(r: EntityReference) -> Self {
        match r {
            EntityReference::Euid(uid) => RefJson {
                entity: Some(uid),
                slot: None,
            },
            EntityReference::Slot(slot) => RefJson {
                entity: None,
                slot: Some(slot),
            },
        }
    }

    fn into_reference(self, op: &str) -> Result<EntityReference, PolicyError> {
        match (self.entity, self.slot) {
            (Some(uid), None) => Ok(EntityReference::Euid(uid)),
            (None, Some(slot)) => Ok(EntityReference::Slot(slot)),
            _ => Err(PolicyError::InvalidFormat(format!(
                "`{op}` constraint needs exactly one of `entity` or `slot`"
            ))),
        }
    }
}

impl ScopeJson {
    fn op(op: &str) -> Self {
        ScopeJson {
            op: op.to_string(),
            ..Default::default()
        }
    }

    fn reference(op: &str, r: EntityReference) -> Self {
        let RefJson { entity, slot } = RefJson::from_reference(r);
        ScopeJson {
            entity,
            slot,
            ..Self::op(op)
        }
    }

    fn take_reference(&mut self) -> Result<EntityReference, PolicyError> {
        RefJson {
            entity: self.entity.take(),
            slot: self.slot.take(),
        }
        .into_reference(&self.op)
    }
}

impl From<ScopeConstraint> for ScopeJson {
    fn from(constraint: ScopeConstraint) -> Self {
        match constraint {
            ScopeConstraint::Any => ScopeJson::op("All"),
            ScopeConstraint::Eq(r) => ScopeJson::reference("==", r),
            ScopeConstraint::In(r) => ScopeJson::reference("in", r),
            ScopeConstraint::Is(ty) => ScopeJson {
                entity_type: Some(ty),
                ..ScopeJson::op("is")
            },
            ScopeConstraint::IsIn(ty, r) => ScopeJson {
                entity_type: Some(ty),
                in_ref: Some(RefJson::from_reference(r)),
                ..ScopeJson::op("is")
            },
        }
    }
}

impl TryFrom<ScopeJson> for ScopeConstraint {
    type Error = PolicyError;

    fn try_from(mut json: ScopeJson) -> Result<Self, Self::Error> {
        match json.op.as_str() {
            "All" => Ok(ScopeConstraint::Any),
            "==" => Ok(ScopeConstraint::Eq(json.take_reference()?)),
            "in" => Ok(ScopeConstraint::In(json.take_reference()?)),
            "is" => {
                let ty = json.entity_type.take().ok_or_else(|| {
                    PolicyError::InvalidFormat("`is` constraint needs `entity_type`".to_string())
                })?;
                match json.in_ref.take() {
                    Some(r) => Ok(ScopeConstraint::IsIn(ty, r.into_reference("in")?)),
                    None => Ok(ScopeConstraint::Is(ty)),
                }
            }
            other => Err(PolicyError::InvalidFormat(format!(
                "unknown scope operator `{other}`"
            ))),
        }
    }
}

impl From<ActionConstraint> for ScopeJson {
    fn from(constraint: ActionConstraint) -> Self {
        match constraint {
            ActionConstraint::Any => ScopeJson::op("All"),
            ActionConstraint::Eq(uid) => ScopeJson {
                entity: Some(uid),
                ..ScopeJson::op("==")
            },
            ActionConstraint::In(uids) => ScopeJson {
                entities: Some(uids),
                ..ScopeJson::op("in")
            },
        }
    }
}

impl TryFrom<ScopeJson> for ActionConstraint {
    type Error = PolicyError;

    fn try_from(json: ScopeJson) -> Result<Self, Self::Error> {
        if json.slot.is_some() {
            return Err(PolicyError::InvalidFormat(
                "the action constraint cannot use a slot".to_string(),
            ));
        }
        match (json.op.as_str(), json.entity, json.entities) {
            ("All", None, None) => Ok(ActionConstraint::Any),
            ("==", Some(uid), None) => Ok(ActionConstraint::Eq(uid)),
            ("in", Some(uid), None) => Ok(ActionConstraint::In(vec![uid])),
            ("in", None, Some(uids)) => Ok(ActionConstraint::In(uids)),
            (op, _, _) => Err(PolicyError::InvalidFormat(format!(
                "malformed action constraint with operator `{op}`"
            ))),
        }
    }
}
