//! Templates and the policies linked from them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::Arc;

use itertools::Itertools;
use serde::{Deserialize, Serialize, Serializer};
use strum_macros::Display as StrumDisplay;
use utoipa::ToSchema;

use crate::error::{EvalError, PolicyError};
use crate::types::EntityUid;

use super::{ActionConstraint, EntityReference, Expr, ScopeConstraint, SlotId};

#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct PolicyId(String);

impl PolicyId {
    pub fn new(id: impl Into<String>) -> Self {
        PolicyId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PolicyId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PolicyId {
    fn from(id: &str) -> Self {
        PolicyId::new(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Effect {
    Permit,
    Forbid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConditionKind {
    When,
    Unless,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Condition {
    pub kind: ConditionKind,
    pub body: Expr,
}

/// A policy body. Without slots it is the body of exactly one static policy;
/// with slots it only takes effect through links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    #[serde(skip)]
    id: PolicyId,
    effect: Effect,
    #[serde(default)]
    principal: ScopeConstraint,
    #[serde(default)]
    action: ActionConstraint,
    #[serde(default)]
    resource: ScopeConstraint,
    #[serde(default)]
    conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    annotations: BTreeMap<String, String>,
}

impl Template {
    /// `effect(principal, action, resource);` with no conditions.
    pub fn new(id: impl Into<PolicyId>, effect: Effect) -> Self {
        Self {
            id: id.into(),
            effect,
            principal: ScopeConstraint::Any,
            action: ActionConstraint::Any,
            resource: ScopeConstraint::Any,
            conditions: Vec::new(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<PolicyId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_principal(mut self, constraint: ScopeConstraint) -> Self {
        self.principal = constraint;
        self
    }

    pub fn with_action(mut self, constraint: ActionConstraint) -> Self {
        self.action = constraint;
        self
    }

    pub fn with_resource(mut self, constraint: ScopeConstraint) -> Self {
        self.resource = constraint;
        self
    }

    pub fn when(mut self, body: Expr) -> Self {
        self.conditions.push(Condition {
            kind: ConditionKind::When,
            body,
        });
        self
    }

    pub fn unless(mut self, body: Expr) -> Self {
        self.conditions.push(Condition {
            kind: ConditionKind::Unless,
            body,
        });
        self
    }

    pub fn annotate(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &PolicyId {
        &self.id
    }

    pub fn effect(&self) -> Effect {
        self.effect
    }

    pub fn principal_constraint(&self) -> &ScopeConstraint {
        &self.principal
    }

    pub fn action_constraint(&self) -> &ActionConstraint {
        &self.action
    }

    pub fn resource_constraint(&self) -> &ScopeConstraint {
        &self.resource
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// The slots used in the scope.
    pub fn slots(&self) -> BTreeSet<SlotId> {
        [self.principal.slot(), self.resource.slot()]
            .into_iter()
            .flatten()
            .collect()
    }

    pub fn has_slots(&self) -> bool {
        !self.slots().is_empty()
    }
}

impl Display for Template {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for (key, value) in &self.annotations {
            writeln!(f, "@{key}({value:?})")?;
        }
        write!(
            f,
            "{}(\n    {},\n    {},\n    {}\n)",
            self.effect,
            self.principal.fmt_for("principal"),
            self.action,
            self.resource.fmt_for("resource")
        )?;
        for condition in &self.conditions {
            write!(f, " {} {{ {} }}", condition.kind, condition.body)?;
        }
        write!(f, ";")
    }
}

/// An executable policy: a template plus the values of its slots.
///
/// A static policy shares its id with its template and has no values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    template: Arc<Template>,
    link: Option<PolicyId>,
    values: BTreeMap<SlotId, EntityUid>,
}

impl Policy {
    /// Wrap a slot-free template as a static policy.
    pub fn new_static(template: Template) -> Result<Self, PolicyError> {
        if template.has_slots() {
            return Err(PolicyError::LinkingError(format!(
                "`{}` has slots and cannot be used as a static policy",
                template.id()
            )));
        }
        Ok(Self {
            template: Arc::new(template),
            link: None,
            values: BTreeMap::new(),
        })
    }

    /// Fill in the slots of `template`, producing the policy `new_id`.
    pub fn link(
        template: Arc<Template>,
        new_id: PolicyId,
        values: BTreeMap<SlotId, EntityUid>,
    ) -> Result<Self, PolicyError> {
        let expected = template.slots();
        let given: BTreeSet<SlotId> = values.keys().copied().collect();
        if expected != given {
            let unbound = expected.difference(&given).join(", ");
            let extra = given.difference(&expected).join(", ");
            return Err(PolicyError::LinkingError(format!(
                "linking `{}` into `{new_id}`: unbound slots [{unbound}], extra values [{extra}]",
                template.id()
            )));
        }
        Ok(Self {
            template,
            link: Some(new_id),
            values,
        })
    }

    pub fn id(&self) -> &PolicyId {
        self.link.as_ref().unwrap_or_else(|| self.template.id())
    }

    pub fn template_id(&self) -> &PolicyId {
        self.template.id()
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub(crate) fn template_arc(&self) -> Arc<Template> {
        Arc::clone(&self.template)
    }

    pub fn is_static(&self) -> bool {
        self.link.is_none()
    }

    pub fn effect(&self) -> Effect {
        self.template.effect()
    }

    pub fn principal_constraint(&self) -> &ScopeConstraint {
        self.template.principal_constraint()
    }

    pub fn action_constraint(&self) -> &ActionConstraint {
        self.template.action_constraint()
    }

    pub fn resource_constraint(&self) -> &ScopeConstraint {
        self.template.resource_constraint()
    }

    pub fn conditions(&self) -> &[Condition] {
        self.template.conditions()
    }

    pub fn values(&self) -> &BTreeMap<SlotId, EntityUid> {
        &self.values
    }

    /// Resolve a scope reference against this policy's slot values.
    pub fn resolve<'a>(&'a self, reference: &'a EntityReference) -> Result<&'a EntityUid, EvalError> {
        match reference {
            EntityReference::Euid(uid) => Ok(uid),
            EntityReference::Slot(slot) => {
                self.values
                    .get(slot)
                    .ok_or_else(|| EvalError::UnlinkedSlot {
                        slot: slot.to_string(),
                    })
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

impl Display for Policy {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.template)?;
        if !self.values.is_empty() {
            let values = self
                .values
                .iter()
                .map(|(slot, uid)| format!("{slot} = {uid}"))
                .join(", ");
            write!(f, " // {values}")?;
        }
        Ok(())
    }
}

fn no_values(values: &&BTreeMap<SlotId, EntityUid>) -> bool {
    values.is_empty()
}

#[derive(Serialize)]
struct PolicyView<'a> {
    id: &'a PolicyId,
    #[serde(skip_serializing_if = "Option::is_none")]
    template: Option<&'a PolicyId>,
    #[serde(skip_serializing_if = "no_values")]
    values: &'a BTreeMap<SlotId, EntityUid>,
    #[serde(flatten)]
    body: &'a Template,
}

impl Serialize for Policy {
    fn serialize<S>(&self, ser: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        PolicyView {
            id: self.id(),
            template: (!self.is_static()).then(|| self.template_id()),
            values: &self.values,
            body: &self.template,
        }
        .serialize(ser)
    }
}
