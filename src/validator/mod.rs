//! Static validation against a [`Schema`].
//!
//! Policies are type-checked once per request environment their scope
//! admits. Entities and requests are checked for conformance with the
//! declared shapes.

mod conformance;
mod typecheck;

use std::collections::{BTreeSet, VecDeque};
use std::fmt::{Display, Formatter, Result as FmtResult};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::ast::{
    ActionConstraint, ConditionKind, EntityReference, PolicyId, ScopeConstraint, Template,
};
use crate::policy_set::PolicySet;
use crate::schema::{ActionSchema, Schema};
use crate::types::EntityType;

pub use conformance::{conform_entity, validate_request};

use typecheck::{Capabilities, RequestEnv, Type, TypeChecker};

#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationErrorKind {
    #[error("unrecognized entity type `{name}`")]
    UnrecognizedEntityType { name: String },

    #[error("unrecognized action `{uid}`")]
    UnrecognizedActionId { uid: String },

    #[error("unexpected type: expected {expected}, got {actual}")]
    UnexpectedType { expected: String, actual: String },

    #[error("incompatible types {left} and {right}")]
    IncompatibleTypes { left: String, right: String },

    #[error("attribute `{attr}` is not declared on {on}")]
    UnsafeAttributeAccess { on: String, attr: String },

    #[error("attribute `{attr}` of `{on}` is optional and must be guarded with `has`")]
    UnsafeOptionalAttributeAccess { on: String, attr: String },

    #[error("undefined extension function `{name}`")]
    UndefinedFunction { name: String },

    #[error("wrong number of arguments to `{name}`: expected {expected}, got {actual}")]
    WrongNumberArguments {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("extension constructor `{name}` takes a string literal")]
    NonLiteralExtensionConstructor { name: String },

    #[error("invalid extension literal: {message}")]
    ExtensionLiteral { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidationError {
    pub policy_id: PolicyId,
    pub kind: ValidationErrorKind,
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "policy `{}`: {}", self.policy_id, self.kind)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn validation_passed(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Errors reported for one policy or template.
    pub fn errors_for<'a>(&'a self, id: &'a PolicyId) -> impl Iterator<Item = &'a ValidationError> {
        self.errors.iter().filter(move |e| &e.policy_id == id)
    }

    fn push(&mut self, policy_id: &PolicyId, kind: ValidationErrorKind) {
        let error = ValidationError {
            policy_id: policy_id.clone(),
            kind,
        };
        if !self.errors.contains(&error) {
            self.errors.push(error);
        }
    }
}

impl Display for ValidationResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if self.validation_passed() {
            write!(f, "validation passed")
        } else {
            write!(f, "{}", self.errors.iter().join("; "))
        }
    }
}

/// Validate every template and static policy, and the slot values of every
/// link, against `schema`.
pub fn validate(policies: &PolicySet, schema: &Schema) -> ValidationResult {
    let mut result = ValidationResult::default();

    for template in policies.all_templates() {
        validate_template(template, schema, &mut result);
    }

    for policy in policies.policies().filter(|p| !p.is_static()) {
        for uid in policy.values().values() {
            if !schema.is_known_entity_type(uid.entity_type()) {
                result.push(
                    policy.id(),
                    ValidationErrorKind::UnrecognizedEntityType {
                        name: uid.entity_type().to_string(),
                    },
                );
            }
        }
    }

    debug!(
        event = "Validation",
        phase = "Complete",
        policies = policies.len(),
        errors = result.errors.len()
    );
    result
}

fn validate_template(template: &Template, schema: &Schema, result: &mut ValidationResult) {
    let id = template.id();

    for constraint in [template.principal_constraint(), template.resource_constraint()] {
        for ty in scope_types(constraint) {
            if !schema.is_known_entity_type(ty) {
                result.push(
                    id,
                    ValidationErrorKind::UnrecognizedEntityType {
                        name: ty.to_string(),
                    },
                );
            }
        }
    }
    for uid in template.action_constraint().actions() {
        if schema.action(uid).is_none() {
            result.push(
                id,
                ValidationErrorKind::UnrecognizedActionId {
                    uid: uid.to_string(),
                },
            );
        }
    }

    for env in environments(template, schema) {
        let mut checker = TypeChecker::new(schema, &env);
        let mut caps = Capabilities::new();
        for condition in template.conditions() {
            let established = checker.condition(&condition.body, &caps);
            if condition.kind == ConditionKind::When {
                caps.extend(established);
            }
        }
        for kind in checker.into_errors() {
            debug!(event = "Validation", phase = "TypeError", policy = %id, env = %env, error = %kind);
            result.push(id, kind);
        }
    }
}

/// Entity types named by a scope constraint.
fn scope_types(constraint: &ScopeConstraint) -> Vec<&EntityType> {
    match constraint {
        ScopeConstraint::Any => vec![],
        ScopeConstraint::Eq(r) | ScopeConstraint::In(r) => reference_type(r).into_iter().collect(),
        ScopeConstraint::Is(ty) => vec![ty],
        ScopeConstraint::IsIn(ty, r) => std::iter::once(ty).chain(reference_type(r)).collect(),
    }
}

fn reference_type(reference: &EntityReference) -> Option<&EntityType> {
    match reference {
        EntityReference::Euid(uid) => Some(uid.entity_type()),
        EntityReference::Slot(_) => None,
    }
}

/// Whether an entity of type `ty` can satisfy `constraint`. Slots admit any
/// type.
fn admits(constraint: &ScopeConstraint, ty: &EntityType, schema: &Schema) -> bool {
    match constraint {
        ScopeConstraint::Any => true,
        ScopeConstraint::Eq(r) => reference_type(r).is_none_or(|t| t == ty),
        ScopeConstraint::In(r) => {
            reference_type(r).is_none_or(|ancestor| can_descend(schema, ty, ancestor))
        }
        ScopeConstraint::Is(t) => t == ty,
        ScopeConstraint::IsIn(t, r) => {
            t == ty && reference_type(r).is_none_or(|ancestor| can_descend(schema, ty, ancestor))
        }
    }
}

/// Whether an entity of type `ty` may have an ancestor of type `ancestor`
/// under the declared `memberOfTypes`.
fn can_descend(schema: &Schema, ty: &EntityType, ancestor: &EntityType) -> bool {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([ty]);
    while let Some(next) = queue.pop_front() {
        if next == ancestor {
            return true;
        }
        if seen.insert(next) {
            if let Some(declared) = schema.entity_type(next) {
                queue.extend(declared.member_of_types.iter());
            }
        }
    }
    false
}

fn environments(template: &Template, schema: &Schema) -> Vec<RequestEnv> {
    let actions: Vec<&ActionSchema> = match template.action_constraint() {
        ActionConstraint::Any => schema.actions().collect(),
        ActionConstraint::Eq(uid) => schema.action(uid).into_iter().collect(),
        ActionConstraint::In(groups) => groups
            .iter()
            .flat_map(|group| schema.actions_in(group))
            .unique_by(|action| action.uid.clone())
            .collect(),
    };

    let mut envs = Vec::new();
    for action in actions {
        for principal in &action.principal_types {
            if !admits(template.principal_constraint(), principal, schema) {
                continue;
            }
            for resource in &action.resource_types {
                if !admits(template.resource_constraint(), resource, schema) {
                    continue;
                }
                envs.push(RequestEnv {
                    principal: principal.clone(),
                    action: action.uid.clone(),
                    resource: resource.clone(),
                    context: Type::context(&action.context),
                });
            }
        }
    }
    envs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Effect, Expr, SlotId};
    use crate::types::EntityUid;
    use std::collections::BTreeMap;

    const SCHEMA: &str = r#"{
        "": {
            "entityTypes": {
                "User": {
                    "memberOfTypes": ["UserGroup"],
                    "shape": {
                        "type": "Record",
                        "attributes": {
                            "department": {"type": "String"},
                            "jobLevel": {"type": "Long", "required": false}
                        }
                    }
                },
                "UserGroup": {},
                "Photo": {
                    "memberOfTypes": ["Album"],
                    "shape": {"type": "Record", "attributes": {"private": {"type": "Boolean"}}}
                },
                "Album": {
                    "shape": {"type": "Record", "attributes": {"name": {"type": "String"}}}
                }
            },
            "actions": {
                "readOnly": {},
                "view": {
                    "memberOf": [{"id": "readOnly"}],
                    "appliesTo": {
                        "principalTypes": ["User"],
                        "resourceTypes": ["Photo", "Album"],
                        "context": {
                            "type": "Record",
                            "attributes": {"confidence_score": {"type": "Extension", "name": "decimal"}}
                        }
                    }
                }
            }
        }
    }"#;

    fn schema() -> Schema {
        SCHEMA.parse().unwrap()
    }

    fn view() -> ActionConstraint {
        ActionConstraint::Eq(EntityUid::of("Action", "view"))
    }

    fn validate_one(template: Template) -> ValidationResult {
        let mut set = PolicySet::new();
        set.add_static(template).unwrap();
        validate(&set, &schema())
    }

    #[test]
    fn test_valid_policy() {
        let template = Template::new("policy0", Effect::Permit)
            .with_principal(ScopeConstraint::Eq(EntityUid::of("User", "alice").into()))
            .with_action(view())
            .with_resource(ScopeConstraint::In(EntityUid::of("Album", "jane_vacation").into()))
            .when(
                Expr::context()
                    .get_attr("confidence_score")
                    .method("greaterThan", [Expr::call("decimal", [Expr::val("0.75")])]),
            );
        let result = validate_one(template);
        assert!(result.validation_passed(), "{result}");
    }

    #[test]
    fn test_attribute_must_exist_on_every_resource_type() {
        // `resource` is a Photo or an Album for `view`; only Photo has `private`.
        let template = Template::new("p", Effect::Forbid)
            .with_action(view())
            .when(Expr::resource().get_attr("private"));
        let result = validate_one(template);
        assert!(!result.validation_passed());
        assert!(matches!(
            result.errors()[0].kind,
            ValidationErrorKind::UnsafeAttributeAccess { .. }
        ));

        let narrowed = Template::new("p", Effect::Forbid)
            .with_action(view())
            .with_resource(ScopeConstraint::Is(EntityType::new("Photo")))
            .when(Expr::resource().get_attr("private"));
        assert!(validate_one(narrowed).validation_passed());
    }

    #[test]
    fn test_action_group_expands_to_members() {
        let template = Template::new("p", Effect::Permit)
            .with_action(ActionConstraint::In(vec![EntityUid::of("Action", "readOnly")]))
            .when(
                Expr::principal()
                    .get_attr("department")
                    .eq(Expr::val("Engineering")),
            );
        assert!(validate_one(template).validation_passed());
    }

    #[test]
    fn test_when_guard_carries_to_next_condition() {
        let template = Template::new("p", Effect::Permit)
            .with_action(view())
            .when(Expr::principal().has_attr("jobLevel"))
            .when(
                Expr::principal()
                    .get_attr("jobLevel")
                    .binary(BinaryOp::GreaterEq, Expr::val(5)),
            );
        assert!(validate_one(template).validation_passed());
    }

    #[test]
    fn test_unrecognized_scope() {
        let template = Template::new("bad", Effect::Permit)
            .with_principal(ScopeConstraint::Is(EntityType::new("Robot")))
            .with_action(ActionConstraint::Eq(EntityUid::of("Action", "delete")));
        let result = validate_one(template);
        let bad = PolicyId::new("bad");
        let kinds: Vec<&ValidationErrorKind> =
            result.errors_for(&bad).map(|e| &e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                &ValidationErrorKind::UnrecognizedEntityType {
                    name: "Robot".to_string()
                },
                &ValidationErrorKind::UnrecognizedActionId {
                    uid: "Action::\"delete\"".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_templates_and_links() {
        let mut set = PolicySet::new();
        set.add_template(
            Template::new("t", Effect::Permit)
                .with_principal(ScopeConstraint::In(SlotId::Principal.into()))
                .with_action(view())
                .when(Expr::principal().get_attr("department").eq(Expr::val("x"))),
        )
        .unwrap();
        set.link(
            &"t".into(),
            "ok".into(),
            BTreeMap::from([(SlotId::Principal, EntityUid::of("UserGroup", "g"))]),
        )
        .unwrap();
        set.link(
            &"t".into(),
            "bad".into(),
            BTreeMap::from([(SlotId::Principal, EntityUid::of("Team", "t"))]),
        )
        .unwrap();

        let result = validate(&set, &schema());
        assert_eq!(result.errors().len(), 1);
        assert_eq!(result.errors()[0].policy_id, PolicyId::new("bad"));
    }

    #[test]
    fn test_type_error_reported_once() {
        let template = Template::new("p", Effect::Permit).when(Expr::val(1));
        let result = validate_one(template);
        // Two environments (Photo and Album), one error.
        assert_eq!(result.errors().len(), 1);
        assert_eq!(
            result.to_string(),
            "policy `p`: unexpected type: expected Bool, got Long"
        );
    }
}
