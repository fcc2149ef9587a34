//! Scope matching: does a policy's principal, action and resource
//! constraint admit a request?

use serde::{Deserialize, Serialize};
use strum_macros::Display as StrumDisplay;
use utoipa::ToSchema;

use crate::ast::{ActionConstraint, Effect, Policy, PolicyId, ScopeConstraint};
use crate::entities::EntityStore;
use crate::error::EvalError;
use crate::types::EntityUid;

/// Which part of the scope admitted the request, and how.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, StrumDisplay, ToSchema,
)]
pub enum PolicyMatchReason {
    PrincipalEq,
    PrincipalIn,
    PrincipalAny,
    PrincipalIs,
    PrincipalIsIn,
    ResourceEq,
    ResourceIn,
    ResourceAny,
    ResourceIs,
    ResourceIsIn,
    ActionEq,
    ActionIn,
    ActionAny,
}

/// Restricts policy listings to one effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PolicyEffectFilter {
    #[default]
    Any,
    Permit,
    Forbid,
}

/// A policy whose principal constraint admits a given principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PolicyMatch {
    #[schema(value_type = String)]
    pub policy_id: PolicyId,
    #[schema(value_type = String)]
    pub effect: Effect,
    /// The principal match first, then `ActionAny`/`ResourceAny` when the
    /// policy leaves those unconstrained.
    pub reasons: Vec<PolicyMatchReason>,
}

impl PolicyMatch {
    pub(crate) fn for_principal(
        policy: &Policy,
        principal: &EntityUid,
        entities: &EntityStore,
    ) -> Result<Option<Self>, EvalError> {
        let Some(reason) = principal_match_reason(policy, principal, entities)? else {
            return Ok(None);
        };
        let mut reasons = vec![reason];
        if *policy.action_constraint() == ActionConstraint::Any {
            reasons.push(PolicyMatchReason::ActionAny);
        }
        if *policy.resource_constraint() == ScopeConstraint::Any {
            reasons.push(PolicyMatchReason::ResourceAny);
        }
        Ok(Some(PolicyMatch {
            policy_id: policy.id().clone(),
            effect: policy.effect(),
            reasons,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeMatch {
    Eq,
    In,
    Any,
    Is,
    IsIn,
}

/// Match one principal or resource constraint against `uid`. Slots resolve
/// through the policy's link values.
fn scope_match(
    constraint: &ScopeConstraint,
    policy: &Policy,
    uid: &EntityUid,
    entities: &EntityStore,
) -> Result<Option<ScopeMatch>, EvalError> {
    let matched = match constraint {
        ScopeConstraint::Any => Some(ScopeMatch::Any),
        ScopeConstraint::Eq(r) => (policy.resolve(r)? == uid).then_some(ScopeMatch::Eq),
        ScopeConstraint::In(r) => {
            entities.is_descendant_of(uid, policy.resolve(r)?).then_some(ScopeMatch::In)
        }
        ScopeConstraint::Is(ty) => (uid.entity_type() == ty).then_some(ScopeMatch::Is),
        ScopeConstraint::IsIn(ty, r) => (uid.entity_type() == ty
            && entities.is_descendant_of(uid, policy.resolve(r)?))
        .then_some(ScopeMatch::IsIn),
    };
    Ok(matched)
}

pub(crate) fn principal_match_reason(
    policy: &Policy,
    principal: &EntityUid,
    entities: &EntityStore,
) -> Result<Option<PolicyMatchReason>, EvalError> {
    let reason = scope_match(policy.principal_constraint(), policy, principal, entities)?.map(
        |m| match m {
            ScopeMatch::Eq => PolicyMatchReason::PrincipalEq,
            ScopeMatch::In => PolicyMatchReason::PrincipalIn,
            ScopeMatch::Any => PolicyMatchReason::PrincipalAny,
            ScopeMatch::Is => PolicyMatchReason::PrincipalIs,
            ScopeMatch::IsIn => PolicyMatchReason::PrincipalIsIn,
        },
    );
    Ok(reason)
}

pub(crate) fn resource_match_reason(
    policy: &Policy,
    resource: &EntityUid,
    entities: &EntityStore,
) -> Result<Option<PolicyMatchReason>, EvalError> {
    let reason = scope_match(policy.resource_constraint(), policy, resource, entities)?.map(
        |m| match m {
            ScopeMatch::Eq => PolicyMatchReason::ResourceEq,
            ScopeMatch::In => PolicyMatchReason::ResourceIn,
            ScopeMatch::Any => PolicyMatchReason::ResourceAny,
            ScopeMatch::Is => PolicyMatchReason::ResourceIs,
            ScopeMatch::IsIn => PolicyMatchReason::ResourceIsIn,
        },
    );
    Ok(reason)
}

/// `action == A` is equality; `action in [A, B]` holds when the action is
/// any of them or a member of one of their groups.
pub(crate) fn action_match_reason(
    constraint: &ActionConstraint,
    action: &EntityUid,
    entities: &EntityStore,
) -> Option<PolicyMatchReason> {
    match constraint {
        ActionConstraint::Any => Some(PolicyMatchReason::ActionAny),
        ActionConstraint::Eq(uid) if uid == action => Some(PolicyMatchReason::ActionEq),
        ActionConstraint::In(uids)
            if uids.iter().any(|uid| entities.is_descendant_of(action, uid)) =>
        {
            Some(PolicyMatchReason::ActionIn)
        }
        _ => None,
    }
}

pub(crate) fn matches_effect(effect: Effect, filter: PolicyEffectFilter) -> bool {
    match filter {
        PolicyEffectFilter::Any => true,
        PolicyEffectFilter::Permit => effect == Effect::Permit,
        PolicyEffectFilter::Forbid => effect == Effect::Forbid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{EntityReference, SlotId, Template};
    use crate::types::{Entity, EntityType};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use yare::parameterized;

    fn uid(ty: &str, id: &str) -> EntityUid {
        EntityUid::of(ty, id)
    }

    fn store() -> EntityStore {
        EntityStore::new([
            Entity::new(uid("User", "alice")).with_parent(uid("Group", "admins")),
            Entity::new(uid("Action", "view")).with_parent(uid("Action", "readOnly")),
        ])
        .unwrap()
    }

    fn principal_policy(constraint: ScopeConstraint) -> Policy {
        Policy::new_static(Template::new("p", Effect::Permit).with_principal(constraint)).unwrap()
    }

    #[parameterized(
        any = { ScopeConstraint::Any, Some(PolicyMatchReason::PrincipalAny) },
        eq = { ScopeConstraint::Eq(uid("User", "alice").into()), Some(PolicyMatchReason::PrincipalEq) },
        eq_other = { ScopeConstraint::Eq(uid("User", "bob").into()), None },
        in_group = { ScopeConstraint::In(uid("Group", "admins").into()), Some(PolicyMatchReason::PrincipalIn) },
        in_self = { ScopeConstraint::In(uid("User", "alice").into()), Some(PolicyMatchReason::PrincipalIn) },
        in_other = { ScopeConstraint::In(uid("Group", "users").into()), None },
        is = { ScopeConstraint::Is(EntityType::new("User")), Some(PolicyMatchReason::PrincipalIs) },
        is_other = { ScopeConstraint::Is(EntityType::new("Group")), None },
        is_in = { ScopeConstraint::IsIn(EntityType::new("User"), uid("Group", "admins").into()), Some(PolicyMatchReason::PrincipalIsIn) },
        is_in_wrong_type = { ScopeConstraint::IsIn(EntityType::new("Group"), uid("Group", "admins").into()), None },
    )]
    fn test_principal_match(constraint: ScopeConstraint, expected: Option<PolicyMatchReason>) {
        let policy = principal_policy(constraint);
        let reason = principal_match_reason(&policy, &uid("User", "alice"), &store()).unwrap();
        assert_eq!(reason, expected);
    }

    #[test]
    fn test_resource_slot_resolves_through_link() {
        let template = Arc::new(
            Template::new("t", Effect::Forbid)
                .with_resource(ScopeConstraint::In(EntityReference::Slot(SlotId::Resource))),
        );
        let policy = Policy::link(
            template,
            "l".into(),
            BTreeMap::from([(SlotId::Resource, uid("Group", "admins"))]),
        )
        .unwrap();
        let reason = resource_match_reason(&policy, &uid("User", "alice"), &store()).unwrap();
        assert_eq!(reason, Some(PolicyMatchReason::ResourceIn));
    }

    #[parameterized(
        any = { ActionConstraint::Any, Some(PolicyMatchReason::ActionAny) },
        eq = { ActionConstraint::Eq(uid("Action", "view")), Some(PolicyMatchReason::ActionEq) },
        eq_group_is_not_eq = { ActionConstraint::Eq(uid("Action", "readOnly")), None },
        in_group = { ActionConstraint::In(vec![uid("Action", "readOnly")]), Some(PolicyMatchReason::ActionIn) },
        in_list = { ActionConstraint::In(vec![uid("Action", "edit"), uid("Action", "view")]), Some(PolicyMatchReason::ActionIn) },
        in_other = { ActionConstraint::In(vec![uid("Action", "edit")]), None },
    )]
    fn test_action_match(constraint: ActionConstraint, expected: Option<PolicyMatchReason>) {
        assert_eq!(
            action_match_reason(&constraint, &uid("Action", "view"), &store()),
            expected
        );
    }

    #[test]
    fn test_policy_match_reasons() {
        let policy = Policy::new_static(
            Template::new("p", Effect::Forbid)
                .with_principal(ScopeConstraint::In(uid("Group", "admins").into()))
                .with_action(ActionConstraint::Eq(uid("Action", "view"))),
        )
        .unwrap();
        let found = PolicyMatch::for_principal(&policy, &uid("User", "alice"), &store())
            .unwrap()
            .unwrap();
        assert_eq!(found.effect, Effect::Forbid);
        assert_eq!(
            found.reasons,
            vec![PolicyMatchReason::PrincipalIn, PolicyMatchReason::ResourceAny]
        );

        let missing = PolicyMatch::for_principal(&policy, &uid("User", "bob"), &store()).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_matches_effect() {
        assert!(matches_effect(Effect::Permit, PolicyEffectFilter::Any));
        assert!(matches_effect(Effect::Forbid, PolicyEffectFilter::Forbid));
        assert!(!matches_effect(Effect::Forbid, PolicyEffectFilter::Permit));
    }
}
