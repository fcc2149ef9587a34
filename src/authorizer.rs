//! Combining policies into a decision.

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::debug;

use crate::ast::{Effect, Policy, PolicyId};
use crate::entities::EntityStore;
use crate::error::{EvalError, PolicyError};
use crate::evaluator::Evaluator;
use crate::policy_match::{action_match_reason, principal_match_reason, resource_match_reason};
use crate::policy_set::PolicySet;
use crate::timers::PhaseTimer;
use crate::types::{AuthorizationError, Decision, Request, Response};

/// Time spent in scope matching and in condition evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct AuthorizePhases {
    pub scope: Duration,
    pub conditions: Duration,
}

/// Stateless decision procedure.
///
/// A satisfied `forbid` wins and the satisfied forbids are the reasons.
/// Otherwise a satisfied `permit` allows, with the satisfied permits as the
/// reasons. Otherwise the request is denied with no reasons. Evaluation
/// errors are reported for every policy that raised one, and such a policy
/// counts as not satisfied.
#[derive(Debug, Clone, Copy, Default)]
pub struct Authorizer;

impl Authorizer {
    pub fn new() -> Self {
        Self
    }

    /// Principal and resource must exist in `entities`, and so must the
    /// action when the store was built from a schema; otherwise no decision
    /// is made.
    pub fn is_authorized(
        &self,
        request: &Request,
        policies: &PolicySet,
        entities: &EntityStore,
    ) -> Result<Response, PolicyError> {
        self.authorize(request, policies, entities, &mut AuthorizePhases::default())
    }

    pub(crate) fn authorize(
        &self,
        request: &Request,
        policies: &PolicySet,
        entities: &EntityStore,
        phases: &mut AuthorizePhases,
    ) -> Result<Response, PolicyError> {
        for uid in [&request.principal, &request.resource] {
            if !entities.contains(uid) {
                return Err(PolicyError::UnknownEntity(uid.to_string()));
            }
        }
        if entities.declares_actions() && !entities.contains(&request.action) {
            return Err(PolicyError::UnknownEntity(request.action.to_string()));
        }

        let evaluator = Evaluator::new(request, entities);
        let mut permits = BTreeSet::new();
        let mut forbids = BTreeSet::new();
        let mut errors = Vec::new();

        for policy in policies.policies() {
            let in_scope = {
                let _timer = PhaseTimer::new(&mut phases.scope);
                scope_matches(policy, request, entities)
            };
            let satisfied = match in_scope {
                Ok(true) => {
                    let _timer = PhaseTimer::new(&mut phases.conditions);
                    evaluator.conditions_hold(policy.conditions())
                }
                other => other,
            };

            match satisfied {
                Ok(true) => {
                    let bucket = match policy.effect() {
                        Effect::Permit => &mut permits,
                        Effect::Forbid => &mut forbids,
                    };
                    bucket.insert(policy.id().clone());
                }
                Ok(false) => {}
                Err(error) => {
                    debug!(
                        event = "Request",
                        phase = "PolicyError",
                        policy = %policy.id(),
                        error = %error
                    );
                    errors.push(AuthorizationError {
                        policy_id: policy.id().clone(),
                        error,
                    });
                }
            }
        }

        Ok(combine(permits, forbids, errors))
    }
}

fn scope_matches(
    policy: &Policy,
    request: &Request,
    entities: &EntityStore,
) -> Result<bool, EvalError> {
    Ok(
        principal_match_reason(policy, &request.principal, entities)?.is_some()
            && action_match_reason(policy.action_constraint(), &request.action, entities).is_some()
            && resource_match_reason(policy, &request.resource, entities)?.is_some(),
    )
}

fn combine(
    permits: BTreeSet<PolicyId>,
    forbids: BTreeSet<PolicyId>,
    errors: Vec<AuthorizationError>,
) -> Response {
    let (decision, reasons) = if !forbids.is_empty() {
        (Decision::Deny, forbids)
    } else if !permits.is_empty() {
        (Decision::Allow, permits)
    } else {
        (Decision::Deny, BTreeSet::new())
    };
    Response {
        decision,
        reasons,
        errors,
    }
}

/// Decide `request` against `policies` and `entities`.
pub fn decide(
    request: &Request,
    policies: &PolicySet,
    entities: &EntityStore,
) -> Result<Response, PolicyError> {
    Authorizer::new().is_authorized(request, policies, entities)
}
