use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::authorizer::{AuthorizePhases, Authorizer};
use crate::entities::EntityStore;
use crate::error::PolicyError;
use crate::loader;
use crate::metrics::{self, EvaluationPhases, EvaluationStats};
use crate::policy_match::{PolicyEffectFilter, PolicyMatch, matches_effect};
use crate::policy_set::PolicySet;
use crate::schema::Schema;
use crate::timers::{PhaseTimer, as_ms};
use crate::types::{EntityUid, PolicyVersion, Request, Response};
use crate::validator::{self, ValidationResult};

/// An immutable policy set together with its schema and version.
#[derive(Debug)]
pub struct PolicySnapshot {
    policies: PolicySet,
    schema: Option<Schema>,
    version: PolicyVersion,
}

impl PolicySnapshot {
    fn build(policies: PolicySet, schema: Option<Schema>) -> Result<Self, PolicyError> {
        if let Some(schema) = &schema {
            let result = validator::validate(&policies, schema);
            if !result.validation_passed() {
                warn!(
                    event = "Policies",
                    phase = "Validation",
                    errors = result.errors().len(),
                    result = %result
                );
                return Err(PolicyError::ValidationFailed(result.to_string()));
            }
        }
        let version = compute_version(&policies)?;
        Ok(Self {
            policies,
            schema,
            version,
        })
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    pub fn version(&self) -> &PolicyVersion {
        &self.version
    }
}

fn compute_version(policies: &PolicySet) -> Result<PolicyVersion, PolicyError> {
    let canonical = serde_json::to_string(policies)?;
    Ok(PolicyVersion {
        hash: format!("{:x}", Sha256::digest(canonical.as_bytes())),
        loaded_at: Utc::now().to_rfc3339(),
    })
}

/// The main engine handle. Cloneable and thread-safe.
///
/// Evaluations work on the snapshot that was current when they started; a
/// reload swaps in a new snapshot without waiting for them.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    inner: Arc<RwLock<Arc<PolicySnapshot>>>,
}

impl PolicyEngine {
    pub fn new(policies: PolicySet) -> Result<Self, PolicyError> {
        Self::from_snapshot(PolicySnapshot::build(policies, None)?)
    }

    /// Every policy must validate against `schema`; requests are then
    /// checked against it before evaluation.
    pub fn new_with_schema(policies: PolicySet, schema: Schema) -> Result<Self, PolicyError> {
        Self::from_snapshot(PolicySnapshot::build(policies, Some(schema))?)
    }

    pub fn from_json(policies: &str) -> Result<Self, PolicyError> {
        Self::new(loader::load_policies(policies)?)
    }

    pub fn from_json_with_schema(policies: &str, schema: &str) -> Result<Self, PolicyError> {
        Self::new_with_schema(loader::load_policies(policies)?, loader::load_schema(schema)?)
    }

    fn from_snapshot(snapshot: PolicySnapshot) -> Result<Self, PolicyError> {
        info!(
            event = "Policies",
            phase = "Loaded",
            policies = snapshot.policies.len(),
            schema = snapshot.schema.is_some(),
            version = %snapshot.version
        );
        metrics::record_reload(snapshot.version.clone(), snapshot.policies.len());
        Ok(PolicyEngine {
            inner: Arc::new(RwLock::new(Arc::new(snapshot))),
        })
    }

    /// Replace the policy set, keeping the schema. On failure the current
    /// snapshot stays in place.
    pub fn reload(&self, policies: PolicySet) -> Result<(), PolicyError> {
        let schema = self.current_snapshot()?.schema.clone();
        let snapshot = PolicySnapshot::build(policies, schema)?;
        let version = snapshot.version.clone();
        let count = snapshot.policies.len();

        *self.inner.write()? = Arc::new(snapshot);

        info!(event = "Policies", phase = "Reloaded", policies = count, version = %version);
        metrics::record_reload(version, count);
        Ok(())
    }

    /// Replace both the policy set and the schema in one step.
    pub fn reload_with_schema(&self, policies: PolicySet, schema: Schema) -> Result<(), PolicyError> {
        let snapshot = PolicySnapshot::build(policies, Some(schema))?;
        let version = snapshot.version.clone();
        let count = snapshot.policies.len();

        *self.inner.write()? = Arc::new(snapshot);

        info!(
            event = "Policies",
            phase = "Reloaded",
            policies = count,
            schema_reloaded = true,
            version = %version
        );
        metrics::record_reload(version, count);
        Ok(())
    }

    pub fn reload_from_json(&self, policies: &str) -> Result<(), PolicyError> {
        self.reload(loader::load_policies(policies)?)
    }

    pub fn current_snapshot(&self) -> Result<Arc<PolicySnapshot>, PolicyError> {
        Ok(Arc::clone(&*self.inner.read()?))
    }

    pub fn current_version(&self) -> Result<PolicyVersion, PolicyError> {
        Ok(self.current_snapshot()?.version.clone())
    }

    pub fn policies(&self) -> Result<PolicySet, PolicyError> {
        Ok(self.current_snapshot()?.policies.clone())
    }

    pub fn schema(&self) -> Result<Option<Schema>, PolicyError> {
        Ok(self.current_snapshot()?.schema.clone())
    }

    /// Validate the current policies against the current schema, if any.
    pub fn validate(&self) -> Result<Option<ValidationResult>, PolicyError> {
        let snapshot = self.current_snapshot()?;
        Ok(snapshot
            .schema
            .as_ref()
            .map(|schema| validator::validate(&snapshot.policies, schema)))
    }

    pub fn evaluate(
        &self,
        request: &Request,
        entities: &EntityStore,
    ) -> Result<Response, PolicyError> {
        let started = Instant::now();
        let snapshot = self.current_snapshot()?;

        debug!(
            event = "Request",
            phase = "Evaluation",
            principal = %request.principal,
            action = %request.action,
            resource = %request.resource,
            context = %request.context.to_value(),
            version = %snapshot.version
        );

        let mut validate_request = Duration::ZERO;
        if let Some(schema) = &snapshot.schema {
            let _timer = PhaseTimer::new(&mut validate_request);
            validator::validate_request(schema, request)?;
        }

        let mut phases = AuthorizePhases::default();
        let response =
            Authorizer::new().authorize(request, &snapshot.policies, entities, &mut phases)?;
        let duration = started.elapsed();

        info!(
            event = "Request",
            phase = "Result",
            decision = %response.decision,
            reasons = ?response.reason_ids(),
            errors = response.errors.len(),
            version = %snapshot.version
        );
        for error in &response.errors {
            warn!(event = "Request", phase = "PolicyError", error = %error);
        }

        metrics::record_evaluation(
            EvaluationStats {
                duration,
                allowed: response.is_allowed(),
                principal_id: request.principal.to_string(),
                action_id: request.action.to_string(),
                reasons: response.reasons.iter().map(ToString::to_string).collect(),
                errors: response.errors.len(),
            },
            EvaluationPhases {
                validate_request_ms: as_ms(validate_request),
                scope_ms: as_ms(phases.scope),
                conditions_ms: as_ms(phases.conditions),
                total_ms: as_ms(duration),
            },
        );

        Ok(response)
    }

    /// Policies whose principal constraint admits `principal`, directly or
    /// through its ancestors in `entities`, in id order.
    pub fn list_policies_for(
        &self,
        principal: &EntityUid,
        entities: &EntityStore,
        filter: PolicyEffectFilter,
    ) -> Result<Vec<PolicyMatch>, PolicyError> {
        let snapshot = self.current_snapshot()?;
        let mut found = Vec::new();
        for policy in snapshot
            .policies
            .policies()
            .filter(|p| matches_effect(p.effect(), filter))
        {
            match PolicyMatch::for_principal(policy, principal, entities) {
                Ok(Some(matched)) => found.push(matched),
                Ok(None) => {}
                Err(error) => {
                    warn!(
                        event = "Listing",
                        policy = %policy.id(),
                        error = %error,
                        "Skipping policy whose scope could not be resolved"
                    );
                }
            }
        }

        debug!(
            event = "Listing",
            principal = %principal,
            filter = ?filter,
            matches = found.len()
        );
        Ok(found)
    }
}

#[cfg(test)]
mod tests;
