//! Authorization decision types with policy metadata.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter, Result as FmtResult};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::ast::PolicyId;
use crate::error::EvalError;

/// Allow or deny.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub enum Decision {
    Allow,
    Deny,
}

impl Display for Decision {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Decision::Allow => write!(f, "Allow"),
            Decision::Deny => write!(f, "Deny"),
        }
    }
}

/// Version metadata for the policy set used during an evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub struct PolicyVersion {
    /// SHA-256 of the canonical JSON form of the policy set.
    pub hash: String,
    /// When this policy set was loaded into the engine (RFC 3339).
    pub loaded_at: String,
}

impl Display for PolicyVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{} @ {}", self.hash, self.loaded_at)
    }
}

/// An evaluation error attributed to the policy that raised it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub struct AuthorizationError {
    #[schema(value_type = String)]
    pub policy_id: PolicyId,
    pub error: EvalError,
}

impl Display for AuthorizationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "while evaluating policy `{}`: {}", self.policy_id, self.error)
    }
}

/// The outcome of one authorization call.
///
/// `reasons` holds the policies that determined the decision; `errors` holds
/// every policy whose condition failed to evaluate, whether or not it would
/// have mattered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Response {
    pub decision: Decision,
    #[schema(value_type = Vec<String>)]
    pub reasons: BTreeSet<PolicyId>,
    pub errors: Vec<AuthorizationError>,
}

impl Response {
    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allow
    }

    /// Reasons as plain strings, in id order.
    pub fn reason_ids(&self) -> Vec<&str> {
        self.reasons.iter().map(PolicyId::as_str).collect()
    }
}

impl Display for Response {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}[{}]", self.decision, self.reasons.iter().join(", "))?;
        if !self.errors.is_empty() {
            write!(f, " errors=[{}]", self.errors.iter().join("; "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version() -> PolicyVersion {
        PolicyVersion {
            hash: "abc123".to_string(),
            loaded_at: "2023-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_policy_version_display() {
        let display = format!("{}", version());
        assert!(display.contains("abc123"));
        assert!(display.contains("2023-01-01T00:00:00Z"));
    }

    #[test]
    fn test_response_display() {
        let response = Response {
            decision: Decision::Deny,
            reasons: BTreeSet::from([PolicyId::new("policy1")]),
            errors: vec![AuthorizationError {
                policy_id: PolicyId::new("policy2"),
                error: EvalError::type_error("bool", "long"),
            }],
        };
        assert_eq!(
            response.to_string(),
            "Deny[policy1] errors=[while evaluating policy `policy2`: type error: expected bool, got long]"
        );
        assert!(!response.is_allowed());
    }

    #[test]
    fn test_response_serialization() {
        let response = Response {
            decision: Decision::Allow,
            reasons: BTreeSet::from([PolicyId::new("policy0")]),
            errors: vec![],
        };
        insta::assert_json_snapshot!(response, @r#"
        {
          "decision": "Allow",
          "reasons": [
            "policy0"
          ],
          "errors": []
        }
        "#);
    }

    #[test]
    fn test_policy_version_serialization() {
        let serialized = serde_json::to_value(version()).unwrap();
        let deserialized: PolicyVersion = serde_json::from_value(serialized).unwrap();
        assert_eq!(deserialized, version());
    }
}
